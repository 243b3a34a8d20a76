//! Authentication module (encrypted file-based token storage)
//!
//! Instance tokens (JWTs) are stored encrypted with AES-256-GCM in
//! ~/.config/lemming/credentials.enc. The encryption key is derived from
//! machine-specific identifiers.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use anyhow::{Context, Result, anyhow};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::api::host_of;
use crate::paths;

const NONCE_SIZE: usize = 12;

/// Get machine ID for key derivation (cross-platform)
fn machine_id() -> String {
    #[cfg(target_os = "linux")]
    {
        for source in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
            if let Ok(id) = fs::read_to_string(source) {
                return id.trim().to_string();
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(output) = std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
        {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if let Some(uuid) = stdout
                .lines()
                .find(|line| line.contains("IOPlatformUUID"))
                .and_then(|line| line.split('"').nth(3))
            {
                return uuid.to_string();
            }
        }
    }

    // Fallback: home directory path
    dirs::home_dir()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| "lemming-fallback-key".to_string())
}

/// Derive the encryption key from machine-specific data
fn derive_key() -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(machine_id().as_bytes());
    if let Some(home) = dirs::home_dir() {
        hasher.update(home.to_string_lossy().as_bytes());
    }
    hasher.update(b"lemming-lemmy-client-v1");
    hasher.finalize().into()
}

/// Encrypted store of per-instance login tokens, filed by host
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    key: [u8; 32],
}

impl CredentialStore {
    /// Store at the default location with the machine-derived key
    pub fn open() -> Result<Self> {
        Ok(Self::at(paths::credentials_path()?))
    }

    /// Store at `path` with the machine-derived key
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self::with_key(path, derive_key())
    }

    /// Store at `path` with an explicit key
    pub fn with_key(path: impl Into<PathBuf>, key: [u8; 32]) -> Self {
        Self {
            path: path.into(),
            key,
        }
    }

    /// Where the encrypted file lives
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|_| anyhow!("Invalid key length"))
    }

    /// Load all tokens from the encrypted file
    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let encrypted = fs::read(&self.path).context("Failed to read credentials file")?;
        if encrypted.len() < NONCE_SIZE {
            return Ok(BTreeMap::new());
        }

        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow!("Failed to decrypt credentials"))?;

        serde_json::from_slice(&plaintext).context("Invalid credentials payload")
    }

    /// Save all tokens to the encrypted file
    fn save(&self, tokens: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create credentials directory")?;
        }

        let json = serde_json::to_vec(tokens)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill(&mut nonce_bytes);

        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce_bytes), json.as_slice())
            .map_err(|_| anyhow!("Failed to encrypt credentials"))?;

        let mut output = nonce_bytes.to_vec();
        output.extend(ciphertext);
        fs::write(&self.path, output).context("Failed to write credentials file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&self.path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&self.path, perms)?;
        }

        Ok(())
    }

    /// Store the login token for an instance
    pub fn store_token(&self, instance: &str, token: &str) -> Result<()> {
        let mut tokens = self.load().unwrap_or_else(|e| {
            tracing::warn!("Discarding unreadable credentials file: {e}");
            BTreeMap::new()
        });
        tokens.insert(host_of(instance), token.to_string());
        self.save(&tokens)
    }

    /// Get the login token for an instance
    pub fn get_token(&self, instance: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(&host_of(instance)))
    }

    /// Delete the login token for an instance. Returns whether one existed.
    pub fn delete_token(&self, instance: &str) -> Result<bool> {
        let mut tokens = self.load()?;
        let removed = tokens.remove(&host_of(instance)).is_some();
        if removed {
            self.save(&tokens)?;
        }
        Ok(removed)
    }

    /// Instances that have a stored token
    pub fn instances(&self) -> Result<Vec<String>> {
        Ok(self.load()?.into_keys().collect())
    }
}
