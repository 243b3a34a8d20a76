//! Common paths for Lemming data storage
//!
//! All Lemming data is stored under ~/.config/lemming/ on all platforms:
//! - config.toml - User configuration
//! - credentials.enc - Encrypted instance tokens
//! - lemming.sqlite - Preferences and recently viewed posts

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Get the Lemming data directory (~/.config/lemming/)
pub fn lemming_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let dir = home.join(".config").join("lemming");
    fs::create_dir_all(&dir).context("Failed to create lemming directory")?;
    Ok(dir)
}

/// Get the config file path (~/.config/lemming/config.toml)
pub fn config_path() -> Result<PathBuf> {
    Ok(lemming_dir()?.join("config.toml"))
}

/// Get the database file path (~/.config/lemming/lemming.sqlite)
pub fn database_path() -> Result<PathBuf> {
    Ok(lemming_dir()?.join("lemming.sqlite"))
}

/// Get the credentials file path (~/.config/lemming/credentials.enc)
pub fn credentials_path() -> Result<PathBuf> {
    Ok(lemming_dir()?.join("credentials.enc"))
}
