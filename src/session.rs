//! Application session: the context every front end works through.
//!
//! A [`Session`] is built once at start-up and owns storage, credentials,
//! the per-host request queues and the recently-viewed tracker. Dropping it
//! without [`Session::shutdown`] loses debounced writes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};

use crate::api::{LemmyClient, host_of};
use crate::auth::CredentialStore;
use crate::config::Config;
use crate::db::Database;
use crate::recent::RecentlyViewed;
use crate::throttle::{ThrottleConfig, ThrottleQueue};

/// One shared, started queue per remote host
#[derive(Debug, Clone)]
pub struct HostQueues {
    config: ThrottleConfig,
    queues: Arc<Mutex<HashMap<String, ThrottleQueue>>>,
}

impl HostQueues {
    /// Registry whose queues all pace with `config`
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queue for the host of `instance`, created and started on first use
    pub fn queue_for(&self, instance: &str) -> ThrottleQueue {
        let host = host_of(instance);
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .entry(host)
            .or_insert_with_key(|host| {
                tracing::debug!(host, interval = ?self.config.interval, "starting host queue");
                let queue = ThrottleQueue::new(self.config);
                queue.start();
                queue
            })
            .clone()
    }

    /// Hosts that have a queue, sorted
    pub fn hosts(&self) -> Vec<String> {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let mut hosts: Vec<String> = queues.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    fn snapshot(&self) -> Vec<ThrottleQueue> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Dispatch everything queued on every host and wait for it to settle
    pub async fn flush_all(&self) {
        for queue in self.snapshot() {
            queue.flush().await;
        }
    }

    /// Stop every queue and cancel what is still waiting. Returns the number cancelled.
    pub fn shutdown(&self) -> usize {
        self.snapshot()
            .iter()
            .map(|queue| {
                queue.stop();
                queue.clear()
            })
            .sum()
    }
}

/// Explicitly constructed application context
#[derive(Debug)]
pub struct Session {
    config: Config,
    db: Arc<tokio::sync::Mutex<Database>>,
    credentials: CredentialStore,
    queues: HostQueues,
    recent: RecentlyViewed,
}

impl Session {
    /// Open storage at the default locations. Must run inside a tokio runtime.
    pub fn open(config: Config) -> Result<Self> {
        let db = Database::open().context("Failed to open database")?;
        let credentials = CredentialStore::open()?;
        Ok(Self::with_parts(config, db, credentials))
    }

    /// Assemble a session from already opened parts
    pub fn with_parts(config: Config, db: Database, credentials: CredentialStore) -> Self {
        let db = Arc::new(tokio::sync::Mutex::new(db));
        let recent = RecentlyViewed::new(
            Arc::clone(&db),
            config.debounce_options(),
            config.recent_limit,
        );
        let queues = HostQueues::new(config.throttle_config());

        Self {
            config,
            db,
            credentials,
            queues,
            recent,
        }
    }

    /// Effective configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared database handle
    pub fn database(&self) -> Arc<tokio::sync::Mutex<Database>> {
        Arc::clone(&self.db)
    }

    /// Encrypted token store
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Per-host request queues
    pub fn queues(&self) -> &HostQueues {
        &self.queues
    }

    /// Recently-viewed tracker
    pub fn recent(&self) -> &RecentlyViewed {
        &self.recent
    }

    /// Paced client for `instance` (the configured default when `None`),
    /// carrying any stored token for it.
    pub fn client(&self, instance: Option<&str>) -> Result<LemmyClient> {
        let instance = instance.unwrap_or(&self.config.instance);
        let queue = self.queues.queue_for(instance);
        let client = LemmyClient::new(instance, queue, self.config.request_timeout())
            .with_context(|| format!("Failed to create client for {instance}"))?;

        let token = self
            .credentials
            .get_token(instance)
            .context("Failed to read stored credentials")?;

        Ok(match token {
            Some(token) => client.with_token(token),
            None => client,
        })
    }

    /// Write pending views, drain the queues, then stop everything.
    pub async fn shutdown(&self) {
        let written = self.recent.flush().await;
        self.recent.shutdown();
        self.queues.flush_all().await;
        let cancelled = self.queues.shutdown();
        tracing::debug!(written, cancelled, "session shut down");
    }
}
