//! # Lemming
//!
//! A paced, polite command-line client for Lemmy servers.
//!
//! ## Overview
//!
//! Lemmy instances rate-limit aggressively. Lemming routes every request for
//! a host through one shared [`ThrottleQueue`], so no matter how many callers
//! are active, a server sees at most one request per configured interval.
//! Interactive requests can jump ahead of background ones by priority.
//! Bursty local writes (recently viewed posts) are coalesced per key with a
//! [`KeyedDebouncer`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Session                             │
//! │  Built at start-up, owns every long-lived component         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │   HostQueues    │ │   LemmyClient   │ │ RecentlyViewed  │
//! │                 │ │                 │ │                 │
//! │ • One per host  │ │ • GET / POST    │ │ • Per-post keys │
//! │ • Started lazily│ │ • Bearer token  │ │ • Debounced     │
//! │ • Flush/stop    │ │ • Raw JSON      │ │ • Pruned        │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │  ThrottleQueue  │ │ CredentialStore │ │    Database     │
//! │                 │ │                 │ │                 │
//! │ • Priority heap │ │ • AES-256-GCM   │ │ • Preferences   │
//! │ • Interval pace │ │ • Per instance  │ │ • Recent views  │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`throttle`] — Interval-paced priority queue
//! - [`debounce`] — Per-key debouncer
//! - [`api`] — Paced Lemmy HTTP client
//! - [`auth`] — Encrypted token storage
//! - [`config`] — Configuration management
//! - [`db`] — `SQLite` storage for preferences and recent views
//! - [`recent`] — Debounced recently-viewed tracker
//! - [`session`] — Application context
//!
//! ## Example
//!
//! ```no_run
//! use lemming::{Config, Session};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = Session::open(Config::load()?)?;
//!     let client = session.client(None)?;
//!     let site = client.get("/site", &[]).await?;
//!     println!("{site}");
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/lemming/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod debounce;
pub mod models;
pub mod paths;
pub mod recent;
pub mod session;
pub mod throttle;

// Re-export main types for convenience
pub use api::{ApiError, LemmyClient};
pub use config::Config;
pub use db::Database;
pub use debounce::{DebounceOptions, KeyedDebouncer};
pub use models::{PostRef, Preference, RecentView};
pub use session::{HostQueues, Session};
pub use throttle::{Priority, Settlement, TaskError, ThrottleConfig, ThrottleQueue};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Repository URL
pub const REPO_URL: &str = "https://github.com/lemming-client/lemming";
