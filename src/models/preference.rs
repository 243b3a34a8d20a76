//! Locally cached preference

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A lightweight key/value preference stored on this device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preference {
    /// Preference name (e.g. `feed.sort`)
    pub key: String,
    /// Stored value, as text
    pub value: String,
    /// When the value was last written
    pub updated_at: DateTime<Utc>,
}
