//! Recently viewed posts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies a post on a specific instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostRef {
    /// Host the post was viewed on (e.g. `lemmy.ml`)
    pub instance: String,
    /// Post id on that instance
    pub post_id: i64,
}

impl PostRef {
    /// Create a reference to `post_id` on `instance`
    pub fn new(instance: impl Into<String>, post_id: i64) -> Self {
        Self {
            instance: instance.into(),
            post_id,
        }
    }
}

impl std::fmt::Display for PostRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/post/{}", self.instance, self.post_id)
    }
}

/// A row of the recently viewed list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentView {
    /// Which post
    pub post: PostRef,
    /// Title at the time it was viewed, if known
    pub title: Option<String>,
    /// Most recent view
    pub viewed_at: DateTime<Utc>,
    /// How many debounced views were recorded
    pub view_count: u32,
}
