//! Database module for `SQLite` storage (preferences, recently viewed posts)

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::path::PathBuf;

use crate::models::{PostRef, Preference, RecentView};
use crate::paths;

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl Database {
    /// Open or create the database at the default location
    pub fn open() -> Result<Self> {
        let path = Self::default_path()?;
        Self::open_path(&path)
    }

    /// Open or create the database at a specific path
    pub fn open_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create data directory")?;
        }

        let conn = Connection::open(path).context("Failed to open database")?;

        let db = Self { conn };
        db.init()?;

        Ok(db)
    }

    /// In-memory database, nothing touches disk
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Get the default database path
    pub fn default_path() -> Result<PathBuf> {
        paths::database_path()
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r"
            -- Lightweight preferences
            CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Recently viewed posts
            CREATE TABLE IF NOT EXISTS recently_viewed (
                instance TEXT NOT NULL,
                post_id INTEGER NOT NULL,
                title TEXT,
                viewed_at TEXT NOT NULL,
                view_count INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (instance, post_id)
            );

            CREATE INDEX IF NOT EXISTS idx_recently_viewed_viewed_at ON recently_viewed(viewed_at);
            ",
        )?;

        Ok(())
    }

    // ==================== Preferences ====================

    /// Insert or overwrite a preference
    pub fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            r"INSERT INTO preferences (key, value, updated_at) VALUES (?1, ?2, ?3)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, timestamp(Utc::now())],
        )?;
        Ok(())
    }

    /// Read a preference value
    pub fn get_preference(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Remove a preference. Returns whether it existed.
    pub fn delete_preference(&self, key: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM preferences WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    /// All preferences, sorted by key
    pub fn list_preferences(&self) -> Result<Vec<Preference>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value, updated_at FROM preferences ORDER BY key")?;

        let prefs = stmt.query_map([], |row| {
            Ok(Preference {
                key: row.get(0)?,
                value: row.get(1)?,
                updated_at: parse_timestamp(row, 2)?,
            })
        })?;

        prefs.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ==================== Recently Viewed ====================

    /// Record a view, bumping the count if the post was seen before
    pub fn record_view(
        &self,
        post: &PostRef,
        title: Option<&str>,
        viewed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            r"INSERT INTO recently_viewed (instance, post_id, title, viewed_at, view_count)
               VALUES (?1, ?2, ?3, ?4, 1)
               ON CONFLICT(instance, post_id) DO UPDATE SET
                   title = COALESCE(excluded.title, title),
                   viewed_at = excluded.viewed_at,
                   view_count = view_count + 1",
            params![post.instance, post.post_id, title, timestamp(viewed_at)],
        )?;
        Ok(())
    }

    /// Most recently viewed posts first
    pub fn recent_views(&self, limit: usize) -> Result<Vec<RecentView>> {
        let mut stmt = self.conn.prepare(
            "SELECT instance, post_id, title, viewed_at, view_count
             FROM recently_viewed ORDER BY viewed_at DESC LIMIT ?1",
        )?;

        let views = stmt.query_map(params![limit as i64], |row| {
            Ok(RecentView {
                post: PostRef::new(row.get::<_, String>(0)?, row.get(1)?),
                title: row.get(2)?,
                viewed_at: parse_timestamp(row, 3)?,
                view_count: row.get(4)?,
            })
        })?;

        views.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Keep only the `keep` most recent views. Returns how many were removed.
    pub fn prune_recent(&self, keep: usize) -> Result<usize> {
        let count = self.conn.execute(
            r"DELETE FROM recently_viewed WHERE rowid NOT IN (
                   SELECT rowid FROM recently_viewed ORDER BY viewed_at DESC LIMIT ?1
               )",
            params![keep as i64],
        )?;
        Ok(count)
    }

    /// Forget every recently viewed post
    pub fn clear_recent(&self) -> Result<usize> {
        let count = self.conn.execute("DELETE FROM recently_viewed", [])?;
        Ok(count)
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Read an RFC 3339 column without panicking on bad rows
fn parse_timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
