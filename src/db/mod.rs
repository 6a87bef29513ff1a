//! Persisted crawl positions.
//!
//! One row per blog holding the timestamp cursor and pagination offset of
//! the last fully successful run. Read once at run start, written once at
//! run end.

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS crawl_state (
    blog        TEXT PRIMARY KEY,
    cursor_time INTEGER NOT NULL,
    offset      INTEGER NOT NULL
)";

/// Key-value store of per-blog crawl positions.
pub struct StateDb {
    conn: Connection,
}

impl StateDb {
    /// Open (creating if necessary) the state database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute(SCHEMA, [])?;
        Ok(Self { conn })
    }

    /// Fetch the persisted cursor for `blog`, if any.
    pub fn get_cursor(&self, blog: &str) -> Result<Option<(DateTime<Utc>, u64)>> {
        let row: Option<(i64, u64)> = self
            .conn
            .query_row(
                "SELECT cursor_time, offset FROM crawl_state WHERE blog = ?1",
                [blog],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((seconds, offset)) = row else {
            return Ok(None);
        };

        match Utc.timestamp_opt(seconds, 0).single() {
            Some(time) => Ok(Some((time, offset))),
            None => {
                // Corrupt row: treat as never crawled rather than refusing to run.
                tracing::warn!("{}: stored cursor time {} is invalid, ignoring", blog, seconds);
                Ok(None)
            }
        }
    }

    /// Persist the cursor for `blog`, replacing any previous value.
    pub fn set_cursor(&self, blog: &str, time: DateTime<Utc>, offset: u64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO crawl_state (blog, cursor_time, offset) VALUES (?1, ?2, ?3)
             ON CONFLICT(blog) DO UPDATE SET cursor_time = ?2, offset = ?3",
            rusqlite::params![blog, time.timestamp(), offset],
        )?;
        Ok(())
    }
}
