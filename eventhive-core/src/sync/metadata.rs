//! Sync bookkeeping stored in the local database.

use crate::database::models::{from_millis, to_millis};
use crate::DatabaseError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reconciler state for this scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Event whose attendees the pull loop follows.
    pub active_event_id: Option<String>,
    pub last_push_at: Option<DateTime<Utc>>,
    pub last_pull_at: Option<DateTime<Utc>>,
}

impl SyncMetadata {
    /// Load sync metadata from the database. Returns default if no row exists.
    pub fn load(conn: &rusqlite::Connection) -> Result<Self, DatabaseError> {
        let result = conn.query_row(
            "SELECT active_event_id, last_push_at, last_pull_at FROM sync_metadata WHERE id = 1",
            [],
            |row| {
                let active_event_id: Option<String> = row.get(0)?;
                let last_push_at: Option<i64> = row.get(1)?;
                let last_pull_at: Option<i64> = row.get(2)?;

                Ok(SyncMetadata {
                    active_event_id,
                    last_push_at: last_push_at.map(from_millis),
                    last_pull_at: last_pull_at.map(from_millis),
                })
            },
        );

        match result {
            Ok(meta) => Ok(meta),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(Self::default()),
            Err(e) => Err(DatabaseError::Sqlite(e)),
        }
    }

    /// Save sync metadata to the database (upsert).
    pub fn save(&self, conn: &rusqlite::Connection) -> Result<(), DatabaseError> {
        conn.execute(
            "INSERT INTO sync_metadata (id, active_event_id, last_push_at, last_pull_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                active_event_id = excluded.active_event_id,
                last_push_at = excluded.last_push_at,
                last_pull_at = excluded.last_pull_at",
            rusqlite::params![
                self.active_event_id,
                self.last_push_at.map(to_millis),
                self.last_pull_at.map(to_millis),
            ],
        )?;

        Ok(())
    }
}
