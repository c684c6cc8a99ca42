//! Database schema and connection management.

use crate::DatabaseError;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Current schema version, stored in `PRAGMA user_version`.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Main database connection and schema manager
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self { conn })
    }

    /// Create a new in-memory database for testing
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Initialize the database schema, validating the stored version first.
    pub fn initialize_schema(&self) -> Result<(), DatabaseError> {
        self.validate_schema_version()?;
        self.create_attendees_table()?;
        self.create_events_table()?;
        self.create_scan_log_table()?;
        self.create_sync_metadata_table()?;
        self.create_indexes()?;
        self.create_triggers()?;
        self.conn
            .pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
        Ok(())
    }

    fn create_attendees_table(&self) -> Result<(), DatabaseError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS attendees (
                id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                code TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL DEFAULT '',
                email TEXT NOT NULL DEFAULT '',
                ticket_type TEXT,
                checked_in INTEGER NOT NULL DEFAULT 0,
                checked_in_at INTEGER,
                updated_at INTEGER NOT NULL,
                verification_status TEXT NOT NULL DEFAULT 'pending',
                CHECK ((checked_in = 1) = (checked_in_at IS NOT NULL))
            )",
            [],
        )?;
        Ok(())
    }

    fn create_events_table(&self) -> Result<(), DatabaseError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                event_date TEXT,
                venue TEXT,
                organizer_id TEXT,
                updated_at INTEGER
            )",
            [],
        )?;
        Ok(())
    }

    fn create_scan_log_table(&self) -> Result<(), DatabaseError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS scan_log (
                scan_id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT NOT NULL,
                scanner_id TEXT NOT NULL,
                scanned_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        Ok(())
    }

    fn create_sync_metadata_table(&self) -> Result<(), DatabaseError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS sync_metadata (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                active_event_id TEXT,
                last_push_at INTEGER,
                last_pull_at INTEGER
            )",
            [],
        )?;
        Ok(())
    }

    fn create_indexes(&self) -> Result<(), DatabaseError> {
        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_attendees_code ON attendees(code)",
            "CREATE INDEX IF NOT EXISTS idx_attendees_event_id ON attendees(event_id)",
            "CREATE INDEX IF NOT EXISTS idx_scan_log_synced ON scan_log(synced)",
            "CREATE INDEX IF NOT EXISTS idx_scan_log_code ON scan_log(code)",
        ];
        for sql in &indexes {
            self.conn.execute(sql, [])?;
        }
        Ok(())
    }

    fn create_triggers(&self) -> Result<(), DatabaseError> {
        self.conn.execute_batch(
            "CREATE TRIGGER IF NOT EXISTS scan_log_synced_monotonic
             BEFORE UPDATE OF synced ON scan_log
             FOR EACH ROW WHEN OLD.synced = 1 AND NEW.synced = 0
             BEGIN
                 SELECT RAISE(ABORT, 'scan_log.synced cannot revert');
             END;

             CREATE TRIGGER IF NOT EXISTS scan_log_no_delete
             BEFORE DELETE ON scan_log
             BEGIN
                 SELECT RAISE(ABORT, 'scan_log is append-only');
             END;",
        )?;
        Ok(())
    }

    /// Refuse databases written by a newer schema.
    pub fn validate_schema_version(&self) -> Result<(), DatabaseError> {
        let version: i32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version > CURRENT_SCHEMA_VERSION {
            return Err(DatabaseError::Other(format!(
                "Schema version mismatch: expected at most {}, found {}",
                CURRENT_SCHEMA_VERSION, version
            )));
        }
        Ok(())
    }

    /// Get a reference to the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(db: &Database, kind: &str) -> Vec<String> {
        db.conn
            .prepare("SELECT name FROM sqlite_master WHERE type = ?1")
            .unwrap()
            .query_map([kind], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        db.initialize_schema().unwrap();

        let tables = names(&db, "table");
        for table in ["attendees", "events", "scan_log", "sync_metadata"] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }

        let indexes = names(&db, "index");
        assert!(indexes.contains(&"idx_attendees_code".to_string()));
        assert!(indexes.contains(&"idx_attendees_event_id".to_string()));

        let triggers = names(&db, "trigger");
        assert!(triggers.contains(&"scan_log_synced_monotonic".to_string()));
        assert!(triggers.contains(&"scan_log_no_delete".to_string()));
    }

    #[test]
    fn test_initialize_is_repeatable() {
        let db = Database::in_memory().unwrap();
        db.initialize_schema().unwrap();
        db.initialize_schema().unwrap();
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let db = Database::in_memory().unwrap();
        db.conn
            .pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION + 1)
            .unwrap();
        assert!(db.initialize_schema().is_err());
    }

    #[test]
    fn test_checked_in_invariant_is_enforced() {
        let db = Database::in_memory().unwrap();
        db.initialize_schema().unwrap();
        let result = db.conn.execute(
            "INSERT INTO attendees (id, event_id, code, checked_in, checked_in_at, updated_at)
             VALUES ('a1', 'E1', 'C1', 1, NULL, 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_synced_flag_cannot_revert() {
        let db = Database::in_memory().unwrap();
        db.initialize_schema().unwrap();
        db.conn
            .execute(
                "INSERT INTO scan_log (code, scanner_id, scanned_at, synced)
                 VALUES ('C1', 's1', 0, 1)",
                [],
            )
            .unwrap();
        assert!(db
            .conn
            .execute("UPDATE scan_log SET synced = 0 WHERE scan_id = 1", [])
            .is_err());
        assert!(db.conn.execute("DELETE FROM scan_log", []).is_err());
    }
}
