//! Local ticket store: the scanner's durable attendee cache and scan audit log.
//!
//! All access goes through one connection behind a mutex, so mutations from
//! the scan path and the sync loops never interleave within a record.

use crate::database::models::{
    from_millis, to_millis, Attendee, Event, ScanLogEntry, StoreStats, UpsertReport,
    VerificationStatus,
};
use crate::database::schema::Database;
use crate::sync::conflict::{ConflictResolver, Resolution};
use crate::sync::metadata::SyncMetadata;
use crate::DatabaseError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, DatabaseError>;

const ATTENDEE_COLUMNS: &str = "id, event_id, code, name, email, ticket_type, \
     checked_in, checked_in_at, updated_at, verification_status";

/// Thread-safe handle to the local ticket database.
#[derive(Clone)]
pub struct TicketStore {
    db: Arc<Mutex<Database>>,
}

impl TicketStore {
    /// Wrap an opened database, creating the schema if needed.
    pub fn new(db: Database) -> StoreResult<Self> {
        db.initialize_schema()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open (or create) the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::new(Database::open(path)?)
    }

    /// Create an in-memory store for testing
    pub fn in_memory() -> StoreResult<Self> {
        Self::new(Database::in_memory()?)
    }

    fn with_conn<T>(
        &self,
        op: &str,
        f: impl FnOnce(&Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let db = self
            .db
            .lock()
            .map_err(|_| DatabaseError::LockPoisoned(op.to_string()))?;
        f(db.conn())
    }

    /// Poison the connection lock so every later call fails.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let db = Arc::clone(&self.db);
        let _ = std::thread::spawn(move || {
            let _guard = db.lock().unwrap();
            panic!("store lock poisoned for test");
        })
        .join();
    }

    // --- Attendees ---

    /// Insert or replace attendee records by `id`.
    ///
    /// Existing rows are only replaced when [`ConflictResolver`] accepts the
    /// incoming version, so re-applying the same batch is a no-op and a
    /// stale pull cannot undo a newer local check-in. Embedded event rows are
    /// cached alongside. A record that violates a constraint (e.g. its code
    /// belongs to another attendee) is skipped without failing the batch.
    pub fn upsert_attendees(&self, records: &[Attendee]) -> StoreResult<UpsertReport> {
        self.with_conn("upsert attendees", |conn| {
            let tx = conn.unchecked_transaction()?;
            let mut report = UpsertReport::default();

            for record in records {
                let incoming = record.clone().normalized();
                if let Some(event) = &incoming.event {
                    upsert_event_row(&tx, event)?;
                }

                let local = tx
                    .query_row(
                        &format!("SELECT {} FROM attendees WHERE id = ?1", ATTENDEE_COLUMNS),
                        [&incoming.id],
                        attendee_from_row,
                    )
                    .optional()?;

                let (written, counter) = match local {
                    None => (insert_attendee_row(&tx, &incoming), &mut report.inserted),
                    Some(local) => match ConflictResolver::resolve(&local, &incoming) {
                        Resolution::KeepLocal => {
                            report.kept_local += 1;
                            continue;
                        }
                        Resolution::AcceptRemote => {
                            (update_attendee_row(&tx, &incoming), &mut report.updated)
                        }
                    },
                };

                match written {
                    Ok(()) => *counter += 1,
                    Err(e) if is_constraint_violation(&e) => {
                        warn!("Skipping attendee {} ({}): {}", incoming.id, incoming.code, e);
                        report.rejected += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            tx.commit()?;
            debug!(
                "Upserted attendees: {} inserted, {} updated, {} kept, {} rejected",
                report.inserted, report.updated, report.kept_local, report.rejected
            );
            Ok(report)
        })
    }

    /// Check if a ticket code is known locally
    pub fn exists(&self, code: &str) -> StoreResult<bool> {
        self.with_conn("exists", |conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM attendees WHERE code = ?1)",
                [code],
                |row| row.get(0),
            )?)
        })
    }

    /// Check if a ticket code is checked in. Unknown codes report `false`.
    pub fn is_checked_in(&self, code: &str) -> StoreResult<bool> {
        self.with_conn("is checked in", |conn| {
            let checked_in: Option<bool> = conn
                .query_row(
                    "SELECT checked_in FROM attendees WHERE code = ?1",
                    [code],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(checked_in.unwrap_or(false))
        })
    }

    /// Get an attendee by ticket code
    pub fn get_attendee(&self, code: &str) -> StoreResult<Option<Attendee>> {
        self.with_conn("get attendee", |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM attendees WHERE code = ?1", ATTENDEE_COLUMNS),
                    [code],
                    attendee_from_row,
                )
                .optional()?)
        })
    }

    /// All attendees of an event, optionally only those checked in
    pub fn event_attendees(
        &self,
        event_id: &str,
        checked_in_only: bool,
    ) -> StoreResult<Vec<Attendee>> {
        self.with_conn("event attendees", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM attendees
                 WHERE event_id = ?1 AND (?2 = 0 OR checked_in = 1)
                 ORDER BY name, code",
                ATTENDEE_COLUMNS
            ))?;
            let rows = stmt.query_map(params![event_id, checked_in_only], attendee_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Mark a ticket as checked in at `at`.
    ///
    /// Only an unchecked row is changed, so a repeated call keeps the first
    /// timestamp. Returns whether a row changed.
    pub fn mark_checked_in(&self, code: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        self.with_conn("mark checked in", |conn| {
            Ok(mark_checked_in_row(conn, code, at)? > 0)
        })
    }

    /// Update the verification status of a ticket. Returns whether a row changed.
    pub fn set_verification_status(
        &self,
        code: &str,
        status: VerificationStatus,
    ) -> StoreResult<bool> {
        self.with_conn("set verification status", |conn| {
            let changed = conn.execute(
                "UPDATE attendees SET verification_status = ?1 WHERE code = ?2",
                params![status.as_str(), code],
            )?;
            Ok(changed > 0)
        })
    }

    /// Check in a listed ticket and log the scan in one transaction.
    ///
    /// Returns the new `scan_id`, or `None` if the ticket is unknown or was
    /// already checked in. A code admitted before its row arrived already has
    /// a scan logged; that row is marked checked in at the first scan's time
    /// and `None` is returned without logging another scan.
    pub fn record_check_in(
        &self,
        code: &str,
        scanner_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<i64>> {
        self.with_conn("record check-in", |conn| {
            let tx = conn.unchecked_transaction()?;
            if let Some(first_scan) = first_scan_at_row(&tx, code)? {
                if mark_checked_in_row(&tx, code, first_scan)? > 0 {
                    set_verified_row(&tx, code)?;
                    tx.commit()?;
                    debug!("Applied earlier admission of {} at {}", code, first_scan);
                }
                return Ok(None);
            }
            if mark_checked_in_row(&tx, code, at)? == 0 {
                return Ok(None);
            }
            set_verified_row(&tx, code)?;
            let scan_id = append_scan_row(&tx, code, scanner_id, at)?;
            tx.commit()?;
            Ok(Some(scan_id))
        })
    }

    /// Log the admission of a ticket that has no local attendee row.
    ///
    /// Returns `None` without writing if the code was already admitted.
    pub fn record_unlisted_scan(
        &self,
        code: &str,
        scanner_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<i64>> {
        self.with_conn("record unlisted scan", |conn| {
            let tx = conn.unchecked_transaction()?;
            if scan_logged_row(&tx, code)? {
                return Ok(None);
            }
            let scan_id = append_scan_row(&tx, code, scanner_id, at)?;
            tx.commit()?;
            Ok(Some(scan_id))
        })
    }

    // --- Events ---

    /// Insert or replace cached events. Returns the number of rows written.
    pub fn upsert_events(&self, events: &[Event]) -> StoreResult<usize> {
        self.with_conn("upsert events", |conn| {
            let tx = conn.unchecked_transaction()?;
            for event in events {
                upsert_event_row(&tx, event)?;
            }
            tx.commit()?;
            Ok(events.len())
        })
    }

    /// Get a cached event by id
    pub fn get_event(&self, event_id: &str) -> StoreResult<Option<Event>> {
        self.with_conn("get event", |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, event_date, venue, organizer_id, updated_at
                     FROM events WHERE id = ?1",
                    [event_id],
                    |row| {
                        let updated_at: Option<i64> = row.get(5)?;
                        Ok(Event {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            event_date: row.get(2)?,
                            venue: row.get(3)?,
                            organizer_id: row.get(4)?,
                            updated_at: updated_at.map(from_millis),
                        })
                    },
                )
                .optional()?)
        })
    }

    // --- Scan log ---

    /// Append a scan log entry, returning its `scan_id`
    pub fn append_scan_log(
        &self,
        code: &str,
        scanner_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<i64> {
        self.with_conn("append scan log", |conn| {
            Ok(append_scan_row(conn, code, scanner_id, at)?)
        })
    }

    /// Check if any scan of this code has been logged
    pub fn scan_logged(&self, code: &str) -> StoreResult<bool> {
        self.with_conn("scan logged", |conn| Ok(scan_logged_row(conn, code)?))
    }

    /// Unsynced scan log entries, oldest first
    pub fn unsynced_scans(&self) -> StoreResult<Vec<ScanLogEntry>> {
        self.with_conn("unsynced scans", |conn| {
            let mut stmt = conn.prepare(
                "SELECT scan_id, code, scanner_id, scanned_at, synced
                 FROM scan_log WHERE synced = 0 ORDER BY scan_id ASC",
            )?;
            let rows = stmt.query_map([], scan_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Get one scan log entry
    pub fn get_scan(&self, scan_id: i64) -> StoreResult<Option<ScanLogEntry>> {
        self.with_conn("get scan", |conn| {
            Ok(conn
                .query_row(
                    "SELECT scan_id, code, scanner_id, scanned_at, synced
                     FROM scan_log WHERE scan_id = ?1",
                    [scan_id],
                    scan_from_row,
                )
                .optional()?)
        })
    }

    /// Flag a scan log entry as delivered to the remote store.
    ///
    /// Returns whether the flag changed; already-synced entries are left alone.
    pub fn mark_synced(&self, scan_id: i64) -> StoreResult<bool> {
        self.with_conn("mark synced", |conn| {
            let changed = conn.execute(
                "UPDATE scan_log SET synced = 1 WHERE scan_id = ?1 AND synced = 0",
                [scan_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Total number of logged scans
    pub fn scan_count(&self) -> StoreResult<u64> {
        self.with_conn("scan count", |conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM scan_log", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    /// Counters over the whole store, or over one event's attendees
    pub fn stats(&self, event_id: Option<&str>) -> StoreResult<StoreStats> {
        self.with_conn("stats", |conn| {
            let (attendees, checked_in): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(checked_in), 0) FROM attendees
                 WHERE ?1 IS NULL OR event_id = ?1",
                [event_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let (scans, unsynced): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(synced = 0), 0) FROM scan_log
                 WHERE ?1 IS NULL OR code IN (SELECT code FROM attendees WHERE event_id = ?1)",
                [event_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(StoreStats {
                attendees: attendees as u64,
                checked_in: checked_in as u64,
                scans: scans as u64,
                unsynced_scans: unsynced as u64,
            })
        })
    }

    // --- Sync metadata ---

    /// Load the reconciler's bookkeeping
    pub fn sync_metadata(&self) -> StoreResult<SyncMetadata> {
        self.with_conn("load sync metadata", SyncMetadata::load)
    }

    /// Load, modify and save the reconciler's bookkeeping atomically
    pub fn update_sync_metadata(
        &self,
        f: impl FnOnce(&mut SyncMetadata),
    ) -> StoreResult<SyncMetadata> {
        self.with_conn("update sync metadata", |conn| {
            let mut meta = SyncMetadata::load(conn)?;
            f(&mut meta);
            meta.save(conn)?;
            Ok(meta)
        })
    }

    /// Select the event the pull loop follows (`None` pauses pulling)
    pub fn set_active_event(&self, event_id: Option<&str>) -> StoreResult<()> {
        self.update_sync_metadata(|meta| meta.active_event_id = event_id.map(str::to_string))?;
        Ok(())
    }
}

fn attendee_from_row(row: &Row<'_>) -> rusqlite::Result<Attendee> {
    let checked_in_at: Option<i64> = row.get(7)?;
    let updated_at: i64 = row.get(8)?;
    let status: String = row.get(9)?;
    Ok(Attendee {
        id: row.get(0)?,
        event_id: row.get(1)?,
        code: row.get(2)?,
        name: row.get(3)?,
        email: row.get(4)?,
        ticket_type: row.get(5)?,
        checked_in: row.get(6)?,
        checked_in_at: checked_in_at.map(from_millis),
        updated_at: from_millis(updated_at),
        verification_status: VerificationStatus::parse(&status),
        event: None,
    })
}

fn scan_from_row(row: &Row<'_>) -> rusqlite::Result<ScanLogEntry> {
    let scanned_at: i64 = row.get(3)?;
    Ok(ScanLogEntry {
        scan_id: row.get(0)?,
        code: row.get(1)?,
        scanner_id: row.get(2)?,
        scanned_at: from_millis(scanned_at),
        synced: row.get(4)?,
    })
}

fn insert_attendee_row(conn: &Connection, a: &Attendee) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO attendees ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            ATTENDEE_COLUMNS
        ),
        params![
            a.id,
            a.event_id,
            a.code,
            a.name,
            a.email,
            a.ticket_type,
            a.checked_in,
            a.checked_in_at.map(to_millis),
            to_millis(a.updated_at),
            a.verification_status.as_str(),
        ],
    )?;
    Ok(())
}

fn update_attendee_row(conn: &Connection, a: &Attendee) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE attendees SET
            event_id = ?2, code = ?3, name = ?4, email = ?5, ticket_type = ?6,
            checked_in = ?7, checked_in_at = ?8, updated_at = ?9, verification_status = ?10
         WHERE id = ?1",
        params![
            a.id,
            a.event_id,
            a.code,
            a.name,
            a.email,
            a.ticket_type,
            a.checked_in,
            a.checked_in_at.map(to_millis),
            to_millis(a.updated_at),
            a.verification_status.as_str(),
        ],
    )?;
    Ok(())
}

fn upsert_event_row(conn: &Connection, event: &Event) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO events (id, name, event_date, venue, organizer_id, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            event_date = excluded.event_date,
            venue = excluded.venue,
            organizer_id = excluded.organizer_id,
            updated_at = excluded.updated_at",
        params![
            event.id,
            event.name,
            event.event_date,
            event.venue,
            event.organizer_id,
            event.updated_at.map(to_millis),
        ],
    )?;
    Ok(())
}

fn mark_checked_in_row(
    conn: &Connection,
    code: &str,
    at: DateTime<Utc>,
) -> rusqlite::Result<usize> {
    let at = to_millis(at);
    conn.execute(
        "UPDATE attendees SET checked_in = 1, checked_in_at = ?1, updated_at = ?1
         WHERE code = ?2 AND checked_in = 0",
        params![at, code],
    )
}

fn append_scan_row(
    conn: &Connection,
    code: &str,
    scanner_id: &str,
    at: DateTime<Utc>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO scan_log (code, scanner_id, scanned_at, synced) VALUES (?1, ?2, ?3, 0)",
        params![code, scanner_id, to_millis(at)],
    )?;
    Ok(conn.last_insert_rowid())
}

fn scan_logged_row(conn: &Connection, code: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM scan_log WHERE code = ?1)",
        [code],
        |row| row.get(0),
    )
}

fn first_scan_at_row(conn: &Connection, code: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let first: Option<i64> = conn.query_row(
        "SELECT MIN(scanned_at) FROM scan_log WHERE code = ?1",
        [code],
        |row| row.get(0),
    )?;
    Ok(first.map(from_millis))
}

fn set_verified_row(conn: &Connection, code: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE attendees SET verification_status = ?1 WHERE code = ?2",
        params![VerificationStatus::Verified.as_str(), code],
    )
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
