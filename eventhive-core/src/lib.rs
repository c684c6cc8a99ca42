//! EventHive Check-In Core Library
//!
//! Offline-first ticket verification for event entry scanners. This crate
//! provides the local ticket store, HMAC signature verification, the
//! per-scan verification engine, and the background reconciler that keeps
//! the local store and the remote ticket system converging.

pub mod config;
pub mod crypto;
pub mod database;
pub mod frame;
pub mod platform;
pub mod remote;
pub mod scanner;
pub mod sync;
pub mod verify;

pub use config::{RemoteConfig, ScannerConfig};
pub use crypto::{sign, sign_ticket, verify as verify_signature, CryptoError, HmacSecret};
pub use database::{
    Attendee, Database, Event, ScanLogEntry, StoreStats, TicketStore, UpsertReport,
    VerificationStatus,
};
pub use frame::{FrameSource, LineFrameSource};
pub use platform::{
    ensure_data_dir, get_data_dir, get_default_config_path, get_default_database_path,
};
pub use remote::{RemoteError, RemoteTicketStore, SupabaseClient};
pub use scanner::{run_scanner, ScanSummary};
pub use sync::{PullReport, PushReport, SyncReconciler, SyncSettings};
pub use verify::{Payload, Reason, Verdict, VerdictStatus, VerificationEngine};

use thiserror::Error;

/// Result type for check-in operations
pub type Result<T> = std::result::Result<T, CheckinError>;

/// Local persistence failures.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("{0}")]
    Other(String),
}

/// General error type for check-in operations
#[derive(Error, Debug)]
pub enum CheckinError {
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Remote error: {0}")]
    Remote(#[from] remote::RemoteError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for CheckinError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(DatabaseError::Sqlite(e))
    }
}
