//! Local persistence for the scanner.
//!
//! This module handles schema management, the attendee cache, and the
//! append-only scan log that the reconciler drains to the remote store.

pub mod models;
pub mod schema;
pub mod store;

pub use models::{
    Attendee, Event, ScanLogEntry, StoreStats, UpsertReport, VerificationStatus,
};
pub use schema::Database;
pub use store::TicketStore;
