//! Seam to the authoritative remote ticket system.
//!
//! The engine and the reconciler only see [`RemoteTicketStore`]; the
//! Supabase/PostgREST adapter is the production implementation.

#[cfg(test)]
pub(crate) mod mock;
mod supabase;

pub use supabase::SupabaseClient;

use crate::database::{Attendee, Event};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors returned by a remote ticket store
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Network failure or timeout; callers fall back to local state.
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Remote returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid remote response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// True when the remote could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result type for remote operations
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Authoritative attendee records, remote check-in flag, and scan audit log.
#[async_trait]
pub trait RemoteTicketStore: Send + Sync {
    /// All attendees of an event, with the event row embedded when available.
    async fn fetch_attendees(&self, event_id: &str) -> Result<Vec<Attendee>>;

    async fn fetch_attendee_by_code(&self, code: &str) -> Result<Option<Attendee>>;

    async fn fetch_event(&self, event_id: &str) -> Result<Option<Event>>;

    /// Record one admission. Must be idempotent for the same
    /// `(code, scanner_id, at)` since pushes are retried.
    async fn record_scan(&self, code: &str, scanner_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Flag a ticket as checked in. A ticket already checked in keeps its
    /// original timestamp.
    async fn set_checked_in(&self, code: &str, at: DateTime<Utc>) -> Result<()>;
}
