//! Background reconciliation between the local store and the remote ticket system.
//!
//! - Push: deliver unsynced scan log entries, oldest first
//! - Pull: refresh the active event's attendees with last-write-wins merging
//! - Sync metadata (active event, last push/pull times) lives in the local database

pub mod conflict;
pub mod metadata;
pub mod reconciler;

pub use conflict::{ConflictResolver, Resolution};
pub use metadata::SyncMetadata;
pub use reconciler::{PullReport, PushReport, SyncReconciler, SyncSettings};
