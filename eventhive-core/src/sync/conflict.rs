//! Last-Write-Wins resolution for attendee rows pulled from the remote store.

use crate::database::Attendee;

/// Conflict resolution outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Overwrite the local row with the incoming one.
    AcceptRemote,
    /// Keep the local row (local is newer or equal).
    KeepLocal,
}

pub struct ConflictResolver;

impl ConflictResolver {
    /// Resolve a conflict between the local and an incoming version of one attendee.
    ///
    /// Rules:
    /// 1. An incoming check-in always replaces a local row that is not checked in.
    ///    Admission is never lost because of clock skew between scanners.
    /// 2. Otherwise the strictly newer `updated_at` wins.
    /// 3. Equal timestamps keep local, so a stale pull cannot un-check an
    ///    attendee whose local check-in has not been pushed yet.
    pub fn resolve(local: &Attendee, incoming: &Attendee) -> Resolution {
        if incoming.checked_in && !local.checked_in {
            return Resolution::AcceptRemote;
        }
        if incoming.updated_at > local.updated_at {
            Resolution::AcceptRemote
        } else {
            Resolution::KeepLocal
        }
    }
}
