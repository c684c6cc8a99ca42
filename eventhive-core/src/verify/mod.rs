//! Per-scan ticket verification.
//!
//! A raw scan goes through the cooldown gate, payload parsing, signature
//! check, remote lookup and local commit, and always ends in a [`Verdict`].

mod cooldown;
mod engine;
mod payload;

pub use cooldown::CooldownGate;
pub use engine::VerificationEngine;
pub use payload::{Payload, SignatureCheck};

use crate::database::Attendee;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Terminal state of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    Accepted,
    Rejected,
}

/// Why a scan ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// Listed ticket admitted and recorded.
    CheckedIn,
    /// Correctly signed ticket admitted without a local or remote record.
    SignatureOnly,
    Cooldown,
    InvalidSignature,
    Duplicate,
    NotFound,
    /// Identifiers that cannot be signed unambiguously.
    MalformedPayload,
    StorageError,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckedIn => "checked_in",
            Self::SignatureOnly => "signature_only",
            Self::Cooldown => "cooldown",
            Self::InvalidSignature => "invalid_signature",
            Self::Duplicate => "duplicate",
            Self::NotFound => "not_found",
            Self::MalformedPayload => "malformed_payload",
            Self::StorageError => "storage_error",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured outcome of a scan. Never an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub reason: Reason,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendee: Option<Attendee>,
    /// Admission time: the new check-in, or the earlier one for duplicates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_in_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Verdict {
    pub fn accepted(reason: Reason, code: impl Into<String>) -> Self {
        Self::new(VerdictStatus::Accepted, reason, code.into())
    }

    pub fn rejected(reason: Reason, code: impl Into<String>) -> Self {
        Self::new(VerdictStatus::Rejected, reason, code.into())
    }

    fn new(status: VerdictStatus, reason: Reason, code: String) -> Self {
        Self {
            status,
            reason,
            code,
            attendee: None,
            checked_in_at: None,
            detail: None,
        }
    }

    pub fn with_attendee(mut self, attendee: Option<Attendee>) -> Self {
        self.attendee = attendee;
        self
    }

    pub fn with_checked_in_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.checked_in_at = at;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_accepted(&self) -> bool {
        self.status == VerdictStatus::Accepted
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            VerdictStatus::Accepted => "ACCEPTED",
            VerdictStatus::Rejected => "REJECTED",
        };
        write!(f, "{}/{} {}", status, self.reason, self.code)?;
        if let Some(attendee) = &self.attendee {
            if !attendee.name.is_empty() {
                write!(f, " ({})", attendee.name)?;
            }
        }
        if let Some(at) = self.checked_in_at {
            write!(f, " at {}", at.to_rfc3339())?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}
