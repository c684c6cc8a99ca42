//! Scan payload parsing.

use crate::crypto;
use serde::Deserialize;
use tracing::debug;

/// A decoded scan, classified once at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// `{"ticket_id", "event_id", "signature"}`, signed over `ticket_id|event_id`.
    Signed {
        ticket_id: String,
        event_id: String,
        signature: String,
    },
    /// `{"qr_code", "signature"}`, signed over the code itself.
    SignedCode { code: String, signature: String },
    /// Anything else, used verbatim (trimmed) as the ticket code.
    Bare { code: String },
}

/// Result of checking a payload's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureCheck {
    Unsigned,
    Valid,
    Invalid,
    /// The payload cannot be signed unambiguously.
    Malformed(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WirePayload {
    Ticket {
        ticket_id: String,
        event_id: String,
        signature: String,
    },
    Code {
        qr_code: String,
        signature: String,
    },
}

impl Payload {
    /// Classify a raw scan. Never fails: unparseable input is a bare code.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            match serde_json::from_str::<WirePayload>(trimmed) {
                Ok(WirePayload::Ticket {
                    ticket_id,
                    event_id,
                    signature,
                }) => {
                    return Self::Signed {
                        ticket_id,
                        event_id,
                        signature,
                    }
                }
                Ok(WirePayload::Code { qr_code, signature }) => {
                    return Self::SignedCode {
                        code: qr_code,
                        signature,
                    }
                }
                Err(e) => debug!("Not a structured payload ({}), using raw code", e),
            }
        }
        Self::Bare {
            code: trimmed.to_string(),
        }
    }

    /// The ticket code used for store lookups
    pub fn code(&self) -> &str {
        match self {
            Self::Signed { ticket_id, .. } => ticket_id,
            Self::SignedCode { code, .. } | Self::Bare { code } => code,
        }
    }

    /// Check the carried signature against `secret`.
    ///
    /// With no secret configured every signed payload is invalid.
    pub fn signature_check(&self, secret: &[u8]) -> SignatureCheck {
        let (message, signature) = match self {
            Self::Bare { .. } => return SignatureCheck::Unsigned,
            Self::SignedCode { code, signature } => (code.clone(), signature),
            Self::Signed {
                ticket_id,
                event_id,
                signature,
            } => match crypto::ticket_message(ticket_id, event_id) {
                Ok(message) => (message, signature),
                Err(e) => return SignatureCheck::Malformed(e.to_string()),
            },
        };

        if secret.is_empty() || !crypto::verify(&message, signature, secret) {
            SignatureCheck::Invalid
        } else {
            SignatureCheck::Valid
        }
    }
}
