//! Cryptographic primitives for ticket authentication.
//!
//! This module provides:
//! - HMAC-SHA256 signing of ticket payloads
//! - Constant-time signature verification
//! - A zeroizing holder for the shared signing secret

pub mod secret;
pub mod signature;

pub use secret::HmacSecret;
pub use signature::{sign, sign_ticket, ticket_message, verify};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid HMAC key: {0}")]
    InvalidKey(String),

    #[error("Field {field} contains the reserved separator '|': {value}")]
    AmbiguousField { field: &'static str, value: String },
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
