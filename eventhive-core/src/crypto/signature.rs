//! HMAC-SHA256 ticket signatures.
//!
//! Signed payloads carry a lowercase hex digest of `HMAC-SHA256(secret, message)`.
//! For `{ticket_id, event_id}` payloads the message is `"{ticket_id}|{event_id}"`;
//! for `{qr_code}` payloads the message is the code itself.

use super::{CryptoError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Separator joining ticket and event identifiers in the signed message.
pub const FIELD_SEPARATOR: char = '|';

/// Sign a message, returning the lowercase hex digest.
pub fn sign(message: &str, secret: &[u8]) -> Result<String> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex signature against a message.
///
/// The comparison runs in constant time with respect to the signature
/// contents. Any signing failure verifies as `false`.
pub fn verify(message: &str, signature: &str, secret: &[u8]) -> bool {
    let expected = match sign(message, secret) {
        Ok(sig) => sig,
        Err(e) => {
            tracing::error!("Signature verification error: {}", e);
            return false;
        }
    };
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

/// Build the canonical signed message for a ticket payload.
///
/// Identifiers containing the separator are refused: `"a|b" + "c"` and
/// `"a" + "b|c"` would otherwise produce the same message.
pub fn ticket_message(ticket_id: &str, event_id: &str) -> Result<String> {
    if ticket_id.contains(FIELD_SEPARATOR) {
        return Err(CryptoError::AmbiguousField {
            field: "ticket_id",
            value: ticket_id.to_string(),
        });
    }
    if event_id.contains(FIELD_SEPARATOR) {
        return Err(CryptoError::AmbiguousField {
            field: "event_id",
            value: event_id.to_string(),
        });
    }
    Ok(format!("{}{}{}", ticket_id, FIELD_SEPARATOR, event_id))
}

/// Sign a `{ticket_id, event_id}` payload.
pub fn sign_ticket(ticket_id: &str, event_id: &str, secret: &[u8]) -> Result<String> {
    sign(&ticket_message(ticket_id, event_id)?, secret)
}
