//! Zeroizing storage for the shared HMAC secret.

use serde::{Deserialize, Deserializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Shared secret used to sign and verify ticket payloads.
///
/// The bytes are cleared when the value is dropped, and the secret never
/// appears in `Debug` output.
#[derive(Clone, Default, ZeroizeOnDrop)]
pub struct HmacSecret {
    bytes: Vec<u8>,
}

impl HmacSecret {
    /// Create a secret from raw bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Check if no secret has been configured
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Get the secret bytes (use carefully!)
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Replace the secret, clearing the old bytes first
    pub fn replace(&mut self, bytes: Vec<u8>) {
        self.bytes.zeroize();
        self.bytes = bytes;
    }
}

impl From<&str> for HmacSecret {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }
}

impl From<String> for HmacSecret {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

impl fmt::Debug for HmacSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HmacSecret([REDACTED; {}])", self.bytes.len())
    }
}

impl<'de> Deserialize<'de> for HmacSecret {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ok(Self::from(s))
    }
}
