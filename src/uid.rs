//! Attestation UID normalization
//!
//! UIDs reach us as transaction hashes, network-generated hashes, locally
//! generated random values and whatever earlier storage schemes wrote down
//! (`0X`-prefixed, unprefixed, mixed case, padded with whitespace).
//! [`AttestationUid::parse`] is the only place that turns such a string into
//! the canonical form, and serde goes through it, so every value read from or
//! written to storage is canonical.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StorageError;

/// Canonical attestation identifier: `0x` followed by lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AttestationUid(String);

impl AttestationUid {
    /// Normalize any accepted spelling of a UID.
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if body.is_empty() {
            return Err(StorageError::InvalidInput(format!(
                "attestation UID is empty: {:?}",
                raw
            )));
        }
        if !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidInput(format!(
                "attestation UID is not hex: {:?}",
                raw
            )));
        }

        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }

    /// Fresh random 256-bit UID
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttestationUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AttestationUid {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AttestationUid {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AttestationUid> for String {
    fn from(uid: AttestationUid) -> Self {
        uid.0
    }
}

impl AsRef<str> for AttestationUid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
