//! Records shared across the engine
//!
//! Field names serialize in camelCase so documents written by earlier
//! versions of the application (and read back by the migrator) line up with
//! what this crate writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StorageError;
use crate::uid::AttestationUid;

/// Account address as reported by the wallet or the registry
pub type Address = String;

/// Registry string fields are fixed-width 32-byte words, one byte reserved
pub const MAX_FIXED_FIELD_BYTES: usize = 31;

/// Kind of share being pledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitmentType {
    Revenue,
    Token,
}

impl CommitmentType {
    /// Registry encoding (0 = revenue, 1 = token)
    pub fn as_u8(self) -> u8 {
        match self {
            CommitmentType::Revenue => 0,
            CommitmentType::Token => 1,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, StorageError> {
        match value {
            0 => Ok(CommitmentType::Revenue),
            1 => Ok(CommitmentType::Token),
            other => Err(StorageError::InvalidInput(format!(
                "unknown commitment type {}",
                other
            ))),
        }
    }
}

impl fmt::Display for CommitmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitmentType::Revenue => f.write_str("Revenue"),
            CommitmentType::Token => f.write_str("Token"),
        }
    }
}

/// A pledge as registered on the registry contract, plus local enrichment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pledge {
    pub pledgor: Address,
    pub project_name: String,
    pub location: String,
    pub commitment_type: CommitmentType,
    pub percentage: u8,
    pub start_date: DateTime<Utc>,
    #[serde(alias = "ipfsHash")]
    pub content_handle: String,
    #[serde(alias = "timestamp")]
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub additional_info: String,
}

/// Fields a user submits to register a new pledge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PledgeDraft {
    pub project_name: String,
    pub location: String,
    pub commitment_type: CommitmentType,
    pub percentage: u8,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub additional_info: String,
}

impl PledgeDraft {
    /// Reject input the registry would truncate or refuse
    pub fn validate(&self) -> Result<(), StorageError> {
        validate_fixed_field("project name", &self.project_name)?;
        validate_fixed_field("location", &self.location)?;
        if !(1..=100).contains(&self.percentage) {
            return Err(StorageError::InvalidInput(format!(
                "percentage must be between 1 and 100, got {}",
                self.percentage
            )));
        }
        Ok(())
    }
}

fn validate_fixed_field(label: &str, value: &str) -> Result<(), StorageError> {
    if value.trim().is_empty() {
        return Err(StorageError::InvalidInput(format!("{} is required", label)));
    }
    if value.len() > MAX_FIXED_FIELD_BYTES {
        return Err(StorageError::InvalidInput(format!(
            "{} must be at most {} bytes, got {}",
            label,
            MAX_FIXED_FIELD_BYTES,
            value.len()
        )));
    }
    Ok(())
}

/// Storage tier a content payload was resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginTier {
    PrimaryMap,
    LocalPersistent,
    SessionPersistent,
    ProcessMemory,
    KnownSeed,
}

impl fmt::Display for OriginTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OriginTier::PrimaryMap => "primary_map",
            OriginTier::LocalPersistent => "local_persistent",
            OriginTier::SessionPersistent => "session_persistent",
            OriginTier::ProcessMemory => "process_memory",
            OriginTier::KnownSeed => "known_seed",
        };
        f.write_str(label)
    }
}

/// A resolved content payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub handle: String,
    pub payload: serde_json::Value,
    pub retrieved_at: DateTime<Utc>,
    pub origin_tier: OriginTier,
}

/// Local record of an attestation over a pledge's content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationRecord {
    pub uid: AttestationUid,
    pub content_handle: String,
    pub attester: Address,
    pub recipient: Address,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub pledge_snapshot: serde_json::Value,
    /// True when the UID was generated locally rather than by the attestation network
    pub is_local: bool,
}

/// Attestation record with its viewer link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationDetails {
    #[serde(flatten)]
    pub record: AttestationRecord,
    pub link: String,
}

/// View model handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedPledge {
    #[serde(flatten)]
    pub pledge: Pledge,
    pub attestation_uid: Option<AttestationUid>,
    pub attestation_link: Option<String>,
}

impl EnrichedPledge {
    /// The pledge as-is, with no attestation attached
    pub fn unenriched(pledge: Pledge) -> Self {
        Self {
            pledge,
            attestation_uid: None,
            attestation_link: None,
        }
    }
}
