//! Attestation Ledger
//!
//! Local record of attestations over pledge content, whether anchored on the
//! attestation network or generated locally. Records live in one JSON
//! document (`revow_attestations`, uid -> record) and are written with a
//! compare-and-swap update, so the "one record per content handle" check and
//! the insert happen atomically even with several writers.
//!
//! Earlier versions wrote `{uid, ipfsHash, pledgeData, timestamp}` records to
//! the same table. Those are read through the legacy field names until
//! [`AttestationLedger::upgrade_legacy_records`] rewrites them.

use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::StorageError;
use crate::keys;
use crate::kv::{json_kind, read_json_object, update_json_object, KeyValueStore};
use crate::migration::record_from_object;
use crate::models::{AttestationDetails, AttestationRecord, Pledge};
use crate::uid::AttestationUid;

/// Attester recorded when the source did not say
pub const UNKNOWN_PARTY: &str = "unknown";

/// Outcome of a guarded insert
enum Insert {
    Inserted,
    HandleTaken(AttestationRecord),
    UidTaken,
}

pub struct AttestationLedger {
    store: Arc<dyn KeyValueStore>,
    config: Arc<Config>,
}

impl AttestationLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    /// Create a local attestation for the pledge's content, or return the
    /// record that already exists for it (first writer wins).
    pub fn create(
        &self,
        pledge: &Pledge,
        attester: &str,
        recipient: &str,
    ) -> Result<AttestationRecord, StorageError> {
        let record = new_record(pledge, attester, recipient, AttestationUid::random(), true)?;
        self.insert_first(record)
    }

    /// Record an attestation the network issued under `uid`
    pub fn record_anchored(
        &self,
        pledge: &Pledge,
        attester: &str,
        recipient: &str,
        uid: AttestationUid,
    ) -> Result<AttestationRecord, StorageError> {
        let record = new_record(pledge, attester, recipient, uid, false)?;
        self.insert_first(record)
    }

    /// Add a record found elsewhere (legacy storage, the network) unless its
    /// handle or UID is already known. Returns whether it was added.
    pub fn adopt(&self, record: AttestationRecord) -> Result<bool, StorageError> {
        let uid = record.uid.clone();
        match self.guarded_insert(record)? {
            Insert::Inserted => {
                debug!(uid = %uid, "Adopted attestation");
                Ok(true)
            }
            Insert::HandleTaken(_) | Insert::UidTaken => Ok(false),
        }
    }

    /// Record over `handle`, if any (linear scan)
    pub fn find_by_handle(&self, handle: &str) -> Result<Option<AttestationRecord>, StorageError> {
        let handle = handle.trim();
        if handle.is_empty() {
            return Err(StorageError::InvalidInput("content handle is empty".into()));
        }
        let table = self.table()?;
        Ok(find_handle_in(&table, handle))
    }

    /// Record with `uid`, in any accepted spelling
    pub fn find_by_uid(&self, uid: &str) -> Result<Option<AttestationRecord>, StorageError> {
        let uid = AttestationUid::parse(uid)?;
        let table = self.table()?;
        Ok(table
            .get(uid.as_str())
            .and_then(|value| parse_record(uid.as_str(), value)))
    }

    /// Viewer URL for `uid`
    pub fn link(&self, uid: &AttestationUid) -> String {
        self.config.explorer_link(uid.as_str())
    }

    /// Record and link for `uid`
    pub fn details(&self, uid: &str) -> Result<AttestationDetails, StorageError> {
        let record = self
            .find_by_uid(uid)?
            .ok_or_else(|| StorageError::NotFound(format!("attestation {}", uid.trim())))?;
        let link = self.link(&record.uid);
        Ok(AttestationDetails { record, link })
    }

    /// Every readable record, newest first
    pub fn all(&self) -> Result<Vec<AttestationRecord>, StorageError> {
        let table = self.table()?;
        let mut records: Vec<AttestationRecord> = table
            .iter()
            .filter_map(|(key, value)| parse_record(key, value))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Rewrite records stored in an older shape into the current one, keeping
    /// every field they already had. Returns how many were rewritten.
    pub fn upgrade_legacy_records(&self) -> Result<usize, StorageError> {
        update_json_object(self.store.as_ref(), keys::ATTESTATIONS, |table| {
            let stale: Vec<(String, AttestationRecord)> = table
                .iter()
                .filter(|(_, value)| read_current(value).is_err())
                .filter_map(|(key, value)| match value {
                    Value::Object(object) => record_from_object(object, Some(key), false)
                        .ok()
                        .map(|record| (key.clone(), record)),
                    _ => None,
                })
                .collect();

            for (key, record) in &stale {
                let Some(Value::Object(mut object)) = table.remove(key) else {
                    continue;
                };
                if let Value::Object(current) = serde_json::to_value(record)? {
                    object.extend(current);
                }
                // Re-key under the normalized UID unless that slot is taken
                let slot = if table.contains_key(record.uid.as_str()) {
                    key.clone()
                } else {
                    record.uid.to_string()
                };
                debug!(uid = %record.uid, handle = %record.content_handle, "Upgraded attestation record");
                table.insert(slot, Value::Object(object));
            }
            Ok(stale.len())
        })
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.table()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    // ------------------------------------------------------------------------

    fn table(&self) -> Result<Map<String, Value>, StorageError> {
        read_json_object(self.store.as_ref(), keys::ATTESTATIONS)
    }

    fn insert_first(&self, record: AttestationRecord) -> Result<AttestationRecord, StorageError> {
        match self.guarded_insert(record.clone())? {
            Insert::Inserted => {
                info!(
                    uid = %record.uid,
                    handle = %record.content_handle,
                    local = record.is_local,
                    "Recorded attestation"
                );
                Ok(record)
            }
            Insert::HandleTaken(existing) => {
                debug!(uid = %existing.uid, handle = %existing.content_handle, "Attestation already exists");
                Ok(existing)
            }
            Insert::UidTaken => Err(StorageError::Internal(format!(
                "attestation UID {} already used for another handle",
                record.uid
            ))),
        }
    }

    fn guarded_insert(&self, record: AttestationRecord) -> Result<Insert, StorageError> {
        let value = serde_json::to_value(&record)?;
        update_json_object(self.store.as_ref(), keys::ATTESTATIONS, |table| {
            if let Some(existing) = find_handle_in(table, &record.content_handle) {
                return Ok(Insert::HandleTaken(existing));
            }
            if table.contains_key(record.uid.as_str()) {
                return Ok(Insert::UidTaken);
            }
            table.insert(record.uid.to_string(), value.clone());
            Ok(Insert::Inserted)
        })
    }
}

fn new_record(
    pledge: &Pledge,
    attester: &str,
    recipient: &str,
    uid: AttestationUid,
    is_local: bool,
) -> Result<AttestationRecord, StorageError> {
    let handle = pledge.content_handle.trim();
    if handle.is_empty() {
        return Err(StorageError::InvalidInput(
            "pledge has no content handle".into(),
        ));
    }
    let attester = party_or_unknown(attester);
    let recipient = match recipient.trim() {
        "" => attester.clone(),
        r => r.to_string(),
    };

    Ok(AttestationRecord {
        uid,
        content_handle: handle.to_string(),
        attester,
        recipient,
        created_at: Utc::now(),
        pledge_snapshot: serde_json::to_value(pledge)?,
        is_local,
    })
}

/// Attester or recipient as stored; blank becomes [`UNKNOWN_PARTY`]
pub fn party_or_unknown(party: &str) -> String {
    match party.trim() {
        "" => UNKNOWN_PARTY.to_string(),
        p => p.to_string(),
    }
}

fn read_current(value: &Value) -> Result<AttestationRecord, serde_json::Error> {
    serde_json::from_value::<AttestationRecord>(value.clone())
}

/// Current shape first, then the field names earlier versions used
fn parse_record(key: &str, value: &Value) -> Option<AttestationRecord> {
    let error = match read_current(value) {
        Ok(record) => return Some(record),
        Err(e) => e,
    };
    let Value::Object(object) = value else {
        warn!(key = %key, kind = json_kind(value), "Skipping malformed attestation record");
        return None;
    };
    match record_from_object(object, Some(key), false) {
        Ok(record) => Some(record),
        Err(reason) => {
            warn!(key = %key, error = %error, reason = %reason, "Skipping malformed attestation record");
            None
        }
    }
}

fn find_handle_in(table: &Map<String, Value>, handle: &str) -> Option<AttestationRecord> {
    table
        .iter()
        .filter_map(|(key, value)| parse_record(key, value))
        .find(|record| record.content_handle == handle)
}
