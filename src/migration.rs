//! Legacy schema migration
//!
//! Earlier versions of the application scattered attestation mappings over a
//! handful of keys in three shapes. [`LegacyMigrator::migrate`] reads each
//! key, classifies it as a [`LegacyEntry`] and adopts every entry the ledger
//! does not know yet. Nothing is ever overwritten or deleted, so running it
//! again is harmless.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::content_store::ContentAddressableStore;
use crate::error::StorageError;
use crate::keys;
use crate::kv::{json_kind, KeyValueStore};
use crate::ledger::{party_or_unknown, AttestationLedger};
use crate::models::AttestationRecord;
use crate::uid::AttestationUid;

/// Summary of one migration sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// Entries examined across all legacy keys
    pub scanned: usize,
    /// Entries added to the current schema
    pub merged: usize,
    /// Ledger records rewritten from an older shape in place
    #[serde(default)]
    pub upgraded: usize,
    /// Keys or entries that could not be parsed
    pub malformed: usize,
    /// Legacy keys present in the store
    pub keys_found: Vec<String>,
}

/// Shape of a legacy attestation key, decided once at parse time
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyEntry {
    /// `{ handle: uid }`
    FlatMap(Map<String, Value>),
    /// `[{ uid, ipfsHash, pledgeData, timestamp, ... }]`
    RichList(Vec<Value>),
    /// `{ uid: { uid, ipfsHash, attester, recipient, time, data, createdAt } }`.
    /// Plain `handle: uid` entries mixed in are read like a [`LegacyEntry::FlatMap`].
    KeyedRecords(Map<String, Value>),
}

impl LegacyEntry {
    pub fn parse(key: &str, raw: &str) -> Result<Self, StorageError> {
        let value: Value = serde_json::from_str(raw).map_err(|e| StorageError::malformed(key, e))?;
        match value {
            Value::Array(items) => Ok(LegacyEntry::RichList(items)),
            Value::Object(map) if map.values().any(Value::is_object) => {
                Ok(LegacyEntry::KeyedRecords(map))
            }
            Value::Object(map) => Ok(LegacyEntry::FlatMap(map)),
            other => Err(StorageError::malformed(
                key,
                format!("expected an object or array, found {}", json_kind(&other)),
            )),
        }
    }

    fn len(&self) -> usize {
        match self {
            LegacyEntry::FlatMap(map) | LegacyEntry::KeyedRecords(map) => map.len(),
            LegacyEntry::RichList(items) => items.len(),
        }
    }

    /// Records this entry describes, one result per item. `default_local`
    /// applies to items that do not carry an `isLocal` flag.
    fn records(self, default_local: bool) -> Vec<Result<AttestationRecord, String>> {
        match self {
            LegacyEntry::FlatMap(map) | LegacyEntry::KeyedRecords(map) => map
                .iter()
                .map(|(key, item)| keyed_record(key, item, default_local))
                .collect(),
            LegacyEntry::RichList(items) => items
                .iter()
                .map(|item| match item {
                    Value::Object(object) => record_from_object(object, None, default_local),
                    other => Err(format!("list item is {}", json_kind(other))),
                })
                .collect(),
        }
    }
}

pub struct LegacyMigrator {
    store: Arc<dyn KeyValueStore>,
    ledger: Arc<AttestationLedger>,
    content: Arc<ContentAddressableStore>,
}

impl LegacyMigrator {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        ledger: Arc<AttestationLedger>,
        content: Arc<ContentAddressableStore>,
    ) -> Self {
        Self {
            store,
            ledger,
            content,
        }
    }

    /// Fold every legacy key into the current schema
    pub fn migrate(&self) -> Result<MigrationReport, StorageError> {
        let mut report = MigrationReport::default();

        match self.ledger.upgrade_legacy_records() {
            Ok(upgraded) => report.upgraded = upgraded,
            Err(e @ StorageError::MalformedRecord { .. }) => {
                warn!(error = %e, "Skipping unreadable attestation table");
                report.malformed += 1;
            }
            Err(e) => return Err(e),
        }

        for key in keys::LEGACY_ATTESTATION_KEYS {
            let Some(raw) = self.read_key(key, &mut report) else {
                continue;
            };
            let entry = match LegacyEntry::parse(key, &raw) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping malformed legacy key");
                    report.malformed += 1;
                    continue;
                }
            };

            debug!(key = %key, entries = entry.len(), "Scanning legacy attestations");
            let default_local = *key == keys::LEGACY_LOCAL_ATTESTATIONS;
            for candidate in entry.records(default_local) {
                report.scanned += 1;
                match candidate {
                    Ok(record) => {
                        if self.ledger.adopt(record)? {
                            report.merged += 1;
                        }
                    }
                    Err(reason) => {
                        warn!(key = %key, reason = %reason, "Skipping malformed legacy attestation");
                        report.malformed += 1;
                    }
                }
            }
        }

        for key in keys::LEGACY_CONTENT_KEYS {
            let Some(raw) = self.read_key(key, &mut report) else {
                continue;
            };
            self.merge_content(key, &raw, &mut report)?;
        }

        if report.merged > 0 || report.upgraded > 0 || report.malformed > 0 {
            info!(
                scanned = report.scanned,
                merged = report.merged,
                upgraded = report.upgraded,
                malformed = report.malformed,
                "Legacy migration finished"
            );
        } else {
            debug!(scanned = report.scanned, "Legacy migration found nothing new");
        }
        Ok(report)
    }

    fn read_key(&self, key: &str, report: &mut MigrationReport) -> Option<String> {
        match self.store.get(key) {
            Ok(Some(raw)) => {
                report.keys_found.push(key.to_string());
                Some(raw)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read legacy key");
                report.malformed += 1;
                None
            }
        }
    }

    fn merge_content(
        &self,
        key: &str,
        raw: &str,
        report: &mut MigrationReport,
    ) -> Result<(), StorageError> {
        let map = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                warn!(key = %key, kind = json_kind(&other), "Skipping malformed legacy content key");
                report.malformed += 1;
                return Ok(());
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping malformed legacy content key");
                report.malformed += 1;
                return Ok(());
            }
        };

        let source = format!("legacy:{}", key);
        for (handle, payload) in map {
            report.scanned += 1;
            let payload = match payload {
                // Some versions stored the payload as JSON text; anything
                // else is a plain string payload
                Value::String(text) => {
                    serde_json::from_str(&text).unwrap_or(Value::String(text))
                }
                payload => payload,
            };
            if self.content.merge_primary(&handle, payload, &source)? {
                report.merged += 1;
            }
        }
        Ok(())
    }
}

/// `handle: uid` or `uid: record`, decided by the value
fn keyed_record(
    key: &str,
    item: &Value,
    default_local: bool,
) -> Result<AttestationRecord, String> {
    match item {
        Value::String(uid) => {
            legacy_record(key, uid, None, None, Utc::now(), Value::Null, default_local)
        }
        Value::Object(object) => record_from_object(object, Some(key), default_local),
        other => Err(format!("entry {} is {}", key, json_kind(other))),
    }
}

/// Record from any object shape earlier versions wrote, the UID falling
/// back to `key_uid` when the object has none
pub(crate) fn record_from_object(
    object: &Map<String, Value>,
    key_uid: Option<&str>,
    default_local: bool,
) -> Result<AttestationRecord, String> {
    let uid = first_str(object, &["uid", "attestationUID", "attestationUid"])
        .or(key_uid)
        .ok_or("missing uid")?;
    let handle =
        first_str(object, &["ipfsHash", "contentHandle", "handle"]).ok_or("missing content handle")?;
    let created_at = ["createdAt", "timestamp", "time"]
        .iter()
        .find_map(|field| object.get(*field).and_then(parse_time))
        .unwrap_or_else(Utc::now);
    let snapshot = ["pledgeData", "data"]
        .iter()
        .find_map(|field| object.get(*field).cloned())
        .unwrap_or(Value::Null);
    let is_local = object
        .get("isLocal")
        .and_then(Value::as_bool)
        .unwrap_or(default_local);

    legacy_record(
        handle,
        uid,
        first_str(object, &["attester"]),
        first_str(object, &["recipient"]),
        created_at,
        snapshot,
        is_local,
    )
}

fn legacy_record(
    handle: &str,
    uid: &str,
    attester: Option<&str>,
    recipient: Option<&str>,
    created_at: DateTime<Utc>,
    pledge_snapshot: Value,
    is_local: bool,
) -> Result<AttestationRecord, String> {
    let handle = handle.trim();
    if handle.is_empty() {
        return Err("empty content handle".to_string());
    }
    let uid = AttestationUid::parse(uid).map_err(|e| e.to_string())?;
    let attester = party_or_unknown(attester.unwrap_or_default());
    let recipient = match recipient.map(str::trim) {
        Some(r) if !r.is_empty() => r.to_string(),
        _ => attester.clone(),
    };

    Ok(AttestationRecord {
        uid,
        content_handle: handle.to_string(),
        attester,
        recipient,
        created_at,
        pledge_snapshot,
        is_local,
    })
}

fn first_str<'a>(object: &'a Map<String, Value>, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .find_map(|field| object.get(*field).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

/// RFC 3339 text, or a number of seconds / milliseconds since the epoch
fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => {
            let n = n.as_i64()?;
            // Anything below 10^11 reads as seconds
            if n < 100_000_000_000 {
                DateTime::from_timestamp(n, 0)
            } else {
                DateTime::from_timestamp_millis(n)
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::kv::MemoryStore;
    use serde_json::json;

    struct Fixture {
        durable: Arc<dyn KeyValueStore>,
        ledger: Arc<AttestationLedger>,
        content: Arc<ContentAddressableStore>,
        migrator: LegacyMigrator,
    }

    fn fixture() -> Fixture {
        let durable: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new("durable"));
        let ledger = Arc::new(AttestationLedger::new(
            durable.clone(),
            Arc::new(Config::default()),
        ));
        let content = Arc::new(ContentAddressableStore::open(
            durable.clone(),
            Arc::new(MemoryStore::new("session")),
        ));
        let migrator = LegacyMigrator::new(durable.clone(), ledger.clone(), content.clone());
        Fixture {
            durable,
            ledger,
            content,
            migrator,
        }
    }

    #[test]
    fn test_flat_map_is_migrated() {
        let f = fixture();
        f.durable
            .set("pledgeEasMap", r#"{"bafyXYZ": "0xdeadbeef"}"#)
            .unwrap();

        let report = f.migrator.migrate().unwrap();
        assert_eq!(report.merged, 1);
        assert_eq!(report.keys_found, vec!["pledgeEasMap".to_string()]);

        let record = f.ledger.find_by_handle("bafyXYZ").unwrap().unwrap();
        assert_eq!(record.uid.as_str(), "0xdeadbeef");
        assert_eq!(record.attester, "unknown");
    }

    #[test]
    fn test_migrate_twice_is_idempotent() {
        let f = fixture();
        f.durable
            .set("easAttestations", r#"{"bafyA": "0xAA", "bafyB": "0XBB"}"#)
            .unwrap();
        f.durable
            .set(
                "revow_ipfs_data",
                r#"{"bafyC": {"description": "old"}}"#,
            )
            .unwrap();

        let first = f.migrator.migrate().unwrap();
        let ledger_after_first = f.ledger.all().unwrap();
        let table_after_first = f.durable.get(keys::ATTESTATIONS).unwrap();
        let handles_after_first = f.content.handles();

        let second = f.migrator.migrate().unwrap();
        assert_eq!(first.merged, 3);
        assert_eq!(second.merged, 0);
        assert_eq!(first.scanned, second.scanned);
        assert_eq!(f.ledger.all().unwrap(), ledger_after_first);
        assert_eq!(f.durable.get(keys::ATTESTATIONS).unwrap(), table_after_first);
        assert_eq!(f.content.handles(), handles_after_first);
    }

    #[test]
    fn test_rich_list() {
        let f = fixture();
        let list = json!([
            {
                "uid": "0x0A",
                "ipfsHash": "bafyR1",
                "pledgeData": {"projectName": "P"},
                "timestamp": 1_700_000_000_000_i64
            },
            {"uid": "0x0B", "contentHandle": "bafyR2", "timestamp": "2024-01-02T03:04:05Z"},
            {"uid": "0x0C"},
            "garbage"
        ]);
        f.durable
            .set("pledgeAttestations", &list.to_string())
            .unwrap();

        let report = f.migrator.migrate().unwrap();
        assert_eq!(report.scanned, 4);
        assert_eq!(report.merged, 2);
        assert_eq!(report.malformed, 2);

        let r1 = f.ledger.find_by_handle("bafyR1").unwrap().unwrap();
        assert_eq!(r1.uid.as_str(), "0x0a");
        assert_eq!(r1.pledge_snapshot["projectName"], "P");
        assert_eq!(r1.created_at.timestamp_millis(), 1_700_000_000_000);

        let r2 = f.ledger.find_by_handle("bafyR2").unwrap().unwrap();
        assert_eq!(r2.created_at.to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }

    #[test]
    fn test_keyed_records_keep_attester() {
        let f = fixture();
        let records = json!({
            "0xabc1": {
                "uid": "0xABC1",
                "ipfsHash": "bafyK1",
                "attester": "0xAttester",
                "recipient": "0xRecipient",
                "time": 1_700_000_000,
                "data": {"projectName": "K"},
                "isLocal": true
            }
        });
        f.durable
            .set("revow_local_attestations", &records.to_string())
            .unwrap();

        f.migrator.migrate().unwrap();
        let record = f.ledger.find_by_uid("0xabc1").unwrap().unwrap();
        assert_eq!(record.attester, "0xAttester");
        assert_eq!(record.recipient, "0xRecipient");
        assert!(record.is_local);
        assert_eq!(record.created_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_malformed_keys_do_not_abort() {
        let f = fixture();
        f.durable.set("easData", "{not json").unwrap();
        f.durable.set("allAttestations", "42").unwrap();
        f.durable
            .set("attestations", r#"{"bafyOK": "0x01", "bafyBad": 7, "bafyNotHex": "zz"}"#)
            .unwrap();

        let report = f.migrator.migrate().unwrap();
        assert_eq!(report.malformed, 4);
        assert_eq!(report.merged, 1);
        assert!(f.ledger.find_by_handle("bafyOK").unwrap().is_some());
    }

    #[test]
    fn test_existing_records_are_not_overwritten() {
        let f = fixture();
        f.durable
            .set(
                keys::PRIMARY_MAP,
                r#"{"bafyC": {"data": {"description": "current"}, "timestamp": 1, "source": "direct_mapping"}}"#,
            )
            .unwrap();
        let content = ContentAddressableStore::open(
            f.durable.clone(),
            Arc::new(MemoryStore::new("session")),
        );
        let migrator = LegacyMigrator::new(f.durable.clone(), f.ledger.clone(), Arc::new(content));
        f.durable
            .set("ipfsMapping", r#"{"bafyC": {"description": "legacy"}}"#)
            .unwrap();

        let report = migrator.migrate().unwrap();
        assert_eq!(report.merged, 0);
        let document = crate::kv::read_json_object(f.durable.as_ref(), keys::PRIMARY_MAP).unwrap();
        assert_eq!(document["bafyC"]["data"]["description"], "current");
    }

    #[test]
    fn test_mixed_object_is_read_per_entry() {
        let f = fixture();
        f.durable
            .set(
                "easAttestations",
                r#"{"bafyA": "0x01", "bafyB": {"uid": "0x02", "ipfsHash": "bafyB"}, "bafyC": 3}"#,
            )
            .unwrap();

        let report = f.migrator.migrate().unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.merged, 2);
        assert_eq!(report.malformed, 1);
        assert_eq!(f.ledger.find_by_handle("bafyA").unwrap().unwrap().uid.as_str(), "0x01");
        assert_eq!(f.ledger.find_by_handle("bafyB").unwrap().unwrap().uid.as_str(), "0x02");
    }

    #[test]
    fn test_saved_attestation_shape_is_upgraded() {
        let f = fixture();
        let uid = format!("0x{}", "11".repeat(32));
        let saved = json!({
            uid.clone(): {
                "uid": uid.clone(),
                "ipfsHash": "bafyOLD",
                "pledgeData": {"projectName": "Horta", "pledgor": "0xp"},
                "timestamp": "2024-03-10T12:00:00.000Z"
            }
        });
        f.durable.set(keys::ATTESTATIONS, &saved.to_string()).unwrap();
        f.durable
            .set(
                "revow_pledge_attestations",
                &json!({"bafyOLD": uid.clone()}).to_string(),
            )
            .unwrap();

        let first = f.migrator.migrate().unwrap();
        assert_eq!(first.upgraded, 1);
        assert_eq!(first.merged, 0);
        assert_eq!(first.malformed, 0);

        let record = f.ledger.find_by_handle("bafyOLD").unwrap().unwrap();
        assert_eq!(record.uid.as_str(), uid);
        assert!(!record.is_local);
        assert_eq!(record.pledge_snapshot["projectName"], "Horta");
        assert_eq!(f.ledger.len().unwrap(), 1);

        let table = f.durable.get(keys::ATTESTATIONS).unwrap();
        let second = f.migrator.migrate().unwrap();
        assert_eq!(second.upgraded, 0);
        assert_eq!(f.durable.get(keys::ATTESTATIONS).unwrap(), table);
    }

    #[test]
    fn test_local_attestation_shape_is_local() {
        let f = fixture();
        let uid = format!("0x{}", "ab".repeat(32));
        let local = json!({
            uid.clone(): {
                "uid": uid.clone(),
                "ipfsHash": "bafyLOCAL",
                "attester": "0xAttester",
                "recipient": "0xPledgor",
                "time": 1_710_072_000,
                "data": {"ipfsHash": "bafyLOCAL", "pledgor": "0xPledgor"},
                "txHash": format!("0x{}", "cd".repeat(32)),
                "createdAt": "2024-03-10T12:00:00.000Z"
            }
        });
        f.durable
            .set(keys::LEGACY_LOCAL_ATTESTATIONS, &local.to_string())
            .unwrap();

        let report = f.migrator.migrate().unwrap();
        assert_eq!(report.merged, 1);

        let record = f.ledger.find_by_handle("bafyLOCAL").unwrap().unwrap();
        assert_eq!(record.uid.as_str(), uid);
        assert!(record.is_local);
        assert_eq!(record.attester, "0xAttester");
        assert_eq!(record.recipient, "0xPledgor");
        assert_eq!(record.created_at.timestamp(), 1_710_072_000);
    }

    #[test]
    fn test_plain_string_content_is_kept() {
        let f = fixture();
        f.durable
            .set(
                "ipfsMapping",
                r#"{"bafyS": "hello", "bafyJ": "{\"description\": \"text\"}"}"#,
            )
            .unwrap();

        let report = f.migrator.migrate().unwrap();
        assert_eq!(report.merged, 2);
        assert_eq!(report.malformed, 0);
        assert_eq!(f.content.get("bafyS").unwrap().unwrap().payload, json!("hello"));
        assert_eq!(
            f.content.get("bafyJ").unwrap().unwrap().payload,
            json!({"description": "text"})
        );
    }

    #[test]
    fn test_parse_discriminates_shapes() {
        assert!(matches!(
            LegacyEntry::parse("k", r#"{"h": "0x1"}"#).unwrap(),
            LegacyEntry::FlatMap(_)
        ));
        assert!(matches!(
            LegacyEntry::parse("k", r#"{"0x1": {"ipfsHash": "h"}}"#).unwrap(),
            LegacyEntry::KeyedRecords(_)
        ));
        assert!(matches!(
            LegacyEntry::parse("k", "[]").unwrap(),
            LegacyEntry::RichList(_)
        ));
        assert!(LegacyEntry::parse("k", "\"text\"").is_err());
    }
}
