//! Content-Addressable Store - six-tier fallback for JSON payloads
//!
//! Payloads are addressed by a CIDv1 over their canonical JSON serialization
//! (`json` codec, sha2-256). Lookups walk the tiers in strict priority order:
//!
//! 1. **Primary map** - the `revow_ipfs_mapping` document, mirrored in memory
//! 2. **Prefixed durable** - `ipfs_<handle>` in the durable store
//! 3. **Unprefixed durable** - `<handle>` in the durable store (read-only, legacy)
//! 4. **Session** - `ipfs_<handle>` in the session store
//! 5. **Process memory** - [`MemoryCache`]
//! 6. **Known seeds** - handles created before content was published anywhere
//!
//! The first hit wins and is copied into every writable tier above it. A tier
//! that errors (quota, corrupt value) counts as a miss for that tier only.

use chrono::Utc;
use cid::Cid;
use dashmap::DashMap;
use multihash_codetable::{Code, MultihashDigest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::collaborators::ContentNetwork;
use crate::error::StorageError;
use crate::keys;
use crate::kv::{read_json_object, update_json_object, KeyValueStore};
use crate::models::{ContentRecord, OriginTier};

/// Multicodec for JSON
const JSON_CODEC: u64 = 0x0200;

/// Compute the content handle of a payload.
///
/// `serde_json` keeps object keys sorted, so equal values always serialize
/// to the same bytes.
pub fn compute_handle(payload: &Value) -> Result<String, StorageError> {
    let canonical = serde_json::to_vec(payload)?;
    let hash = Code::Sha2_256.digest(&canonical);
    Ok(Cid::new_v1(JSON_CODEC, hash).to_string())
}

// ============================================================================
// Tier bookkeeping
// ============================================================================

/// Entry of the primary content map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub data: Value,
    /// Milliseconds since the epoch
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "direct_mapping".to_string()
}

impl MappingEntry {
    fn new(data: Value, source: &str) -> Self {
        Self {
            data,
            timestamp: Utc::now().timestamp_millis(),
            source: source.to_string(),
        }
    }
}

/// Process-memory tier. Lives as long as its owner; cleared only explicitly.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Value>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, handle: &str) -> Option<Value> {
        self.entries.get(handle).map(|v| v.value().clone())
    }

    pub fn insert(&self, handle: &str, payload: Value) {
        self.entries.insert(handle.to_string(), payload);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Probe steps in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    PrimaryMap,
    PrefixedDurable,
    UnprefixedDurable,
    Session,
    Memory,
    Seed,
}

impl Tier {
    const ORDER: [Tier; 6] = [
        Tier::PrimaryMap,
        Tier::PrefixedDurable,
        Tier::UnprefixedDurable,
        Tier::Session,
        Tier::Memory,
        Tier::Seed,
    ];

    fn origin(self) -> OriginTier {
        match self {
            Tier::PrimaryMap => OriginTier::PrimaryMap,
            Tier::PrefixedDurable | Tier::UnprefixedDurable => OriginTier::LocalPersistent,
            Tier::Session => OriginTier::SessionPersistent,
            Tier::Memory => OriginTier::ProcessMemory,
            Tier::Seed => OriginTier::KnownSeed,
        }
    }

    fn writable(self) -> bool {
        !matches!(self, Tier::UnprefixedDurable | Tier::Seed)
    }

    fn label(self) -> &'static str {
        match self {
            Tier::PrimaryMap => "primary_map",
            Tier::PrefixedDurable => "prefixed_durable",
            Tier::UnprefixedDurable => "unprefixed_durable",
            Tier::Session => "session",
            Tier::Memory => "memory",
            Tier::Seed => "seed",
        }
    }
}

/// Handles that were only ever embedded in the application
fn known_seed(handle: &str) -> Option<Value> {
    let (name, _) = KNOWN_SEEDS.iter().find(|(_, h)| *h == handle)?;
    Some(json!({
        "description": format!("Descrição do projeto {}", name),
        "additionalInfo": format!("Informações adicionais do projeto {}", name),
    }))
}

const KNOWN_SEEDS: &[(&str, &str)] = &[
    ("Teste1", "bafybeih1746892993219310015ciqd3xafdcjcdcmof5xk2r5ycynhvnq7fy"),
    ("Teste2", "bafybeih1746893597192541168ciqd3xafdcjcdcmof5xk2r5ycynhvnq7fy"),
    ("Teste13", "bafybeih1746904186967862534ciqd3xafdcjcdcmof5xk2r5ycynhvnq7fy"),
];

// ============================================================================
// Store
// ============================================================================

pub struct ContentAddressableStore {
    durable: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
    /// In-memory mirror of the primary map document
    primary: DashMap<String, MappingEntry>,
    memory: MemoryCache,
    network: Option<Arc<dyn ContentNetwork>>,
    publish: bool,
}

impl ContentAddressableStore {
    /// Open the store and load the primary map mirror from durable storage
    pub fn open(durable: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        let store = Self {
            durable,
            session,
            primary: DashMap::new(),
            memory: MemoryCache::new(),
            network: None,
            publish: false,
        };
        store.load_primary();
        store
    }

    /// Attach a content-addressed network used by `put` (when `publish`) and `get_or_fetch`
    pub fn with_network(mut self, network: Arc<dyn ContentNetwork>, publish: bool) -> Self {
        self.network = Some(network);
        self.publish = publish;
        self
    }

    fn load_primary(&self) {
        let document = match read_json_object(self.durable.as_ref(), keys::PRIMARY_MAP) {
            Ok(document) => document,
            Err(e) => {
                warn!(error = %e, "Primary content map unreadable, starting empty");
                return;
            }
        };

        for (handle, value) in document {
            match serde_json::from_value::<MappingEntry>(value) {
                Ok(entry) => {
                    self.primary.insert(handle, entry);
                }
                Err(e) => warn!(handle = %handle, error = %e, "Skipping malformed primary map entry"),
            }
        }
        debug!(entries = self.primary.len(), "Loaded primary content map");
    }

    /// Store a payload in every writable tier and return its handle
    pub async fn put(&self, payload: &Value) -> Result<String, StorageError> {
        let handle = compute_handle(payload)?;
        self.write_tiers(&handle, payload, &Tier::ORDER, "direct_mapping");
        info!(handle = %handle, "Stored content");

        if self.publish {
            if let Some(network) = &self.network {
                let bytes = serde_json::to_vec(payload)?;
                match network.put(bytes).await {
                    Ok(remote) if remote != handle => {
                        debug!(handle = %handle, remote = %remote, "Network assigned a different handle")
                    }
                    Ok(_) => debug!(handle = %handle, "Published content"),
                    Err(e) => warn!(handle = %handle, error = %e, "Failed to publish content"),
                }
            }
        }

        Ok(handle)
    }

    /// Resolve `handle` through the tiers. `Ok(None)` when every tier misses.
    pub fn get(&self, handle: &str) -> Result<Option<ContentRecord>, StorageError> {
        let handle = handle.trim();
        if handle.is_empty() {
            return Err(StorageError::InvalidInput("content handle is empty".into()));
        }

        for (position, tier) in Tier::ORDER.iter().enumerate() {
            let payload = match self.probe(*tier, handle) {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => {
                    warn!(handle = %handle, tier = tier.label(), error = %e, "Tier failed, treating as miss");
                    continue;
                }
            };

            debug!(handle = %handle, tier = tier.label(), "Content hit");
            self.write_tiers(handle, &payload, &Tier::ORDER[..position], "backfill");

            return Ok(Some(ContentRecord {
                handle: handle.to_string(),
                payload,
                retrieved_at: Utc::now(),
                origin_tier: tier.origin(),
            }));
        }

        debug!(handle = %handle, "Content not found in any tier");
        Ok(None)
    }

    /// Local lookup, then the content-addressed network when one is attached.
    /// A fetched payload is stored locally under the requested handle.
    pub async fn get_or_fetch(&self, handle: &str) -> Result<Option<ContentRecord>, StorageError> {
        if let Some(record) = self.get(handle)? {
            return Ok(Some(record));
        }
        let Some(network) = &self.network else {
            return Ok(None);
        };

        let handle = handle.trim();
        let bytes = match network.get(handle).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(handle = %handle, error = %e, "Content network lookup failed");
                return Ok(None);
            }
        };
        let payload: Value = match serde_json::from_slice(&bytes) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(handle = %handle, error = %e, "Content network returned non-JSON payload");
                return Ok(None);
            }
        };

        self.write_tiers(handle, &payload, &Tier::ORDER, "network");
        info!(handle = %handle, "Fetched content from network");

        Ok(Some(ContentRecord {
            handle: handle.to_string(),
            payload,
            retrieved_at: Utc::now(),
            origin_tier: OriginTier::PrimaryMap,
        }))
    }

    /// Add `payload` to the primary map unless `handle` is already there.
    /// Returns whether it was added.
    pub fn merge_primary(
        &self,
        handle: &str,
        payload: Value,
        source: &str,
    ) -> Result<bool, StorageError> {
        let entry = MappingEntry::new(payload, source);
        let value = serde_json::to_value(&entry)?;

        let added = update_json_object(self.durable.as_ref(), keys::PRIMARY_MAP, |document| {
            if document.contains_key(handle) {
                return Ok(false);
            }
            document.insert(handle.to_string(), value.clone());
            Ok(true)
        })?;

        if added {
            self.primary.insert(handle.to_string(), entry);
        }
        Ok(added)
    }

    /// Handles in the primary map, sorted
    pub fn handles(&self) -> Vec<String> {
        let mut handles: Vec<String> = self.primary.iter().map(|e| e.key().clone()).collect();
        handles.sort();
        handles
    }

    pub fn len_primary(&self) -> usize {
        self.primary.len()
    }

    /// Reset the process-memory tier
    pub fn clear_memory(&self) {
        self.memory.clear();
    }

    /// Forget everything held in process and session after a wipe of the durable store
    pub fn reset(&self) -> Result<(), StorageError> {
        self.primary.clear();
        self.memory.clear();
        for key in self.session.keys()? {
            if key.starts_with(keys::CONTENT_PREFIX) {
                self.session.remove(&key)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn probe(&self, tier: Tier, handle: &str) -> Result<Option<Value>, StorageError> {
        match tier {
            Tier::PrimaryMap => Ok(self.primary.get(handle).map(|e| e.data.clone())),
            Tier::PrefixedDurable => {
                let key = keys::content_key(handle);
                read_payload(self.durable.as_ref(), &key)
            }
            Tier::UnprefixedDurable => {
                if keys::is_namespaced(handle) {
                    return Ok(None);
                }
                read_payload(self.durable.as_ref(), handle)
            }
            Tier::Session => {
                let key = keys::content_key(handle);
                read_payload(self.session.as_ref(), &key)
            }
            Tier::Memory => Ok(self.memory.get(handle)),
            Tier::Seed => Ok(known_seed(handle)),
        }
    }

    /// Write `payload` to each writable tier in `tiers`, logging failures
    fn write_tiers(&self, handle: &str, payload: &Value, tiers: &[Tier], source: &str) {
        for tier in tiers.iter().filter(|t| t.writable()) {
            if let Err(e) = self.write_tier(*tier, handle, payload, source) {
                warn!(handle = %handle, tier = tier.label(), error = %e, "Failed to write tier");
            }
        }
    }

    fn write_tier(
        &self,
        tier: Tier,
        handle: &str,
        payload: &Value,
        source: &str,
    ) -> Result<(), StorageError> {
        match tier {
            Tier::PrimaryMap => {
                let entry = MappingEntry::new(payload.clone(), source);
                let value = serde_json::to_value(&entry)?;
                update_json_object(self.durable.as_ref(), keys::PRIMARY_MAP, |document| {
                    document.insert(handle.to_string(), value.clone());
                    Ok(())
                })?;
                self.primary.insert(handle.to_string(), entry);
            }
            Tier::PrefixedDurable => {
                let text = serde_json::to_string(payload)?;
                self.durable.set(&keys::content_key(handle), &text)?;
            }
            Tier::Session => {
                let text = serde_json::to_string(payload)?;
                self.session.set(&keys::content_key(handle), &text)?;
            }
            Tier::Memory => self.memory.insert(handle, payload.clone()),
            Tier::UnprefixedDurable | Tier::Seed => {}
        }
        Ok(())
    }
}

fn read_payload(store: &dyn KeyValueStore, key: &str) -> Result<Option<Value>, StorageError> {
    match store.get(key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StorageError::malformed(key, e)),
        None => Ok(None),
    }
}
