//! Engine - composition root
//!
//! Opens the local stores, wires the components together and exposes the
//! user-level flows. Nothing runs on construction; call
//! [`Engine::initialize`] once before serving lookups.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::collaborators::{AttestationRequest, Collaborators, RegistrationRequest};
use crate::config::Config;
use crate::content_store::ContentAddressableStore;
use crate::enricher::PledgeEnricher;
use crate::error::StorageError;
use crate::keys;
use crate::kv::{KeyValueStore, MemoryStore, SledStore};
use crate::ledger::{AttestationLedger, UNKNOWN_PARTY};
use crate::migration::{LegacyMigrator, MigrationReport};
use crate::models::{AttestationRecord, EnrichedPledge, Pledge, PledgeDraft};
use crate::pledge_cache::PledgeCache;
use crate::resolver::ReconciliationResolver;

/// Result of a successful registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationReceipt {
    pub pledge: Pledge,
    pub tx_hash: String,
    /// Present when an attestation was created right away
    pub attestation: Option<AttestationRecord>,
}

pub struct Engine {
    config: Arc<Config>,
    durable: Arc<dyn KeyValueStore>,
    content: Arc<ContentAddressableStore>,
    ledger: Arc<AttestationLedger>,
    resolver: Arc<ReconciliationResolver>,
    enricher: PledgeEnricher,
    pledges: PledgeCache,
    collaborators: Collaborators,
}

impl Engine {
    /// Open the durable store under `config.storage_dir`
    pub fn open(config: Config, collaborators: Collaborators) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&config.storage_dir)?;
        let durable = Arc::new(SledStore::open(config.db_path())?);
        Ok(Self::with_store(config, durable, collaborators))
    }

    /// Build on an already opened durable store
    pub fn with_store(
        config: Config,
        durable: Arc<dyn KeyValueStore>,
        collaborators: Collaborators,
    ) -> Self {
        let config = Arc::new(config);
        let session: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new("session"));

        let mut content = ContentAddressableStore::open(durable.clone(), session);
        if let Some(network) = &collaborators.content {
            content = content.with_network(network.clone(), config.publish_content);
        }
        let content = Arc::new(content);

        let ledger = Arc::new(AttestationLedger::new(durable.clone(), config.clone()));
        let migrator = Arc::new(LegacyMigrator::new(
            durable.clone(),
            ledger.clone(),
            content.clone(),
        ));
        let resolver = Arc::new(ReconciliationResolver::new(
            ledger.clone(),
            migrator,
            collaborators.attestations.clone(),
        ));
        let enricher = PledgeEnricher::new(content.clone(), resolver.clone(), ledger.clone());
        let pledges = PledgeCache::new(durable.clone());

        Self {
            config,
            durable,
            content,
            ledger,
            resolver,
            enricher,
            pledges,
            collaborators,
        }
    }

    /// Run the legacy migration. Safe to call more than once.
    pub async fn initialize(&self) -> Result<MigrationReport, StorageError> {
        let report = self.resolver.ensure_migrated().await?;
        info!(
            merged = report.merged,
            content = self.content.len_primary(),
            "Engine initialized"
        );
        Ok(report)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn content(&self) -> &ContentAddressableStore {
        &self.content
    }

    pub fn ledger(&self) -> &AttestationLedger {
        &self.ledger
    }

    pub fn resolver(&self) -> &ReconciliationResolver {
        &self.resolver
    }

    pub fn enricher(&self) -> &PledgeEnricher {
        &self.enricher
    }

    pub fn pledges(&self) -> &PledgeCache {
        &self.pledges
    }

    // ========================================================================
    // Flows
    // ========================================================================

    /// Store the pledge's content, register it and cache it locally
    pub async fn register_pledge(
        &self,
        draft: PledgeDraft,
    ) -> Result<RegistrationReceipt, StorageError> {
        draft.validate()?;
        let account = self.connected_account()?;

        let created_at = Utc::now();
        let payload = json!({
            "projectName": draft.project_name,
            "location": draft.location,
            "commitmentType": draft.commitment_type,
            "percentage": draft.percentage,
            "startDate": draft.start_date.timestamp_millis(),
            "description": draft.description,
            "additionalInfo": draft.additional_info,
            "createdBy": account,
            "createdAt": created_at.to_rfc3339(),
        });
        let handle = self.content.put(&payload).await?;

        let request = RegistrationRequest {
            project_name: draft.project_name.clone(),
            location: draft.location.clone(),
            commitment_type: draft.commitment_type,
            percentage: draft.percentage,
            start_date_seconds: draft.start_date.timestamp(),
            content_handle: handle.clone(),
        };
        let receipt = self
            .collaborators
            .registry
            .register_pledge(&request)
            .await?;
        info!(handle = %handle, tx = %receipt.tx_hash, "Pledge registered");

        let pledge = Pledge {
            pledgor: account,
            project_name: draft.project_name,
            location: draft.location,
            commitment_type: draft.commitment_type,
            percentage: draft.percentage,
            start_date: draft.start_date,
            content_handle: handle,
            registered_at: created_at,
            description: draft.description,
            additional_info: draft.additional_info,
        };
        if let Err(e) = self.pledges.save(&pledge) {
            warn!(handle = %pledge.content_handle, error = %e, "Failed to cache registered pledge");
        }

        let attestation = if self.config.attest_on_register {
            match self.attest_pledge(&pledge).await {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(handle = %pledge.content_handle, error = %e, "Attestation after registration failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(RegistrationReceipt {
            pledge,
            tx_hash: receipt.tx_hash,
            attestation,
        })
    }

    /// Attestation for `pledge`: existing one, else anchored on the network
    /// when enabled, else a local one.
    pub async fn attest_pledge(&self, pledge: &Pledge) -> Result<AttestationRecord, StorageError> {
        if let Some(existing) = self.resolver.resolve(pledge).await? {
            return Ok(existing);
        }

        let attester = self
            .collaborators
            .wallet
            .current_account()
            .unwrap_or_else(|| UNKNOWN_PARTY.to_string());

        if self.config.anchor_attestations {
            let request = AttestationRequest {
                schema_id: self.config.schema_id.clone(),
                recipient: pledge.pledgor.clone(),
                expiration_time: 0,
                revocable: true,
                ref_uid: None,
                data: pledge.into(),
                value: 0,
            };
            match self.collaborators.attestations.attest(&request).await {
                Ok(uid) => {
                    return self
                        .ledger
                        .record_anchored(pledge, &attester, &pledge.pledgor, uid)
                }
                Err(e) => warn!(
                    handle = %pledge.content_handle,
                    error = %e,
                    "Anchoring failed, creating local attestation"
                ),
            }
        }

        self.resolver.create_or_get(pledge, &attester).await
    }

    /// Pledges of `address`, enriched. Falls back to the local cache when
    /// the registry is unavailable.
    pub async fn user_pledges(&self, address: &str) -> Result<Vec<EnrichedPledge>, StorageError> {
        let pledges = match self.collaborators.registry.pledges_by_address(address).await {
            Ok(pledges) => {
                self.cache_all(&pledges);
                pledges
            }
            Err(e) => {
                warn!(address = %address, error = %e, "Registry unavailable, using cached pledges");
                self.pledges.by_pledgor(address)?
            }
        };
        Ok(self.enricher.enrich_many(pledges).await)
    }

    /// Pledges of the connected account
    pub async fn my_pledges(&self) -> Result<Vec<EnrichedPledge>, StorageError> {
        let account = self.connected_account()?;
        self.user_pledges(&account).await
    }

    /// Every registered pledge, enriched
    pub async fn all_pledges(&self) -> Result<Vec<EnrichedPledge>, StorageError> {
        let pledges = match self.collaborators.registry.all_pledges().await {
            Ok(pledges) => {
                self.cache_all(&pledges);
                pledges
            }
            Err(e) => {
                warn!(error = %e, "Registry unavailable, using cached pledges");
                self.pledges.all()?
            }
        };
        Ok(self.enricher.enrich_many(pledges).await)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Every namespaced key with its parsed value
    pub fn dump(&self) -> Result<Value, StorageError> {
        let mut out = Map::new();
        let mut stored = self.durable.keys()?;
        stored.sort();
        for key in stored.into_iter().filter(|k| keys::is_namespaced(k)) {
            let Some(raw) = self.durable.get(&key)? else {
                continue;
            };
            let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
            out.insert(key, value);
        }
        Ok(Value::Object(out))
    }

    /// Remove every namespaced key and reset the volatile tiers.
    /// Returns the number of durable keys removed.
    pub fn wipe(&self) -> Result<usize, StorageError> {
        let mut removed = 0;
        for key in self.durable.keys()? {
            if keys::is_namespaced(&key) {
                self.durable.remove(&key)?;
                removed += 1;
            }
        }
        self.durable.flush()?;
        self.content.reset()?;
        info!(removed, "Local storage wiped");
        Ok(removed)
    }

    /// Flush durable writes
    pub fn flush(&self) -> Result<(), StorageError> {
        self.durable.flush()
    }

    fn connected_account(&self) -> Result<String, StorageError> {
        let wallet = &self.collaborators.wallet;
        let account = wallet
            .current_account()
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| StorageError::InvalidInput("wallet not connected".into()))?;
        if let Some(chain_id) = wallet.chain_id() {
            if chain_id != self.config.chain_id {
                return Err(StorageError::InvalidInput(format!(
                    "wallet is on chain {}, expected {}",
                    chain_id, self.config.chain_id
                )));
            }
        }
        Ok(account)
    }

    fn cache_all(&self, pledges: &[Pledge]) {
        for pledge in pledges {
            if let Err(e) = self.pledges.save(pledge) {
                warn!(handle = %pledge.content_handle, error = %e, "Failed to cache pledge");
            }
        }
    }
}
