//! Integration tests for the engine with scripted collaborators
//!
//! The registry and attestation network are in-memory fakes that can be
//! switched offline, so both the happy path and the degrade-to-local path
//! run without any network.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use revow_storage::collaborators::{
    AttestationRequest, RegistrationRequest, RegistryReceipt, RemoteAttestation,
};
use revow_storage::{
    AttestationNetwork, AttestationUid, Collaborators, CommitmentType, Config, Engine,
    KeyValueStore, MemoryStore, Offline, OriginTier, Pledge, PledgeDraft, PledgeRegistry,
    SledStore, StaticWallet, StorageError,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const ALICE: &str = "0xa11ce00000000000000000000000000000000000";
const CHAIN_ID: u64 = 421614;

/// Registry that remembers what was registered and can go offline
struct FakeRegistry {
    account: String,
    online: AtomicBool,
    pledges: Mutex<Vec<Pledge>>,
}

impl FakeRegistry {
    fn new(account: &str) -> Self {
        Self {
            account: account.to_string(),
            online: AtomicBool::new(true),
            pledges: Mutex::new(Vec::new()),
        }
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::ExternalUnavailable("registry down".into()))
        }
    }

    fn seed(&self, pledge: Pledge) {
        self.pledges.lock().unwrap().push(pledge);
    }
}

#[async_trait]
impl PledgeRegistry for FakeRegistry {
    async fn register_pledge(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistryReceipt, StorageError> {
        self.check()?;
        let mut pledges = self.pledges.lock().unwrap();
        pledges.push(Pledge {
            pledgor: self.account.clone(),
            project_name: request.project_name.clone(),
            location: request.location.clone(),
            commitment_type: request.commitment_type,
            percentage: request.percentage,
            start_date: DateTime::from_timestamp(request.start_date_seconds, 0).unwrap(),
            content_handle: request.content_handle.clone(),
            registered_at: Utc::now(),
            description: String::new(),
            additional_info: String::new(),
        });
        Ok(RegistryReceipt {
            tx_hash: format!("0x{:064x}", pledges.len()),
        })
    }

    async fn pledges_by_address(&self, address: &str) -> Result<Vec<Pledge>, StorageError> {
        self.check()?;
        Ok(self
            .pledges
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.pledgor == address)
            .cloned()
            .collect())
    }

    async fn all_pledges(&self) -> Result<Vec<Pledge>, StorageError> {
        self.check()?;
        Ok(self.pledges.lock().unwrap().clone())
    }
}

/// Attestation network that issues sequential UIDs
#[derive(Default)]
struct FakeAttestations {
    offline: AtomicBool,
    issued: Mutex<Vec<RemoteAttestation>>,
    attests: AtomicUsize,
}

#[async_trait]
impl AttestationNetwork for FakeAttestations {
    async fn attest(&self, request: &AttestationRequest) -> Result<AttestationUid, StorageError> {
        self.attests.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::ExternalUnavailable("rpc timeout".into()));
        }
        let mut issued = self.issued.lock().unwrap();
        let uid = AttestationUid::parse(&format!("0x{:064X}", issued.len() + 1)).unwrap();
        issued.push(RemoteAttestation {
            uid: uid.clone(),
            attester: ALICE.to_string(),
            recipient: request.recipient.clone(),
            content_handle: Some(request.data.content_handle.clone()),
            created_at: Utc::now(),
        });
        Ok(uid)
    }

    async fn get_attestation(
        &self,
        uid: &AttestationUid,
    ) -> Result<Option<RemoteAttestation>, StorageError> {
        Ok(self
            .issued
            .lock()
            .unwrap()
            .iter()
            .find(|a| &a.uid == uid)
            .cloned())
    }

    async fn find_by_content(
        &self,
        handle: &str,
    ) -> Result<Option<RemoteAttestation>, StorageError> {
        Ok(self
            .issued
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.content_handle.as_deref() == Some(handle))
            .cloned())
    }
}

fn collaborators(
    registry: Arc<FakeRegistry>,
    attestations: Arc<FakeAttestations>,
) -> Collaborators {
    Collaborators {
        registry,
        attestations,
        content: None,
        wallet: Arc::new(StaticWallet::new(Some(ALICE.to_string()), Some(CHAIN_ID))),
    }
}

fn draft(name: &str, description: &str) -> PledgeDraft {
    PledgeDraft {
        project_name: name.to_string(),
        location: "Recife".to_string(),
        commitment_type: CommitmentType::Revenue,
        percentage: 7,
        start_date: Utc::now(),
        description: description.to_string(),
        additional_info: "Informações".to_string(),
    }
}

fn bare_pledge(handle: &str) -> Pledge {
    Pledge {
        pledgor: ALICE.to_string(),
        project_name: "Bare".to_string(),
        location: "Nowhere".to_string(),
        commitment_type: CommitmentType::Token,
        percentage: 1,
        start_date: Utc::now(),
        content_handle: handle.to_string(),
        registered_at: Utc::now(),
        description: String::new(),
        additional_info: String::new(),
    }
}

/// Register a pledge, read it back enriched, then read it again with the registry down
#[tokio::test]
async fn test_register_and_list_with_registry_outage() {
    let registry = Arc::new(FakeRegistry::new(ALICE));
    let attestations = Arc::new(FakeAttestations::default());
    let engine = Engine::with_store(
        Config::default(),
        Arc::new(MemoryStore::new("durable")),
        collaborators(registry.clone(), attestations.clone()),
    );
    engine.initialize().await.unwrap();

    let receipt = engine
        .register_pledge(draft("Solar Coop", "Painéis solares"))
        .await
        .unwrap();
    let attestation = receipt.attestation.clone().unwrap();
    assert!(attestation.is_local);
    assert_eq!(attestation.recipient, ALICE);
    // Anchoring is off by default
    assert_eq!(attestations.attests.load(Ordering::SeqCst), 0);

    let online = engine.user_pledges(ALICE).await.unwrap();
    assert_eq!(online.len(), 1);
    assert_eq!(online[0].pledge.description, "Painéis solares");
    assert_eq!(online[0].pledge.additional_info, "Informações");
    assert_eq!(online[0].attestation_uid.as_ref(), Some(&attestation.uid));

    registry.set_online(false);
    let offline = engine.user_pledges(ALICE).await.unwrap();
    assert_eq!(offline.len(), 1);
    assert_eq!(offline[0].pledge.content_handle, receipt.pledge.content_handle);
    assert_eq!(offline[0].attestation_uid, online[0].attestation_uid);
    assert_eq!(
        offline[0].attestation_link,
        Some(format!(
            "https://sepolia.easscan.org/attestation/view/{}",
            attestation.uid
        ))
    );

    let all = engine.all_pledges().await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_anchored_attestation() {
    let registry = Arc::new(FakeRegistry::new(ALICE));
    let attestations = Arc::new(FakeAttestations::default());
    let mut config = Config::default();
    config.anchor_attestations = true;
    let engine = Engine::with_store(
        config,
        Arc::new(MemoryStore::new("durable")),
        collaborators(registry, attestations.clone()),
    );

    let receipt = engine.register_pledge(draft("Wind", "")).await.unwrap();
    let record = receipt.attestation.unwrap();
    assert!(!record.is_local);
    assert_eq!(record.uid.as_str(), format!("0x{:064x}", 1));

    // Attesting again reuses the record
    let again = engine.attest_pledge(&receipt.pledge).await.unwrap();
    assert_eq!(again.uid, record.uid);
    assert_eq!(attestations.attests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_anchoring_failure_falls_back_to_local() {
    let registry = Arc::new(FakeRegistry::new(ALICE));
    let attestations = Arc::new(FakeAttestations::default());
    attestations.offline.store(true, Ordering::SeqCst);
    let mut config = Config::default();
    config.anchor_attestations = true;
    let engine = Engine::with_store(
        config,
        Arc::new(MemoryStore::new("durable")),
        collaborators(registry, attestations.clone()),
    );

    let receipt = engine.register_pledge(draft("Hydro", "")).await.unwrap();
    let record = receipt.attestation.unwrap();
    assert!(record.is_local);
    assert_eq!(record.attester, ALICE);
    assert_eq!(attestations.attests.load(Ordering::SeqCst), 1);
}

/// Scenario: content survives a restart that loses session and memory tiers
#[tokio::test]
async fn test_content_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let durable: Arc<dyn KeyValueStore> =
        Arc::new(SledStore::open(temp_dir.path().join("local.sled")).unwrap());

    let first = Engine::with_store(
        Config::with_storage_dir(temp_dir.path()),
        durable.clone(),
        Collaborators::offline(None, None),
    );
    let handle = first
        .content()
        .put(&json!({"description": "hello"}))
        .await
        .unwrap();
    first.flush().unwrap();
    drop(first);

    let second = Engine::with_store(
        Config::with_storage_dir(temp_dir.path()),
        durable,
        Collaborators::offline(None, None),
    );
    let record = second.content().get(&handle).unwrap().unwrap();
    assert_eq!(record.payload, json!({"description": "hello"}));
    assert_eq!(record.origin_tier, OriginTier::PrimaryMap);
}

/// Scenario: a legacy flat map is visible after initialization
#[tokio::test]
async fn test_legacy_flat_map_after_initialize() {
    let durable: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new("durable"));
    durable
        .set("pledgeEasMap", r#"{"bafyXYZ": "0xdeadbeef"}"#)
        .unwrap();
    let engine = Engine::with_store(
        Config::default(),
        durable.clone(),
        Collaborators::offline(None, None),
    );

    let report = engine.initialize().await.unwrap();
    assert_eq!(report.merged, 1);

    let record = engine.ledger().find_by_handle("bafyXYZ").unwrap().unwrap();
    assert_eq!(record.uid.as_str(), "0xdeadbeef");

    // Second initialize is a no-op on storage
    let table = durable.get("revow_attestations").unwrap();
    engine.initialize().await.unwrap();
    assert_eq!(durable.get("revow_attestations").unwrap(), table);
}

/// Records written by earlier versions of the app resolve to their original UIDs
#[tokio::test]
async fn test_historical_attestations_keep_their_uids() {
    let saved_uid = format!("0x{}", "11".repeat(32));
    let local_uid = format!("0x{}", "ab".repeat(32));
    let durable: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new("durable"));
    durable
        .set(
            "revow_attestations",
            &json!({
                saved_uid.clone(): {
                    "uid": saved_uid.clone(),
                    "ipfsHash": "bafyOLD",
                    "pledgeData": {"projectName": "Horta", "pledgor": ALICE},
                    "timestamp": "2024-03-10T12:00:00.000Z"
                }
            })
            .to_string(),
        )
        .unwrap();
    durable
        .set(
            "revow_pledge_attestations",
            &json!({"bafyOLD": saved_uid.clone()}).to_string(),
        )
        .unwrap();
    durable
        .set(
            "revow_local_attestations",
            &json!({
                local_uid.clone(): {
                    "uid": local_uid.clone(),
                    "ipfsHash": "bafyLOCAL",
                    "attester": ALICE,
                    "recipient": ALICE,
                    "time": 1_710_072_000,
                    "data": {"ipfsHash": "bafyLOCAL", "pledgor": ALICE},
                    "txHash": format!("0x{}", "cd".repeat(32)),
                    "createdAt": "2024-03-10T12:00:00.000Z"
                }
            })
            .to_string(),
        )
        .unwrap();

    let engine = Engine::with_store(
        Config::default(),
        durable,
        Collaborators::offline(Some(ALICE.to_string()), Some(CHAIN_ID)),
    );
    let report = engine.initialize().await.unwrap();
    assert_eq!(report.upgraded, 1);
    assert_eq!(report.merged, 1);

    let saved = engine
        .resolver()
        .resolve(&bare_pledge("bafyOLD"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.uid.as_str(), saved_uid);

    let local = engine
        .resolver()
        .resolve(&bare_pledge("bafyLOCAL"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(local.uid.as_str(), local_uid);
    assert!(local.is_local);

    // No second attestation is minted for either handle
    let again = engine.attest_pledge(&bare_pledge("bafyOLD")).await.unwrap();
    assert_eq!(again.uid.as_str(), saved_uid);
    assert_eq!(engine.ledger().len().unwrap(), 2);
}

/// Scenario: a pledge whose content is nowhere enriches to blanks
#[tokio::test]
async fn test_enrich_unknown_content() {
    let engine = Engine::with_store(
        Config::default(),
        Arc::new(MemoryStore::new("durable")),
        Collaborators::offline(None, None),
    );

    let enriched = engine.enricher().enrich_one(bare_pledge("bafyNowhere")).await;
    assert_eq!(enriched.pledge.description, "");
    assert_eq!(enriched.pledge.additional_info, "");
    assert!(enriched.attestation_uid.is_none());
}

/// One bad pledge in the registry listing does not disturb the others
#[tokio::test]
async fn test_listing_keeps_order_past_bad_pledge() {
    let registry = Arc::new(FakeRegistry::new(ALICE));
    let engine = Engine::with_store(
        Config::default(),
        Arc::new(MemoryStore::new("durable")),
        collaborators(registry.clone(), Arc::new(FakeAttestations::default())),
    );

    let h1 = engine
        .content()
        .put(&json!({"desc": "first"}))
        .await
        .unwrap();
    let h3 = engine
        .content()
        .put(&json!({"text": "third"}))
        .await
        .unwrap();
    registry.seed(bare_pledge(&h1));
    registry.seed(bare_pledge("   "));
    registry.seed(bare_pledge(&h3));

    let listed = engine.all_pledges().await.unwrap();
    let descriptions: Vec<&str> = listed
        .iter()
        .map(|p| p.pledge.description.as_str())
        .collect();
    assert_eq!(descriptions, vec!["first", "", "third"]);
}

#[tokio::test]
async fn test_offline_engine_lists_nothing_without_cache() {
    let engine = Engine::with_store(
        Config::default(),
        Arc::new(MemoryStore::new("durable")),
        Collaborators {
            registry: Arc::new(Offline),
            attestations: Arc::new(Offline),
            content: None,
            wallet: Arc::new(StaticWallet::new(None, None)),
        },
    );
    assert!(engine.all_pledges().await.unwrap().is_empty());
    assert!(matches!(
        engine.my_pledges().await,
        Err(StorageError::InvalidInput(_))
    ));
}
