//! External collaborators
//!
//! The registry contract, the attestation network, the content-addressed
//! network and the wallet are opaque services to this crate. Each is a trait;
//! the engine only ever holds `Arc<dyn Trait>`. Any error they return is
//! treated as [`StorageError::ExternalUnavailable`] by callers and degraded to
//! a local-only answer.
//!
//! [`Offline`] implements every network trait by refusing, which is what the
//! CLI runs with.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::StorageError;
use crate::models::{Address, CommitmentType, Pledge};
use crate::uid::AttestationUid;

// =============================================================================
// Registry contract
// =============================================================================

/// Arguments of `registerPledge`, already validated against the 31-byte limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub project_name: String,
    pub location: String,
    pub commitment_type: CommitmentType,
    pub percentage: u8,
    pub start_date_seconds: i64,
    pub content_handle: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryReceipt {
    pub tx_hash: String,
}

#[async_trait]
pub trait PledgeRegistry: Send + Sync {
    async fn register_pledge(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistryReceipt, StorageError>;

    async fn pledges_by_address(&self, address: &str) -> Result<Vec<Pledge>, StorageError>;

    async fn all_pledges(&self) -> Result<Vec<Pledge>, StorageError>;
}

// =============================================================================
// Attestation network
// =============================================================================

/// Schema fields attested for a pledge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PledgeAttestationData {
    pub project_name: String,
    pub commitment_type: CommitmentType,
    pub percentage: u8,
    pub start_date_seconds: i64,
    pub content_handle: String,
}

impl From<&Pledge> for PledgeAttestationData {
    fn from(pledge: &Pledge) -> Self {
        Self {
            project_name: pledge.project_name.clone(),
            commitment_type: pledge.commitment_type,
            percentage: pledge.percentage,
            start_date_seconds: pledge.start_date.timestamp(),
            content_handle: pledge.content_handle.clone(),
        }
    }
}

/// Arguments of `attest`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationRequest {
    pub schema_id: String,
    pub recipient: Address,
    /// 0 = never expires
    pub expiration_time: u64,
    pub revocable: bool,
    pub ref_uid: Option<AttestationUid>,
    pub data: PledgeAttestationData,
    pub value: u64,
}

/// An attestation as the network reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAttestation {
    pub uid: AttestationUid,
    pub attester: Address,
    pub recipient: Address,
    pub content_handle: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AttestationNetwork: Send + Sync {
    async fn attest(&self, request: &AttestationRequest) -> Result<AttestationUid, StorageError>;

    /// `Ok(None)` when the network answers that the UID does not exist
    async fn get_attestation(
        &self,
        uid: &AttestationUid,
    ) -> Result<Option<RemoteAttestation>, StorageError>;

    /// Look for a historical attestation over `handle` (creation events)
    async fn find_by_content(
        &self,
        handle: &str,
    ) -> Result<Option<RemoteAttestation>, StorageError>;
}

// =============================================================================
// Content-addressed network
// =============================================================================

#[async_trait]
pub trait ContentNetwork: Send + Sync {
    async fn put(&self, bytes: Vec<u8>) -> Result<String, StorageError>;

    async fn get(&self, handle: &str) -> Result<Vec<u8>, StorageError>;
}

// =============================================================================
// Wallet
// =============================================================================

pub trait WalletConnector: Send + Sync {
    fn current_account(&self) -> Option<Address>;

    fn chain_id(&self) -> Option<u64>;

    /// Notified whenever the connected account changes
    fn watch_account(&self) -> watch::Receiver<Option<Address>>;
}

/// Wallet whose account is set by the host (CLI flag, tests)
pub struct StaticWallet {
    chain_id: Option<u64>,
    account: watch::Sender<Option<Address>>,
}

impl StaticWallet {
    pub fn new(account: Option<Address>, chain_id: Option<u64>) -> Self {
        let (account, _) = watch::channel(account);
        Self { chain_id, account }
    }

    pub fn set_account(&self, account: Option<Address>) {
        self.account.send_replace(account);
    }
}

impl WalletConnector for StaticWallet {
    fn current_account(&self) -> Option<Address> {
        self.account.borrow().clone()
    }

    fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }

    fn watch_account(&self) -> watch::Receiver<Option<Address>> {
        self.account.subscribe()
    }
}

// =============================================================================
// Offline collaborator
// =============================================================================

/// Network stand-in that is always unreachable
pub struct Offline;

fn offline(service: &str) -> StorageError {
    StorageError::ExternalUnavailable(format!("{} is offline", service))
}

#[async_trait]
impl PledgeRegistry for Offline {
    async fn register_pledge(
        &self,
        _request: &RegistrationRequest,
    ) -> Result<RegistryReceipt, StorageError> {
        Err(offline("registry"))
    }

    async fn pledges_by_address(&self, _address: &str) -> Result<Vec<Pledge>, StorageError> {
        Err(offline("registry"))
    }

    async fn all_pledges(&self) -> Result<Vec<Pledge>, StorageError> {
        Err(offline("registry"))
    }
}

#[async_trait]
impl AttestationNetwork for Offline {
    async fn attest(&self, _request: &AttestationRequest) -> Result<AttestationUid, StorageError> {
        Err(offline("attestation network"))
    }

    async fn get_attestation(
        &self,
        _uid: &AttestationUid,
    ) -> Result<Option<RemoteAttestation>, StorageError> {
        Err(offline("attestation network"))
    }

    async fn find_by_content(
        &self,
        _handle: &str,
    ) -> Result<Option<RemoteAttestation>, StorageError> {
        Err(offline("attestation network"))
    }
}

#[async_trait]
impl ContentNetwork for Offline {
    async fn put(&self, _bytes: Vec<u8>) -> Result<String, StorageError> {
        Err(offline("content network"))
    }

    async fn get(&self, _handle: &str) -> Result<Vec<u8>, StorageError> {
        Err(offline("content network"))
    }
}

/// Everything the engine talks to outside the local store
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn PledgeRegistry>,
    pub attestations: Arc<dyn AttestationNetwork>,
    pub content: Option<Arc<dyn ContentNetwork>>,
    pub wallet: Arc<dyn WalletConnector>,
}

impl Collaborators {
    /// No network at all; only the wallet account is known
    pub fn offline(account: Option<Address>, chain_id: Option<u64>) -> Self {
        Self {
            registry: Arc::new(Offline),
            attestations: Arc::new(Offline),
            content: None,
            wallet: Arc::new(StaticWallet::new(account, chain_id)),
        }
    }
}
