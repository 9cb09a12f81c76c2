//! Reconciliation Resolver
//!
//! Answers "which attestation, if any, covers this pledge's content?".
//! Local state is authoritative for the answer; the attestation network is
//! consulted to confirm anchored records and to recover records this device
//! never saw, which are then adopted into the ledger.

use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::collaborators::{AttestationNetwork, RemoteAttestation};
use crate::error::StorageError;
use crate::ledger::{party_or_unknown, AttestationLedger};
use crate::migration::{LegacyMigrator, MigrationReport};
use crate::models::{AttestationRecord, Pledge};

pub struct ReconciliationResolver {
    ledger: Arc<AttestationLedger>,
    migrator: Arc<LegacyMigrator>,
    network: Arc<dyn AttestationNetwork>,
    migrated: OnceCell<MigrationReport>,
}

impl ReconciliationResolver {
    pub fn new(
        ledger: Arc<AttestationLedger>,
        migrator: Arc<LegacyMigrator>,
        network: Arc<dyn AttestationNetwork>,
    ) -> Self {
        Self {
            ledger,
            migrator,
            network,
            migrated: OnceCell::new(),
        }
    }

    /// Run the legacy migration once per resolver. A failed run is retried
    /// on the next call.
    pub async fn ensure_migrated(&self) -> Result<MigrationReport, StorageError> {
        self.migrated
            .get_or_try_init(|| async { self.migrator.migrate() })
            .await
            .cloned()
    }

    /// Attestation covering `pledge`'s content, if any
    pub async fn resolve(&self, pledge: &Pledge) -> Result<Option<AttestationRecord>, StorageError> {
        if let Err(e) = self.ensure_migrated().await {
            warn!(error = %e, "Legacy migration failed, resolving without it");
        }

        let handle = pledge.content_handle.trim();
        if let Some(record) = self.ledger.find_by_handle(handle)? {
            if !record.is_local {
                self.confirm(&record).await;
            }
            return Ok(Some(record));
        }

        let remote = match self.network.find_by_content(handle).await {
            Ok(Some(remote)) => remote,
            Ok(None) => {
                debug!(handle = %handle, "No attestation anywhere");
                return Ok(None);
            }
            Err(e) => {
                debug!(handle = %handle, error = %e, "Attestation network unavailable");
                return Ok(None);
            }
        };

        self.heal(pledge, handle, remote)
    }

    /// Existing attestation for `pledge`, or a new local one by `attester`
    pub async fn create_or_get(
        &self,
        pledge: &Pledge,
        attester: &str,
    ) -> Result<AttestationRecord, StorageError> {
        if let Err(e) = self.ensure_migrated().await {
            warn!(error = %e, "Legacy migration failed before create");
        }
        self.ledger.create(pledge, attester, &pledge.pledgor)
    }

    /// Check an anchored record against the network. Never changes the answer.
    async fn confirm(&self, record: &AttestationRecord) {
        match self.network.get_attestation(&record.uid).await {
            Ok(Some(_)) => debug!(uid = %record.uid, "Attestation confirmed"),
            Ok(None) => warn!(uid = %record.uid, "Attestation not found on network, keeping local record"),
            Err(e) => debug!(uid = %record.uid, error = %e, "Could not confirm attestation"),
        }
    }

    fn heal(
        &self,
        pledge: &Pledge,
        handle: &str,
        remote: RemoteAttestation,
    ) -> Result<Option<AttestationRecord>, StorageError> {
        if let Some(remote_handle) = remote.content_handle.as_deref() {
            if remote_handle != handle {
                warn!(
                    handle = %handle,
                    remote_handle = %remote_handle,
                    uid = %remote.uid,
                    "Network returned an attestation for different content"
                );
                return Ok(None);
            }
        }

        let attester = party_or_unknown(&remote.attester);
        let recipient = match remote.recipient.trim() {
            "" => attester.clone(),
            r => r.to_string(),
        };
        let record = AttestationRecord {
            uid: remote.uid,
            content_handle: handle.to_string(),
            attester,
            recipient,
            created_at: remote.created_at,
            pledge_snapshot: serde_json::to_value(pledge)?,
            is_local: false,
        };

        if self.ledger.adopt(record.clone())? {
            info!(uid = %record.uid, handle = %handle, "Recovered attestation from network");
            return Ok(Some(record));
        }
        // Someone else recorded this handle in the meantime
        self.ledger.find_by_handle(handle)
    }
}
