//! Revow Storage - local-first pledge, content and attestation resolution
//!
//! Pledges live on a registry contract; their descriptive content and
//! attestations do not, and earlier versions of the application stored them
//! in several places. This crate reconciles all of them into one answer.
//!
//! ## Architecture
//!
//! - **ContentAddressableStore**: content handle -> JSON payload, six tiers with back-fill
//! - **AttestationLedger**: local attestation records, one per content handle
//! - **LegacyMigrator**: folds superseded storage schemas into the current one
//! - **ReconciliationResolver**: local-first attestation lookup, heals from the network
//! - **PledgeEnricher**: registry pledge -> view model
//! - **Engine**: composition root and user-level flows
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/revow-storage/
//! ├── local.sled/            # Durable key-value store
//! │   ├── revow_ipfs_mapping     # Primary content map
//! │   ├── ipfs_<handle>          # Per-handle content
//! │   ├── revow_attestations     # Attestation ledger
//! │   ├── revow_pledges          # Pledge cache
//! │   └── revow_user_pledges     # Pledge cache, by pledgor
//! └── config.toml            # Configuration
//! ```
//!
//! External services (registry, attestation network, content network,
//! wallet) are traits in [`collaborators`]; any failure on their side
//! degrades to a local answer.

pub mod collaborators;
pub mod config;
pub mod content_store;
pub mod engine;
pub mod enricher;
pub mod error;
pub mod keys;
pub mod kv;
pub mod ledger;
pub mod migration;
pub mod models;
pub mod pledge_cache;
pub mod resolver;
pub mod uid;

// Re-exports
pub use collaborators::{
    AttestationNetwork, Collaborators, ContentNetwork, Offline, PledgeRegistry, StaticWallet,
    WalletConnector,
};
pub use config::Config;
pub use content_store::{compute_handle, ContentAddressableStore, MemoryCache};
pub use engine::{Engine, RegistrationReceipt};
pub use enricher::PledgeEnricher;
pub use error::StorageError;
pub use kv::{KeyValueStore, MemoryStore, SledStore};
pub use ledger::AttestationLedger;
pub use migration::{LegacyEntry, LegacyMigrator, MigrationReport};
pub use models::{
    AttestationDetails, AttestationRecord, CommitmentType, ContentRecord, EnrichedPledge,
    OriginTier, Pledge, PledgeDraft,
};
pub use pledge_cache::PledgeCache;
pub use resolver::ReconciliationResolver;
pub use uid::AttestationUid;
