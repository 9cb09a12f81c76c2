//! Persisted key layout
//!
//! These names are shared with earlier versions of the application and must
//! never change. New shapes are introduced by additive migration only.

/// Primary content map: handle -> `{data, timestamp, source}`
pub const PRIMARY_MAP: &str = "revow_ipfs_mapping";

/// Prefix of the per-handle content keys in the durable and session stores
pub const CONTENT_PREFIX: &str = "ipfs_";

/// Attestation ledger table: uid -> record
pub const ATTESTATIONS: &str = "revow_attestations";

/// Pledge cache: handle -> pledge
pub const PLEDGES: &str = "revow_pledges";

/// Pledge cache index: pledgor -> [pledge]
pub const USER_PLEDGES: &str = "revow_user_pledges";

/// Locally generated attestations written by superseded versions: uid -> record
pub const LEGACY_LOCAL_ATTESTATIONS: &str = "revow_local_attestations";

/// Attestation mappings written by superseded storage schemes
pub const LEGACY_ATTESTATION_KEYS: &[&str] = &[
    "easAttestations",
    "attestations",
    "pledgeEasMap",
    "easData",
    "pledgeAttestations",
    "allAttestations",
    "revow_pledge_attestations",
    LEGACY_LOCAL_ATTESTATIONS,
];

/// Content mappings written by superseded storage schemes (handle -> payload)
pub const LEGACY_CONTENT_KEYS: &[&str] = &["ipfsMapping", "revow_ipfs_data"];

/// Prefixed content key for `handle`
pub fn content_key(handle: &str) -> String {
    format!("{}{}", CONTENT_PREFIX, handle)
}

/// Namespaced document keys owned by this crate (legacy keys included)
pub fn namespaced_keys() -> impl Iterator<Item = &'static str> {
    [PRIMARY_MAP, ATTESTATIONS, PLEDGES, USER_PLEDGES]
        .into_iter()
        .chain(LEGACY_ATTESTATION_KEYS.iter().copied())
        .chain(LEGACY_CONTENT_KEYS.iter().copied())
}

/// Whether `key` is a document key rather than a bare content handle
pub fn is_namespaced(key: &str) -> bool {
    key.starts_with(CONTENT_PREFIX) || namespaced_keys().any(|k| k == key)
}
