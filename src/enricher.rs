//! Pledge enrichment
//!
//! Layers locally resolved content text and attestation metadata onto the
//! pledges the registry returns. Enrichment is best-effort: any failure
//! leaves the affected fields blank and the pledge in its place.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::content_store::ContentAddressableStore;
use crate::ledger::AttestationLedger;
use crate::models::{EnrichedPledge, Pledge};
use crate::resolver::ReconciliationResolver;

/// Field names the description was stored under over time
pub const DESCRIPTION_ALIASES: &[&str] = &["description", "desc", "descricao", "text"];

/// Field names the additional information was stored under over time
pub const ADDITIONAL_INFO_ALIASES: &[&str] = &[
    "additionalInfo",
    "additional_info",
    "info",
    "informacoes",
    "details",
];

pub struct PledgeEnricher {
    content: Arc<ContentAddressableStore>,
    resolver: Arc<ReconciliationResolver>,
    ledger: Arc<AttestationLedger>,
}

impl PledgeEnricher {
    pub fn new(
        content: Arc<ContentAddressableStore>,
        resolver: Arc<ReconciliationResolver>,
        ledger: Arc<AttestationLedger>,
    ) -> Self {
        Self {
            content,
            resolver,
            ledger,
        }
    }

    pub async fn enrich_one(&self, mut pledge: Pledge) -> EnrichedPledge {
        match self.content.get_or_fetch(&pledge.content_handle).await {
            Ok(Some(record)) => apply_content(&mut pledge, &record.payload),
            Ok(None) => debug!(handle = %pledge.content_handle, "No content for pledge"),
            Err(e) => warn!(handle = %pledge.content_handle, error = %e, "Content lookup failed"),
        }

        let mut enriched = EnrichedPledge::unenriched(pledge);
        match self.resolver.resolve(&enriched.pledge).await {
            Ok(Some(record)) => {
                enriched.attestation_link = Some(self.ledger.link(&record.uid));
                enriched.attestation_uid = Some(record.uid);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(handle = %enriched.pledge.content_handle, error = %e, "Attestation lookup failed")
            }
        }
        enriched
    }

    /// Enrich in input order, one pledge at a time
    pub async fn enrich_many(&self, pledges: Vec<Pledge>) -> Vec<EnrichedPledge> {
        let mut enriched = Vec::with_capacity(pledges.len());
        for pledge in pledges {
            enriched.push(self.enrich_one(pledge).await);
        }
        enriched
    }
}

/// Copy known text fields from a content payload; blank values are ignored
pub fn apply_content(pledge: &mut Pledge, payload: &Value) {
    if let Some(description) = first_text(payload, DESCRIPTION_ALIASES) {
        pledge.description = description.to_string();
    }
    if let Some(info) = first_text(payload, ADDITIONAL_INFO_ALIASES) {
        pledge.additional_info = info.to_string();
    }
}

fn first_text<'a>(payload: &'a Value, aliases: &[&str]) -> Option<&'a str> {
    aliases
        .iter()
        .filter_map(|alias| payload.get(*alias).and_then(Value::as_str))
        .find(|text| !text.trim().is_empty())
}
