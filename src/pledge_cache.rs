//! Local copy of registered pledges
//!
//! Used to answer pledge listings while the registry is unreachable.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::keys;
use crate::kv::{read_json_object, update_json_object, KeyValueStore};
use crate::models::Pledge;

pub struct PledgeCache {
    store: Arc<dyn KeyValueStore>,
}

impl PledgeCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Insert or replace `pledge` (keyed by content handle)
    pub fn save(&self, pledge: &Pledge) -> Result<(), StorageError> {
        let value = serde_json::to_value(pledge)?;

        update_json_object(self.store.as_ref(), keys::PLEDGES, |pledges| {
            pledges.insert(pledge.content_handle.clone(), value.clone());
            Ok(())
        })?;

        update_json_object(self.store.as_ref(), keys::USER_PLEDGES, |users| {
            let list = users
                .entry(pledge.pledgor.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !list.is_array() {
                *list = Value::Array(Vec::new());
            }
            if let Value::Array(items) = list {
                let same_handle = |item: &Value| {
                    item.get("contentHandle").and_then(Value::as_str)
                        == Some(pledge.content_handle.as_str())
                };
                match items.iter_mut().find(|item| same_handle(&**item)) {
                    Some(existing) => *existing = value.clone(),
                    None => items.push(value.clone()),
                }
            }
            Ok(())
        })?;

        debug!(handle = %pledge.content_handle, pledgor = %pledge.pledgor, "Cached pledge");
        Ok(())
    }

    pub fn get(&self, handle: &str) -> Result<Option<Pledge>, StorageError> {
        let pledges = read_json_object(self.store.as_ref(), keys::PLEDGES)?;
        Ok(pledges.get(handle).and_then(|v| parse_pledge(handle, v)))
    }

    /// Pledges made by `address`, in the order they were first cached
    pub fn by_pledgor(&self, address: &str) -> Result<Vec<Pledge>, StorageError> {
        let users = read_json_object(self.store.as_ref(), keys::USER_PLEDGES)?;
        let pledges = match users.get(address) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| parse_pledge(address, item))
                .collect(),
            _ => Vec::new(),
        };
        Ok(pledges)
    }

    /// Every cached pledge, oldest registration first
    pub fn all(&self) -> Result<Vec<Pledge>, StorageError> {
        let pledges = read_json_object(self.store.as_ref(), keys::PLEDGES)?;
        let mut all: Vec<Pledge> = pledges
            .iter()
            .filter_map(|(handle, v)| parse_pledge(handle, v))
            .collect();
        all.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        Ok(all)
    }
}

fn parse_pledge(key: &str, value: &Value) -> Option<Pledge> {
    match serde_json::from_value::<Pledge>(value.clone()) {
        Ok(pledge) => Some(pledge),
        Err(e) => {
            warn!(key = %key, error = %e, "Skipping malformed cached pledge");
            None
        }
    }
}
