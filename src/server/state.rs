//! Shared application state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

use crate::config::Config;
use crate::gateway::SecurityGateway;

/// Application state shared across handlers
#[derive(Debug)]
pub struct AppState {
    /// The gateway in front of every route
    pub gateway: Arc<SecurityGateway>,
    /// Demo resource store
    pub resources: ResourceStore,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Create state with a fresh gateway
    pub fn new(config: Config) -> Self {
        Self::with_gateway(Arc::new(SecurityGateway::new(config)))
    }

    /// Create state around an existing gateway
    pub fn with_gateway(gateway: Arc<SecurityGateway>) -> Self {
        Self {
            gateway,
            resources: ResourceStore::default(),
            start_time: Instant::now(),
        }
    }

    /// Effective config
    pub fn config(&self) -> &Config {
        self.gateway.config()
    }

    /// Get server uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// In-memory resources behind the protected demo endpoints.
#[derive(Debug, Default)]
pub struct ResourceStore {
    items: DashMap<u64, Value>,
    next_id: AtomicU64,
}

impl ResourceStore {
    /// Store an item, returning its id
    pub fn insert(&self, item: Value) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.items.insert(id, item);
        id
    }

    /// Fetch an item
    pub fn get(&self, id: u64) -> Option<Value> {
        self.items.get(&id).map(|item| item.value().clone())
    }

    /// Replace an existing item. Returns whether it existed.
    pub fn replace(&self, id: u64, item: Value) -> bool {
        match self.items.get_mut(&id) {
            Some(mut slot) => {
                *slot = item;
                true
            },
            None => false,
        }
    }

    /// Remove an item. Returns whether it existed.
    pub fn remove(&self, id: u64) -> bool {
        self.items.remove(&id).is_some()
    }

    /// All items, ordered by id
    pub fn list(&self) -> Vec<(u64, Value)> {
        let mut items: Vec<_> = self
            .items
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        items.sort_by_key(|(id, _)| *id);
        items
    }

    /// Number of stored items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_store() {
        let store = ResourceStore::default();
        let a = store.insert(json!({"name": "a"}));
        let b = store.insert(json!({"name": "b"}));

        assert_eq!((a, b), (1, 2));
        assert_eq!(store.get(a).unwrap()["name"], "a");
        assert_eq!(store.list().len(), 2);

        assert!(store.replace(b, json!({"name": "b2"})));
        assert!(!store.replace(99, json!(null)));
        assert_eq!(store.get(b).unwrap()["name"], "b2");

        assert!(store.remove(a));
        assert!(!store.remove(a));
        assert_eq!(store.len(), 1);
    }
}
