//! Resource storage of the local node
//!
//! A bounded table mapping exact resource paths to their payload.
//! The store is owned by the [`Router`](crate::routing::Router) and only ever touched for keys the
//! local node is responsible for.

use dashmap::DashMap;
use log::debug;
use thiserror::Error;

/// Default number of resources a node is willing to hold
pub const DEFAULT_CAPACITY: usize = 100;

/// Resources every node serves right after startup
const STATIC_RESOURCES: [(&str, &[u8]); 3] = [
    ("/static/foo", b"Foo"),
    ("/static/bar", b"Bar"),
    ("/static/baz", b"Baz"),
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("resource table is full ({capacity} entries)")]
    Full { capacity: usize },
}

pub struct ResourceStore {
    /// Paths are compared byte for byte, so lookups are case-sensitive
    resources: DashMap<String, Vec<u8>>,
    capacity: usize,
}

impl ResourceStore {
    /// Creates an empty store holding at most `capacity` resources
    pub fn new(capacity: usize) -> Self {
        ResourceStore {
            resources: DashMap::new(),
            capacity,
        }
    }

    /// Creates a store pre-filled with the static resources
    pub fn with_static_resources(capacity: usize) -> Self {
        let store = ResourceStore::new(capacity);
        for (path, payload) in STATIC_RESOURCES.iter().take(capacity) {
            store.resources.insert(path.to_string(), payload.to_vec());
        }
        store
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.resources.get(path).map(|entry| entry.value().clone())
    }

    /// Inserts or replaces the payload stored under `path`
    ///
    /// Returns whether the path existed before.
    /// Replacing always succeeds, new paths are refused once the table is full.
    pub fn set(&self, path: &str, payload: &[u8]) -> Result<bool, StoreError> {
        if let Some(mut entry) = self.resources.get_mut(path) {
            *entry = payload.to_vec();
            return Ok(true);
        }
        // Counting locks every shard, no entry guard may be held here
        if self.resources.len() >= self.capacity {
            debug!("Refusing to store {}, table is full", path);
            return Err(StoreError::Full {
                capacity: self.capacity,
            });
        }
        self.resources.insert(path.to_owned(), payload.to_vec());
        Ok(false)
    }

    /// Removes `path`, returning whether it existed
    pub fn delete(&self, path: &str) -> bool {
        self.resources.remove(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl Default for ResourceStore {
    fn default() -> Self {
        ResourceStore::with_static_resources(DEFAULT_CAPACITY)
    }
}
