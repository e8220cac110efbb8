//! Browser storage snapshot restored into a reconstruction.
//!
//! Storage is not part of the change log. The recorder saves it separately,
//! keyed by origin, and the reconstructor restores it once at first load.

use crate::error::{ReplayError, ReplayResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One IndexedDB object store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexedDbStore {
    /// Store name
    pub name: String,
    /// Key path, if the store uses in-line keys
    pub key_path: Option<String>,
    /// Records as (JSON key, JSON value)
    pub records: Vec<(String, String)>,
}

/// One IndexedDB database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexedDbDatabase {
    /// Database name
    pub name: String,
    /// Schema version
    pub version: u64,
    /// Object stores
    pub object_stores: Vec<IndexedDbStore>,
}

/// Storage of every origin the session touched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSnapshot {
    /// `localStorage` by origin
    pub local_storage: BTreeMap<String, IndexMap<String, String>>,
    /// `sessionStorage` by origin
    pub session_storage: BTreeMap<String, IndexMap<String, String>>,
    /// IndexedDB databases by origin
    pub indexed_db: BTreeMap<String, Vec<IndexedDbDatabase>>,
}

impl StorageSnapshot {
    /// Parse a snapshot from JSON
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::Snapshot`] if the JSON is not a snapshot
    pub fn from_json(json: &str) -> ReplayResult<Self> {
        serde_json::from_str(json).map_err(|e| ReplayError::Snapshot {
            reason: e.to_string(),
        })
    }

    /// Whether nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.local_storage.is_empty() && self.session_storage.is_empty() && self.indexed_db.is_empty()
    }

    /// Every origin with any stored data
    #[must_use]
    pub fn origins(&self) -> Vec<&str> {
        let mut origins: Vec<&str> = self
            .local_storage
            .keys()
            .chain(self.session_storage.keys())
            .chain(self.indexed_db.keys())
            .map(String::as_str)
            .collect();
        origins.sort_unstable();
        origins.dedup();
        origins
    }

    /// `localStorage` of one origin
    #[must_use]
    pub fn local_storage_for(&self, origin: &str) -> Option<&IndexMap<String, String>> {
        self.local_storage.get(origin)
    }

    /// `sessionStorage` of one origin
    #[must_use]
    pub fn session_storage_for(&self, origin: &str) -> Option<&IndexMap<String, String>> {
        self.session_storage.get(origin)
    }
}
