//! Backing store contract and the in-memory driver
//!
//! A driver is the raw key-value primitive underneath the token store: string
//! keys, string values, no ordering or atomicity beyond a single key. Hosts
//! plug in their platform secure storage by implementing `StorageDriver`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use common::BoxFuture;

use crate::error::{Error, Result};

/// Opaque key-value backing store.
///
/// Uses `BoxFuture` return types for dyn-compatibility (`Arc<dyn StorageDriver>`).
/// Every failure must be reported as an error; a driver must never turn an I/O
/// problem into `Ok(None)`.
pub trait StorageDriver: Send + Sync {
    /// Read the value at `key`, `None` if absent.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

    /// Write `value` at `key`, replacing any previous value.
    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Remove `key`. Removing an absent key is not an error.
    fn del<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Process-local driver backed by a `HashMap`.
///
/// Nothing survives the process. Used by tests and by hosts that only need a
/// session for the lifetime of the app.
#[derive(Debug, Default)]
pub struct MemoryStorageDriver {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorageDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the raw key space, sorted by key.
    pub fn entries(&self) -> BTreeMap<String, String> {
        match self.entries.lock() {
            Ok(entries) => entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Err(poisoned) => poisoned
                .get_ref()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Whether a raw (already scoped) key exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> Result<T> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Driver("memory store lock poisoned".into()))?;
        Ok(f(&mut entries))
    }
}

impl StorageDriver for MemoryStorageDriver {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { self.with_entries(|entries| entries.get(key).cloned()) })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.with_entries(|entries| {
                entries.insert(key.to_owned(), value.to_owned());
            })
        })
    }

    fn del<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.with_entries(|entries| {
                entries.remove(key);
            })
        })
    }
}
