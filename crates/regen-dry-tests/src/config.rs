// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use regen_config::{ConfigError, ConfigStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// In-memory implementation of [`ConfigStore`] for testing.
///
/// Clones share state. Tracks call counts and can simulate failures.
///
/// # Example
///
/// ```
/// use regen_config::ConfigService;
/// use regen_dry_tests::InMemoryConfigStore;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
///
/// service.save("scheduler", &serde_json::json!({"lock_step": false})).unwrap();
/// assert_eq!(store.load_count(), 0);
/// assert_eq!(store.save_count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    data: HashMap<String, Vec<u8>>,
    load_count: usize,
    save_count: usize,
    fail_on_load: bool,
    fail_on_save: bool,
}

impl InMemoryConfigStore {
    /// Create a new empty in-memory config store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with the given key-value pairs.
    pub fn with_data(data: impl IntoIterator<Item = (String, Vec<u8>)>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data: data.into_iter().collect(),
                ..Default::default()
            })),
        }
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        f(&mut self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Configure the store to fail on load operations.
    pub fn set_fail_on_load(&self, fail: bool) {
        self.with_inner(|inner| inner.fail_on_load = fail);
    }

    /// Configure the store to fail on save operations.
    pub fn set_fail_on_save(&self, fail: bool) {
        self.with_inner(|inner| inner.fail_on_save = fail);
    }

    /// Number of `load_raw` attempts, failed ones included.
    pub fn load_count(&self) -> usize {
        self.with_inner(|inner| inner.load_count)
    }

    /// Number of `save_raw` attempts, failed ones included.
    pub fn save_count(&self) -> usize {
        self.with_inner(|inner| inner.save_count)
    }

    /// Check if a key exists in the store.
    pub fn contains_key(&self, key: &str) -> bool {
        self.with_inner(|inner| inner.data.contains_key(key))
    }

    /// Raw bytes stored under `key`, without counting a load.
    pub fn peek(&self, key: &str) -> Option<Vec<u8>> {
        self.with_inner(|inner| inner.data.get(key).cloned())
    }
}

impl std::fmt::Debug for InMemoryConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.with_inner(|inner| {
            f.debug_struct("InMemoryConfigStore")
                .field("keys", &inner.data.keys().collect::<Vec<_>>())
                .field("load_count", &inner.load_count)
                .field("save_count", &inner.save_count)
                .finish_non_exhaustive()
        })
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        self.with_inner(|inner| {
            inner.load_count += 1;
            if inner.fail_on_load {
                return Err(ConfigError::Other("simulated load failure".into()));
            }
            inner.data.get(key).cloned().ok_or(ConfigError::NotFound)
        })
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        self.with_inner(|inner| {
            inner.save_count += 1;
            if inner.fail_on_save {
                return Err(ConfigError::Other("simulated save failure".into()));
            }
            inner.data.insert(key.to_owned(), data.to_vec());
            Ok(())
        })
    }
}
