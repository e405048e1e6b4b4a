use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use super::error::{StorageError, StorageResult};
use super::key_value::KeyValueStore;

/// In-memory key/value store.
/// Useful for testing and development; writes can be made to fail on demand
/// to exercise the best-effort persistence path.
#[derive(Default)]
pub struct InMemoryStore {
    values: Mutex<HashMap<String, Value>>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set` fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StorageError::Initialization {
                message: "Simulated write failure".to_string(),
            });
        }
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_save_and_load() {
        let store = InMemoryStore::new();
        store.set("k", json!({"a": 1})).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!({"a": 1})));
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_simulated_write_failure() {
        let store = InMemoryStore::new();
        store.fail_writes(true);
        assert!(store.set("k", json!(1)).is_err());

        store.fail_writes(false);
        store.set("k", json!(2)).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!(2)));
    }
}
