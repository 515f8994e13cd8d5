//! Nullable store: thread-safe in-memory PS data for testing.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use ps_store::{PsDataStore, StoreError};
use serde_json::Value;

/// An in-memory key/value store with switchable write failures.
#[derive(Default)]
pub struct MemoryPsDataStore {
    data: Mutex<BTreeMap<String, Value>>,
    fail_writes: AtomicBool,
}

impl MemoryPsDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with an I/O error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::new(io::ErrorKind::Other, "writes disabled")));
        }
        Ok(())
    }
}

impl PsDataStore for MemoryPsDataStore {
    fn get_ps_data(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    fn set_ps_data(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.check_writable()?;
        self.data.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    fn pop_ps_data(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.check_writable()?;
        Ok(self.data.lock().unwrap().remove(key))
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ps_store::PsDataStoreExt;

    #[test]
    fn typed_values_and_prefixes() {
        let store = MemoryPsDataStore::new();
        store.set_typed("a:1", &5u32).unwrap();
        store.set_typed("a:2", &6u32).unwrap();
        store.set_typed("b", &7u32).unwrap();
        assert_eq!(store.get_typed::<u32>("a:2").unwrap(), Some(6));
        assert_eq!(store.keys_with_prefix("a:").unwrap().len(), 2);
        assert!(store.pop_ps_data("b").unwrap().is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn injected_write_failure() {
        let store = MemoryPsDataStore::new();
        store.fail_writes(true);
        assert!(matches!(store.set_typed("k", &1u8), Err(StoreError::Io(_))));
        store.fail_writes(false);
        assert!(store.set_typed("k", &1u8).is_ok());
    }
}
