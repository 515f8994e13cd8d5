//! Key/value contract for persisted mixing data.
//!
//! The mixing core stores its workflows, timestamps and bookkeeping under
//! string keys as JSON values. Backends only need to honour get/set/pop;
//! typed access goes through [`PsDataStoreExt`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::blob::{read_compressed_json, write_compressed_json};
use crate::StoreError;

/// Backend-agnostic key/value store for mixing data.
pub trait PsDataStore: Send + Sync {
    fn get_ps_data(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set_ps_data(&self, key: &str, value: Value) -> Result<(), StoreError>;
    fn pop_ps_data(&self, key: &str) -> Result<Option<Value>, StoreError>;
    /// All keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Typed helpers over any [`PsDataStore`].
pub trait PsDataStoreExt: PsDataStore {
    fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get_ps_data(key)? {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    fn set_typed<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.set_ps_data(key, serde_json::to_value(value)?)
    }
}

impl<S: PsDataStore + ?Sized> PsDataStoreExt for S {}

/// File-backed store: one gzip JSON blob rewritten on every mutation.
pub struct FilePsDataStore {
    path: PathBuf,
    data: Mutex<BTreeMap<String, Value>>,
}

impl FilePsDataStore {
    /// Open the store, starting empty if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let data = match read_compressed_json(&path) {
            Ok(d) => d,
            Err(StoreError::NotFound(_)) => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        Ok(Self { path, data: Mutex::new(data) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Value>>, StoreError> {
        self.data
            .lock()
            .map_err(|_| StoreError::Corruption("ps data lock poisoned".into()))
    }
}

impl PsDataStore for FilePsDataStore {
    fn get_ps_data(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set_ps_data(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut data = self.lock()?;
        data.insert(key.to_string(), value);
        write_compressed_json(&self.path, &*data)
    }

    fn pop_ps_data(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut data = self.lock()?;
        let old = data.remove(key);
        if old.is_some() {
            write_compressed_json(&self.path, &*data)?;
        }
        Ok(old)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_values_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ps_data.gz");
        {
            let store = FilePsDataStore::open(&path).unwrap();
            store.set_typed("last_mix_stop_time", &1_700_000_000u64).unwrap();
            store.set_typed("denominate_wfl:a", &vec!["x"]).unwrap();
            store.set_typed("denominate_wfl:b", &vec!["y"]).unwrap();
        }
        let store = FilePsDataStore::open(&path).unwrap();
        let t: Option<u64> = store.get_typed("last_mix_stop_time").unwrap();
        assert_eq!(t, Some(1_700_000_000));
        assert_eq!(
            store.keys_with_prefix("denominate_wfl:").unwrap(),
            vec!["denominate_wfl:a".to_string(), "denominate_wfl:b".to_string()]
        );
    }

    #[test]
    fn pop_removes_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePsDataStore::open(dir.path().join("d.gz")).unwrap();
        store.set_ps_data("k", Value::from(5)).unwrap();
        assert_eq!(store.pop_ps_data("k").unwrap(), Some(Value::from(5)));
        assert_eq!(store.pop_ps_data("k").unwrap(), None);
        assert_eq!(store.get_ps_data("k").unwrap(), None);
    }
}
