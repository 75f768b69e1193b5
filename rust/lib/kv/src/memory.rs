use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::error::KVError;
use crate::traits::KVStore;

/// MemoryKV is a volatile KVStore: everything lives in a `BTreeMap` and is
/// gone when the value is dropped. It backs the session-scoped emergency
/// tier and doubles as a cheap store for tests.
#[derive(Default)]
pub struct MemoryKV {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKV {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KVStore for MemoryKV {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KVError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KVError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn batch_set(&self, batch: &[(&str, &[u8])]) -> Result<(), KVError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in batch {
            entries.insert((*key).to_string(), value.to_vec());
        }
        Ok(())
    }

    fn batch_delete(&self, keys: &[&str]) -> Result<(), KVError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KVError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crud_and_scan() {
        let kv = MemoryKV::new();
        assert!(kv.is_empty());

        kv.set("s:b", b"2").unwrap();
        kv.set("s:a", b"1").unwrap();
        kv.set("t:a", b"3").unwrap();
        assert_eq!(kv.len(), 3);

        let hits = kv.scan("s:").unwrap();
        assert_eq!(
            hits,
            vec![("s:a".to_string(), b"1".to_vec()), ("s:b".to_string(), b"2".to_vec())]
        );

        kv.batch_delete(&["s:a", "s:b"]).unwrap();
        assert!(kv.scan("s:").unwrap().is_empty());
        assert_eq!(kv.get("t:a").unwrap().as_deref(), Some(&b"3"[..]));
    }

    #[test]
    fn dropped_store_loses_everything() {
        let kv = MemoryKV::new();
        kv.set("k", b"v").unwrap();
        drop(kv);
        assert!(MemoryKV::new().get("k").unwrap().is_none());
    }
}
