use std::sync::{Mutex, PoisonError};

use tracing::warn;

use crate::error::KVError;
use crate::traits::KVStore;

/// QuotaKV caps the total size of values stored in an inner KVStore.
///
/// Writes that would push the stored bytes past `limit` fail with
/// `KVError::Unavailable` and leave the inner store untouched, the same way
/// a browser-style storage quota or a full disk behaves. Reads, scans and
/// deletes pass straight through.
///
/// Usage is computed once at construction (full scan) and then tracked
/// incrementally, so the wrapper must own all writes to the inner store.
pub struct QuotaKV<DB: KVStore> {
    db: DB,
    limit: u64,
    used: Mutex<u64>,
}

impl<DB: KVStore> QuotaKV<DB> {
    pub fn new(db: DB, limit: u64) -> Result<Self, KVError> {
        let used = db
            .scan("")?
            .iter()
            .map(|(_, v)| v.len() as u64)
            .sum();
        Ok(Self {
            db,
            limit,
            used: Mutex::new(used),
        })
    }

    /// Bytes currently accounted against the quota.
    pub fn used(&self) -> u64 {
        *self.used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    fn stored_len(&self, key: &str) -> Result<u64, KVError> {
        Ok(self.db.get(key)?.map(|v| v.len() as u64).unwrap_or(0))
    }

    fn check(&self, used: u64, key: &str) -> Result<(), KVError> {
        if used > self.limit {
            warn!(key, used, limit = self.limit, "quota exceeded");
            return Err(KVError::Unavailable(format!(
                "quota exceeded writing '{}' ({} > {} bytes)",
                key, used, self.limit
            )));
        }
        Ok(())
    }
}

impl<DB: KVStore> KVStore for QuotaKV<DB> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KVError> {
        self.db.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KVError> {
        let mut used = self.used.lock().unwrap_or_else(PoisonError::into_inner);
        let next = *used - self.stored_len(key)? + value.len() as u64;
        self.check(next, key)?;
        self.db.set(key, value)?;
        *used = next;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        let mut used = self.used.lock().unwrap_or_else(PoisonError::into_inner);
        let old = self.stored_len(key)?;
        self.db.delete(key)?;
        *used -= old;
        Ok(())
    }

    fn batch_set(&self, entries: &[(&str, &[u8])]) -> Result<(), KVError> {
        let mut used = self.used.lock().unwrap_or_else(PoisonError::into_inner);
        // Check the whole batch before delegating: no partial writes.
        let mut next = *used;
        for (key, value) in entries {
            next = next - self.stored_len(key)? + value.len() as u64;
        }
        if let Some((key, _)) = entries.last() {
            self.check(next, key)?;
        }
        self.db.batch_set(entries)?;
        *used = next;
        Ok(())
    }

    fn batch_delete(&self, keys: &[&str]) -> Result<(), KVError> {
        let mut used = self.used.lock().unwrap_or_else(PoisonError::into_inner);
        let mut freed = 0;
        for key in keys {
            freed += self.stored_len(key)?;
        }
        self.db.batch_delete(keys)?;
        *used -= freed;
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KVError> {
        self.db.scan(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryKV;

    #[test]
    fn write_past_limit_is_unavailable() {
        let kv = QuotaKV::new(MemoryKV::new(), 10).unwrap();
        kv.set("a", b"12345").unwrap();
        assert_eq!(kv.used(), 5);

        let err = kv.set("b", b"123456").unwrap_err();
        assert!(err.is_unavailable(), "got {err}");
        // Nothing was written.
        assert!(kv.get("b").unwrap().is_none());
        assert_eq!(kv.used(), 5);
    }

    #[test]
    fn overwrite_accounts_for_old_value() {
        let kv = QuotaKV::new(MemoryKV::new(), 10).unwrap();
        kv.set("a", b"12345678").unwrap();
        // Replacing 8 bytes with 10 fits; adding 10 more would not.
        kv.set("a", b"1234567890").unwrap();
        assert_eq!(kv.used(), 10);
    }

    #[test]
    fn delete_frees_space() {
        let kv = QuotaKV::new(MemoryKV::new(), 8).unwrap();
        kv.set("a", b"12345678").unwrap();
        assert!(kv.set("b", b"1").is_err());
        kv.delete("a").unwrap();
        kv.set("b", b"1").unwrap();
        assert_eq!(kv.used(), 1);
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let kv = QuotaKV::new(MemoryKV::new(), 6).unwrap();
        let err = kv.batch_set(&[("a", b"123"), ("b", b"1234")]).unwrap_err();
        assert!(err.is_unavailable());
        assert!(kv.scan("").unwrap().is_empty());

        kv.batch_set(&[("a", b"123"), ("b", b"123")]).unwrap();
        kv.batch_delete(&["a"]).unwrap();
        assert_eq!(kv.used(), 3);
    }

    #[test]
    fn existing_data_counts_at_construction() {
        let inner = MemoryKV::new();
        inner.set("pre", b"1234").unwrap();
        let kv = QuotaKV::new(inner, 5).unwrap();
        assert_eq!(kv.used(), 4);
        assert!(kv.set("x", b"12").is_err());
    }
}
