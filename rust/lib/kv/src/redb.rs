use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::KVError;
use crate::traits::KVStore;

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// RedbStore is a KVStore implementation backed by redb, a pure-Rust embedded
/// key-value database. It is the durable backend for the primary and mirror
/// tiers.
pub struct RedbStore {
    db: Arc<Database>,
}

/// Map any redb error into a KVError. Out-of-space conditions become
/// `Unavailable` so callers can divert the write to another tier.
fn kv_err(e: impl Into<redb::Error>) -> KVError {
    let e: redb::Error = e.into();
    match &e {
        redb::Error::Io(io)
            if matches!(io.kind(), ErrorKind::StorageFull | ErrorKind::QuotaExceeded) =>
        {
            KVError::Unavailable(e.to_string())
        }
        _ => KVError::Storage(e.to_string()),
    }
}

impl RedbStore {
    /// Open or create a redb database at the given path.
    pub fn open(path: &Path) -> Result<Self, KVError> {
        let db = Database::create(path).map_err(kv_err)?;

        // Ensure the table exists by doing a write transaction.
        let write_txn = db.begin_write().map_err(kv_err)?;
        {
            let _table = write_txn.open_table(TABLE).map_err(kv_err)?;
        }
        write_txn.commit().map_err(kv_err)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl KVStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KVError> {
        let read_txn = self.db.begin_read().map_err(kv_err)?;
        let table = read_txn.open_table(TABLE).map_err(kv_err)?;

        match table.get(key) {
            Ok(Some(val)) => Ok(Some(val.value().to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(kv_err(e)),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KVError> {
        let write_txn = self.db.begin_write().map_err(kv_err)?;
        {
            let mut table = write_txn.open_table(TABLE).map_err(kv_err)?;
            table.insert(key, value).map_err(kv_err)?;
        }
        write_txn.commit().map_err(kv_err)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        let write_txn = self.db.begin_write().map_err(kv_err)?;
        {
            let mut table = write_txn.open_table(TABLE).map_err(kv_err)?;
            table.remove(key).map_err(kv_err)?;
        }
        write_txn.commit().map_err(kv_err)?;
        Ok(())
    }

    fn batch_set(&self, entries: &[(&str, &[u8])]) -> Result<(), KVError> {
        let write_txn = self.db.begin_write().map_err(kv_err)?;
        {
            let mut table = write_txn.open_table(TABLE).map_err(kv_err)?;
            for (key, value) in entries {
                table.insert(*key, *value).map_err(kv_err)?;
            }
        }
        write_txn.commit().map_err(kv_err)?;
        Ok(())
    }

    fn batch_delete(&self, keys: &[&str]) -> Result<(), KVError> {
        let write_txn = self.db.begin_write().map_err(kv_err)?;
        {
            let mut table = write_txn.open_table(TABLE).map_err(kv_err)?;
            for key in keys {
                table.remove(*key).map_err(kv_err)?;
            }
        }
        write_txn.commit().map_err(kv_err)?;
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KVError> {
        let read_txn = self.db.begin_read().map_err(kv_err)?;
        let table = read_txn.open_table(TABLE).map_err(kv_err)?;

        let mut results = Vec::new();
        let iter = table.range(prefix..).map_err(kv_err)?;

        for entry in iter {
            let entry = entry.map_err(kv_err)?;
            let key = entry.0.value().to_string();
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key, entry.1.value().to_vec()));
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (RedbStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(&dir.path().join("test.redb")).unwrap();
        (store, dir)
    }

    #[test]
    fn set_get_delete() {
        let (store, _dir) = open_temp();
        assert!(store.get("a").unwrap().is_none());

        store.set("a", b"one").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some(&b"one"[..]));

        store.delete("a").unwrap();
        assert!(store.get("a").unwrap().is_none());

        // Deleting again is fine.
        store.delete("a").unwrap();
    }

    #[test]
    fn scan_stops_at_prefix_boundary() {
        let (store, _dir) = open_temp();
        store
            .batch_set(&[
                ("inventory:u1:snapshot:p1:001", b"x"),
                ("inventory:u1:snapshot:p1:002", b"y"),
                ("inventory:u1:snapshot:p10:001", b"z"),
                ("inventory:u2:snapshot:p1:001", b"w"),
            ])
            .unwrap();

        let hits = store.scan("inventory:u1:snapshot:p1:").unwrap();
        let keys: Vec<_> = hits.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["inventory:u1:snapshot:p1:001", "inventory:u1:snapshot:p1:002"]
        );
    }

    #[test]
    fn batch_delete_removes_all() {
        let (store, _dir) = open_temp();
        store.batch_set(&[("k1", b"1"), ("k2", b"2"), ("k3", b"3")]).unwrap();
        store.batch_delete(&["k1", "k3"]).unwrap();
        let left = store.scan("k").unwrap();
        assert_eq!(left, vec![("k2".to_string(), b"2".to_vec())]);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persist.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            store.set("inventory:u1:platforms", b"{}").unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        assert_eq!(
            store.get("inventory:u1:platforms").unwrap().as_deref(),
            Some(&b"{}"[..])
        );
    }
}
