//! Multi-tier durability store for platforms.
//!
//! Tiers, in write order:
//!
//! 1. **primary**: one keyed JSON object per user holding every platform.
//!    Authoritative for reads.
//! 2. **snapshot**: an immutable copy of the written entity, at most
//!    `retention` per entity id. Never deleted with the entity.
//! 3. **mirror**: the same keyed collection in a second backend.
//! 4. **emergency**: only when (1) failed. The entity alone under a unique
//!    key, in the primary backend and in the volatile session backend.
//!    Copies of an id are dropped once a later primary write or delete of
//!    that id lands, so recovery only ever sees unreconciled state.
//!
//! Tiers are attempted independently; a write succeeds when the primary or
//! the emergency tier captured it. Keys are namespaced per user:
//!
//! ```text
//! inventory:{user}:platforms
//! inventory:{user}:snapshot:{id}:{millis:013}{seq:06}
//! inventory:{user}:emergency:{id}:{millis:013}{seq:06}
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, warn};
use yard_core::{now_millis, ServiceError};
use yard_kv::{KVError, KVStore, MemoryKV};

use crate::model::Platform;

const STAMP_LEN: usize = 19;

/// The three backends the tiers are spread over.
#[derive(Clone)]
pub struct Backends {
    /// Durable store for the primary collection, snapshots and durable
    /// emergency copies.
    pub primary: Arc<dyn KVStore>,
    /// Independent durable store for the mirror collection.
    pub mirror: Arc<dyn KVStore>,
    /// Volatile, session-scoped store for emergency copies.
    pub session: Arc<dyn KVStore>,
}

impl Backends {
    /// All three tiers in memory. Nothing survives the process.
    pub fn in_memory() -> Self {
        Self {
            primary: Arc::new(MemoryKV::new()),
            mirror: Arc::new(MemoryKV::new()),
            session: Arc::new(MemoryKV::new()),
        }
    }
}

// ── Write outcome ───────────────────────────────────────────────────

/// Result of one tier's write attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TierOutcome {
    /// The tier was not attempted.
    #[default]
    Skipped,
    Written,
    Failed(String),
}

impl TierOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, TierOutcome::Written)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TierOutcome::Failed(_))
    }

    fn from_result(result: Result<(), KVError>) -> Self {
        match result {
            Ok(()) => TierOutcome::Written,
            Err(e) => TierOutcome::Failed(e.to_string()),
        }
    }
}

/// Per-tier outcome of a single logical write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub primary: TierOutcome,
    pub snapshot: TierOutcome,
    pub mirror: TierOutcome,
    pub emergency: TierOutcome,
}

impl WriteReport {
    /// The logically required minimum: the primary tier, or failing that
    /// the emergency tier, captured the write.
    pub fn is_durable(&self) -> bool {
        self.primary.is_written() || self.emergency.is_written()
    }

    pub fn used_emergency(&self) -> bool {
        self.emergency.is_written()
    }
}

// ── Read results ────────────────────────────────────────────────────

/// A primary-collection entry that could not be parsed. Kept verbatim in
/// the store; surfaced by the integrity pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptRecord {
    pub key: String,
    pub error: String,
}

/// Where a load found its collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Primary,
    /// The primary collection was missing or unreadable.
    Mirror,
    /// Nothing stored yet.
    Empty,
}

#[derive(Debug, Clone)]
pub struct Loaded {
    pub source: LoadSource,
    /// (collection key, platform) pairs.
    pub platforms: Vec<(String, Platform)>,
    pub corrupt: Vec<CorruptRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryTier {
    Emergency,
    Snapshot,
}

/// An entity found outside the primary collection.
#[derive(Debug, Clone)]
pub struct Recovered {
    pub tier: RecoveryTier,
    pub key: String,
    /// Millis since epoch when the copy was taken.
    pub taken_at: i64,
    pub platform: Platform,
}

// ── DurableStore ────────────────────────────────────────────────────

/// Write-through persistence for one user's platforms.
pub struct DurableStore {
    user: String,
    backends: Backends,
    retention: usize,
    seq: AtomicU64,
}

impl DurableStore {
    pub fn new(user: impl Into<String>, backends: Backends, retention: usize) -> Self {
        Self {
            user: user.into(),
            backends,
            retention: retention.max(1),
            seq: AtomicU64::new(0),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    // ── keys ──

    fn collection_key(&self) -> String {
        format!("inventory:{}:platforms", self.user)
    }

    fn snapshot_root(&self) -> String {
        format!("inventory:{}:snapshot:", self.user)
    }

    fn snapshot_prefix(&self, id: &str) -> String {
        format!("{}{}:", self.snapshot_root(), id)
    }

    fn emergency_prefix(&self) -> String {
        format!("inventory:{}:emergency:", self.user)
    }

    fn emergency_prefix_for(&self, id: &str) -> String {
        format!("{}{}:", self.emergency_prefix(), id)
    }

    /// Unique, lexicographically ordered stamp: millis then a sequence.
    fn stamp(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        format!("{:013}{:06}", now_millis(), seq)
    }

    fn stamp_of(key: &str) -> &str {
        key.len()
            .checked_sub(STAMP_LEN)
            .and_then(|start| key.get(start..))
            .unwrap_or(key)
    }

    fn stamp_millis(key: &str) -> i64 {
        key.len()
            .checked_sub(STAMP_LEN)
            .and_then(|start| key.get(start..start + 13))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    // ── collection helpers ──

    fn read_collection(&self, kv: &dyn KVStore) -> Result<Option<Map<String, Value>>, KVError> {
        let Some(bytes) = kv.get(&self.collection_key())? else {
            return Ok(None);
        };
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(_) => Err(KVError::Serialization("collection is not a JSON object".into())),
            Err(e) => Err(KVError::Serialization(e.to_string())),
        }
    }

    fn write_collection(&self, kv: &dyn KVStore, map: Map<String, Value>) -> Result<(), KVError> {
        let bytes = serde_json::to_vec(&Value::Object(map))
            .map_err(|e| KVError::Serialization(e.to_string()))?;
        kv.set(&self.collection_key(), &bytes)
    }

    /// Read-modify-write of one collection: drop `removed` keys, upsert `entries`.
    fn upsert(
        &self,
        kv: &dyn KVStore,
        entries: &[(&str, &Value)],
        removed: &[&str],
    ) -> Result<(), KVError> {
        let mut map = self.read_collection(kv)?.unwrap_or_default();
        for key in removed {
            map.remove(*key);
        }
        for (id, value) in entries {
            map.insert((*id).to_string(), (*value).clone());
        }
        self.write_collection(kv, map)
    }

    // ── tiers ──

    fn write_snapshot(&self, id: &str, value: &Value) -> Result<(), KVError> {
        let prefix = self.snapshot_prefix(id);
        let key = format!("{}{}", prefix, self.stamp());
        let bytes = serde_json::to_vec(value).map_err(|e| KVError::Serialization(e.to_string()))?;
        let primary = self.backends.primary.as_ref();
        primary.set(&key, &bytes)?;

        let existing = primary.scan(&prefix)?;
        if existing.len() > self.retention {
            let stale: Vec<&str> = existing
                .iter()
                .take(existing.len() - self.retention)
                .map(|(k, _)| k.as_str())
                .collect();
            debug!(id, pruned = stale.len(), "pruning snapshots");
            primary.batch_delete(&stale)?;
        }
        Ok(())
    }

    fn write_emergency(&self, id: &str, value: &Value) -> TierOutcome {
        let key = format!("{}{}", self.emergency_prefix_for(id), self.stamp());
        let bytes = match serde_json::to_vec(value) {
            Ok(b) => b,
            Err(e) => return TierOutcome::Failed(e.to_string()),
        };

        let durable = self.backends.primary.set(&key, &bytes);
        let volatile = self.backends.session.set(&key, &bytes);
        match (durable, volatile) {
            (Err(d), Err(v)) => {
                TierOutcome::Failed(format!("durable: {}; session: {}", d, v))
            }
            (durable, volatile) => {
                if let Err(e) = &durable {
                    warn!(key, error = %e, "durable emergency copy failed");
                }
                if let Err(e) = &volatile {
                    warn!(key, error = %e, "session emergency copy failed");
                }
                error!(user = %self.user, id, key, "platform persisted to emergency tier");
                TierOutcome::Written
            }
        }
    }

    /// Drop every emergency copy of `ids` from both emergency backends.
    /// Failures are logged only.
    fn supersede_emergency(&self, ids: &[&str]) {
        for kv in [&self.backends.primary, &self.backends.session] {
            for &id in ids {
                let prefix = self.emergency_prefix_for(id);
                let stale: Vec<String> = match kv.scan(&prefix) {
                    Ok(entries) => entries
                        .into_iter()
                        .map(|(k, _)| k)
                        // An id containing ':' must not match a longer id.
                        .filter(|k| k.len() == prefix.len() + STAMP_LEN)
                        .collect(),
                    Err(e) => {
                        warn!(user = %self.user, id, error = %e, "emergency scan failed");
                        continue;
                    }
                };
                if stale.is_empty() {
                    continue;
                }
                let keys: Vec<&str> = stale.iter().map(String::as_str).collect();
                match kv.batch_delete(&keys) {
                    Ok(()) => debug!(user = %self.user, id, count = keys.len(), "superseded emergency copies dropped"),
                    Err(e) => warn!(user = %self.user, id, error = %e, "failed to drop superseded emergency copies"),
                }
            }
        }
    }

    fn write_through(&self, platform: &Platform, removed: Option<&str>) -> Result<WriteReport, ServiceError> {
        let id = platform.id();
        let value = serde_json::to_value(platform)
            .map_err(|e| ServiceError::Internal(format!("serialize platform {}: {}", id, e)))?;
        let removed: Vec<&str> = removed.into_iter().filter(|old| *old != id).collect();

        let mut report = WriteReport::default();

        report.primary = TierOutcome::from_result(self.upsert(
            self.backends.primary.as_ref(),
            &[(id, &value)],
            &removed,
        ));
        if let TierOutcome::Failed(reason) = &report.primary {
            warn!(user = %self.user, id, reason = %reason, "primary tier write failed");
        }

        report.snapshot = TierOutcome::from_result(self.write_snapshot(id, &value));
        if let TierOutcome::Failed(reason) = &report.snapshot {
            warn!(user = %self.user, id, reason = %reason, "snapshot tier write failed");
        }

        report.mirror = TierOutcome::from_result(self.upsert(
            self.backends.mirror.as_ref(),
            &[(id, &value)],
            &removed,
        ));
        if let TierOutcome::Failed(reason) = &report.mirror {
            warn!(user = %self.user, id, reason = %reason, "mirror tier write failed");
        }

        if !report.primary.is_written() {
            report.emergency = self.write_emergency(id, &value);
            if let TierOutcome::Failed(reason) = &report.emergency {
                error!(user = %self.user, id, reason = %reason, "every durability tier failed");
                return Err(ServiceError::Storage(format!(
                    "platform {}: could not be persisted: {}",
                    id, reason
                )));
            }
        }

        // The write is durable from here on. A rekeyed entity's old copies
        // are stale either way; its own are stale once primary has it.
        let mut stale = removed;
        if report.primary.is_written() {
            stale.push(id);
        }
        self.supersede_emergency(&stale);

        Ok(report)
    }

    // ── public API ──

    /// Persist one platform through every tier.
    pub fn save(&self, platform: &Platform) -> Result<WriteReport, ServiceError> {
        self.write_through(platform, None)
    }

    /// Persist `platform` and drop the entry stored under `old_id` in the
    /// same collection write. Used when provisional ids are swapped for
    /// canonical ones. Snapshots under `old_id` are left as history.
    pub fn replace(&self, old_id: &str, platform: &Platform) -> Result<WriteReport, ServiceError> {
        self.write_through(platform, Some(old_id))
    }

    /// Write many platforms (and drop `removed` keys) in one collection
    /// write per backend. No snapshots are taken. Emergency copies of
    /// `removed` ids are dropped; those of written ids are left for
    /// `recover` to reconcile.
    pub fn save_all(&self, platforms: &[Platform], removed: &[String]) -> Result<WriteReport, ServiceError> {
        let mut values = Vec::with_capacity(platforms.len());
        for p in platforms {
            let value = serde_json::to_value(p)
                .map_err(|e| ServiceError::Internal(format!("serialize platform {}: {}", p.id(), e)))?;
            values.push(value);
        }
        let entries: Vec<(&str, &Value)> = platforms.iter().map(|p| p.id()).zip(values.iter()).collect();
        let removed: Vec<&str> = removed.iter().map(String::as_str).collect();

        let mut report = WriteReport::default();
        report.primary = TierOutcome::from_result(self.upsert(
            self.backends.primary.as_ref(),
            &entries,
            &removed,
        ));
        report.mirror = TierOutcome::from_result(self.upsert(
            self.backends.mirror.as_ref(),
            &entries,
            &removed,
        ));
        if let TierOutcome::Failed(reason) = &report.mirror {
            warn!(user = %self.user, reason = %reason, "mirror tier batch write failed");
        }

        if let TierOutcome::Failed(reason) = &report.primary {
            warn!(user = %self.user, reason = %reason, count = platforms.len(), "primary tier batch write failed");
            let mut outcome = TierOutcome::Written;
            for (id, value) in &entries {
                if let failed @ TierOutcome::Failed(_) = self.write_emergency(id, value) {
                    outcome = failed;
                }
            }
            report.emergency = outcome;
            if let TierOutcome::Failed(reason) = &report.emergency {
                return Err(ServiceError::Storage(format!("batch write failed on every tier: {}", reason)));
            }
        }
        self.supersede_emergency(&removed);

        Ok(report)
    }

    /// Remove a platform from the primary collection along with any
    /// emergency copies. Snapshots are immutable history and stay. Returns
    /// whether a primary entry was removed.
    ///
    /// A missing primary collection is written out empty, so the mirror
    /// (which still holds the entity) is not loaded in its place.
    pub fn delete(&self, id: &str) -> Result<bool, ServiceError> {
        let primary = self.backends.primary.as_ref();
        let existing = self
            .read_collection(primary)
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        let present = existing.is_some();
        let mut map = existing.unwrap_or_default();
        let removed = map.remove(id).is_some();
        if removed || !present {
            self.write_collection(primary, map)
                .map_err(|e| ServiceError::Storage(e.to_string()))?;
        }
        self.supersede_emergency(&[id]);
        Ok(removed)
    }

    /// Get one platform from the primary collection.
    pub fn get(&self, id: &str) -> Result<Option<Platform>, ServiceError> {
        let map = self
            .read_collection(self.backends.primary.as_ref())
            .map_err(|e| ServiceError::Storage(e.to_string()))?
            .unwrap_or_default();
        map.get(id)
            .map(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| ServiceError::Internal(format!("platform {}: {}", id, e)))
            })
            .transpose()
    }

    /// Load the whole collection. Falls back to the mirror when the primary
    /// collection is missing or unreadable. Entries that fail to parse are
    /// returned separately, not dropped.
    pub fn load(&self) -> Result<Loaded, ServiceError> {
        let (source, map) = match self.read_collection(self.backends.primary.as_ref()) {
            Ok(Some(map)) => (LoadSource::Primary, map),
            primary => {
                if let Err(e) = &primary {
                    warn!(user = %self.user, error = %e, "primary collection unreadable, trying mirror");
                }
                match self.read_collection(self.backends.mirror.as_ref()) {
                    Ok(Some(map)) => (LoadSource::Mirror, map),
                    Ok(None) if primary.is_ok() => (LoadSource::Empty, Map::new()),
                    Ok(None) => {
                        return Err(ServiceError::Storage(
                            "primary collection unreadable and no mirror copy".into(),
                        ))
                    }
                    Err(e) => {
                        return Err(ServiceError::Storage(format!("mirror collection unreadable: {}", e)))
                    }
                }
            }
        };

        let mut platforms = Vec::with_capacity(map.len());
        let mut corrupt = Vec::new();
        for (key, value) in map {
            match serde_json::from_value::<Platform>(value) {
                Ok(p) => platforms.push((key, p)),
                Err(e) => corrupt.push(CorruptRecord { key, error: e.to_string() }),
            }
        }
        debug!(user = %self.user, ?source, count = platforms.len(), corrupt = corrupt.len(), "collection loaded");
        Ok(Loaded { source, platforms, corrupt })
    }

    /// Snapshot history of one entity, oldest first.
    pub fn snapshots(&self, id: &str) -> Result<Vec<Recovered>, ServiceError> {
        let entries = self
            .backends
            .primary
            .scan(&self.snapshot_prefix(id))
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        Ok(Self::parse_recovered(RecoveryTier::Snapshot, entries))
    }

    /// Scan the emergency tier (durable and session copies, deduplicated)
    /// and the snapshot tier. Emergency records come first, each group
    /// oldest first.
    pub fn recover(&self) -> Result<Vec<Recovered>, ServiceError> {
        let prefix = self.emergency_prefix();
        let mut seen = HashSet::new();
        let mut emergency = Vec::new();
        for kv in [&self.backends.primary, &self.backends.session] {
            match kv.scan(&prefix) {
                Ok(entries) => emergency.extend(entries.into_iter().filter(|(k, _)| seen.insert(k.clone()))),
                Err(e) => warn!(user = %self.user, error = %e, "emergency scan failed"),
            }
        }
        emergency.sort_by(|a, b| Self::stamp_of(&a.0).cmp(Self::stamp_of(&b.0)).then_with(|| a.0.cmp(&b.0)));

        let snapshots = self
            .backends
            .primary
            .scan(&self.snapshot_root())
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let mut out = Self::parse_recovered(RecoveryTier::Emergency, emergency);
        out.extend(Self::parse_recovered(RecoveryTier::Snapshot, snapshots));
        Ok(out)
    }

    /// Drop emergency copies that have been reconciled.
    pub fn clear_emergency(&self, keys: &[String]) {
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        for kv in [&self.backends.primary, &self.backends.session] {
            if let Err(e) = kv.batch_delete(&keys) {
                warn!(user = %self.user, error = %e, "failed to clear emergency copies");
            }
        }
    }

    fn parse_recovered(tier: RecoveryTier, entries: Vec<(String, Vec<u8>)>) -> Vec<Recovered> {
        entries
            .into_iter()
            .filter_map(|(key, bytes)| match serde_json::from_slice::<Platform>(&bytes) {
                Ok(platform) => Some(Recovered {
                    tier,
                    taken_at: Self::stamp_millis(&key),
                    key,
                    platform,
                }),
                Err(e) => {
                    warn!(key, error = %e, "skipping unreadable recovery record");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Identity, Origin};
    use crate::testing::{platform, FailingKV};

    fn store_with(primary: Arc<dyn KVStore>) -> (DurableStore, Backends) {
        let backends = Backends {
            primary,
            mirror: Arc::new(MemoryKV::new()),
            session: Arc::new(MemoryKV::new()),
        };
        (DurableStore::new("alice", backends.clone(), 5), backends)
    }

    #[test]
    fn save_writes_primary_snapshot_and_mirror() {
        let (store, backends) = store_with(Arc::new(MemoryKV::new()));
        let p = platform("p1", &[2.0]);

        let report = store.save(&p).unwrap();
        assert!(report.primary.is_written());
        assert!(report.snapshot.is_written());
        assert!(report.mirror.is_written());
        assert_eq!(report.emergency, TierOutcome::Skipped);

        assert_eq!(store.get("p1").unwrap(), Some(p.clone()));
        assert!(backends.mirror.get("inventory:alice:platforms").unwrap().is_some());
        assert_eq!(store.snapshots("p1").unwrap().len(), 1);
    }

    #[test]
    fn keys_are_namespaced_per_user() {
        let backends = Backends::in_memory();
        let alice = DurableStore::new("alice", backends.clone(), 5);
        let bob = DurableStore::new("bob", backends, 5);

        alice.save(&platform("p1", &[1.0])).unwrap();
        assert!(bob.get("p1").unwrap().is_none());
        assert_eq!(bob.load().unwrap().platforms.len(), 0);
        assert_eq!(alice.load().unwrap().platforms.len(), 1);
    }

    #[test]
    fn snapshot_history_is_bounded() {
        let (store, _) = store_with(Arc::new(MemoryKV::new()));
        let mut p = platform("p1", &[1.0]);
        for i in 0..8 {
            p.notes = Some(format!("rev {}", i));
            store.save(&p).unwrap();
        }
        let history = store.snapshots("p1").unwrap();
        assert_eq!(history.len(), 5);
        // Oldest retained is revision 3, newest is 7.
        assert_eq!(history[0].platform.notes.as_deref(), Some("rev 3"));
        assert_eq!(history[4].platform.notes.as_deref(), Some("rev 7"));
    }

    #[test]
    fn primary_failure_diverts_to_emergency() {
        let primary = Arc::new(FailingKV::new());
        primary.fail_keys_containing(":platforms");
        let (store, backends) = store_with(primary);

        let p = platform("p1", &[1.0]);
        let report = store.save(&p).unwrap();
        assert!(report.primary.is_failed());
        assert!(report.used_emergency());
        assert!(report.is_durable());
        // Mirror is independent of the primary failure.
        assert!(report.mirror.is_written());

        assert_eq!(backends.session.scan("inventory:alice:emergency:").unwrap().len(), 1);
        let recovered = store.recover().unwrap();
        let emergency: Vec<_> = recovered
            .iter()
            .filter(|r| r.tier == RecoveryTier::Emergency)
            .collect();
        // Durable and session copies share a key and are reported once.
        assert_eq!(emergency.len(), 1);
        assert_eq!(emergency[0].platform, p);
        assert!(emergency[0].taken_at > 0);
    }

    #[test]
    fn total_failure_is_a_storage_error() {
        let primary = Arc::new(FailingKV::new());
        primary.fail_keys_containing("inventory:");
        let session = Arc::new(FailingKV::new());
        session.fail_keys_containing("inventory:");
        let backends = Backends {
            primary,
            mirror: Arc::new(MemoryKV::new()),
            session,
        };
        let store = DurableStore::new("alice", backends, 5);

        let err = store.save(&platform("p1", &[1.0])).unwrap_err();
        assert_eq!(err.error_code(), "STORAGE_ERROR");
    }

    #[test]
    fn session_copy_alone_is_enough() {
        let primary = Arc::new(FailingKV::new());
        primary.fail_keys_containing("inventory:");
        let (store, _) = store_with(primary);
        let report = store.save(&platform("p1", &[1.0])).unwrap();
        assert!(report.used_emergency());
        assert!(report.snapshot.is_failed());
    }

    #[test]
    fn replace_rekeys_in_one_write() {
        let (store, _) = store_with(Arc::new(MemoryKV::new()));
        let p = platform("tmp1", &[1.0]);
        store.save(&p).unwrap();

        let mut confirmed = p.clone();
        confirmed.identity = Identity::synced("srv-1", "P-0001");
        confirmed.needs_sync = false;
        store.replace("tmp1", &confirmed).unwrap();

        assert!(store.get("tmp1").unwrap().is_none());
        assert_eq!(store.get("srv-1").unwrap(), Some(confirmed));
        // History under the provisional id is kept.
        assert_eq!(store.snapshots("tmp1").unwrap().len(), 1);
        assert_eq!(store.snapshots("srv-1").unwrap().len(), 1);
    }

    #[test]
    fn delete_touches_primary_only() {
        let (store, backends) = store_with(Arc::new(MemoryKV::new()));
        store.save(&platform("p1", &[1.0])).unwrap();

        assert!(store.delete("p1").unwrap());
        assert!(!store.delete("p1").unwrap());
        assert!(store.get("p1").unwrap().is_none());
        assert_eq!(store.snapshots("p1").unwrap().len(), 1);
        let mirror = backends.mirror.get("inventory:alice:platforms").unwrap().unwrap();
        assert!(String::from_utf8(mirror).unwrap().contains("p1"));
    }

    #[test]
    fn later_writes_drop_superseded_emergency_copies() {
        let primary = Arc::new(FailingKV::new());
        primary.fail_keys_containing(":platforms");
        let (store, backends) = store_with(primary.clone());
        let emergency_count = |id: &str| {
            let prefix = format!("inventory:alice:emergency:{}:", id);
            backends.primary.scan(&prefix).unwrap().len() + backends.session.scan(&prefix).unwrap().len()
        };

        // Rekey while primary is still failing: the new id's copy
        // replaces the old id's.
        store.save(&platform("tmp1", &[1.0])).unwrap();
        store.save(&platform("tmp2", &[1.0])).unwrap();
        store.save(&platform("gone", &[1.0])).unwrap();
        assert_eq!(emergency_count("tmp1"), 2);
        store.replace("tmp1", &platform("srv-1", &[1.0])).unwrap();
        assert_eq!(emergency_count("tmp1"), 0);
        assert_eq!(emergency_count("srv-1"), 2);

        primary.heal();

        // A successful primary write supersedes the entity's own copies.
        store.save(&platform("srv-1", &[1.0])).unwrap();
        assert_eq!(emergency_count("srv-1"), 0);

        // So does a rekey, for the old id.
        store.replace("tmp2", &platform("srv-2", &[1.0])).unwrap();
        assert_eq!(emergency_count("tmp2"), 0);

        // And a delete, even though primary never held the entity.
        assert!(!store.delete("gone").unwrap());
        assert_eq!(emergency_count("gone"), 0);

        assert!(store.recover().unwrap().iter().all(|r| r.tier == RecoveryTier::Snapshot));
    }

    #[test]
    fn batch_writes_leave_emergency_copies_of_written_ids() {
        let primary = Arc::new(FailingKV::new());
        primary.fail_keys_containing(":platforms");
        let (store, backends) = store_with(primary.clone());
        store.save(&platform("p1", &[1.0])).unwrap();
        store.save(&platform("old", &[1.0])).unwrap();
        primary.heal();

        store.save_all(&[platform("p1", &[2.0])], &["old".to_string()]).unwrap();
        assert_eq!(backends.session.scan("inventory:alice:emergency:p1:").unwrap().len(), 1);
        assert!(backends.session.scan("inventory:alice:emergency:old:").unwrap().is_empty());
    }

    #[test]
    fn delete_on_empty_primary_shadows_the_mirror() {
        let primary = Arc::new(FailingKV::new());
        primary.fail_keys_containing(":platforms");
        let (store, _) = store_with(primary.clone());
        store.save(&platform("p1", &[1.0])).unwrap();
        primary.heal();

        store.delete("p1").unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.source, LoadSource::Primary);
        assert!(loaded.platforms.is_empty());
    }

    #[test]
    fn supersede_does_not_touch_ids_sharing_a_prefix() {
        let primary = Arc::new(FailingKV::new());
        primary.fail_keys_containing(":platforms");
        let (store, backends) = store_with(primary.clone());
        store.save(&platform("a:b", &[1.0])).unwrap();
        primary.heal();

        store.delete("a").unwrap();
        assert_eq!(backends.session.scan("inventory:alice:emergency:a:b:").unwrap().len(), 1);
    }

    #[test]
    fn corrupt_entries_are_reported_and_preserved() {
        let (store, backends) = store_with(Arc::new(MemoryKV::new()));
        let raw = serde_json::json!({
            "bad": {"pieces": "not-a-list"},
        });
        backends
            .primary
            .set("inventory:alice:platforms", &serde_json::to_vec(&raw).unwrap())
            .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.platforms.len(), 0);
        assert_eq!(loaded.corrupt.len(), 1);
        assert_eq!(loaded.corrupt[0].key, "bad");

        // An unrelated upsert leaves the corrupt entry in place.
        store.save(&platform("p1", &[1.0])).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.platforms.len(), 1);
        assert_eq!(loaded.corrupt.len(), 1);
    }

    #[test]
    fn unreadable_primary_falls_back_to_mirror() {
        let (store, backends) = store_with(Arc::new(MemoryKV::new()));
        store.save(&platform("p1", &[1.0])).unwrap();
        backends.primary.set("inventory:alice:platforms", b"{{{").unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.source, LoadSource::Mirror);
        assert_eq!(loaded.platforms.len(), 1);
    }

    #[test]
    fn save_all_batches_and_removes() {
        let (store, _) = store_with(Arc::new(MemoryKV::new()));
        store.save(&platform("old", &[1.0])).unwrap();

        let mut a = platform("a", &[1.0]);
        a.identity = Identity::provisional(Origin::Unconfirmed);
        let b = platform("b", &[2.0]);
        let report = store.save_all(&[a.clone(), b], &["old".to_string()]).unwrap();
        assert!(report.primary.is_written());
        assert_eq!(report.snapshot, TierOutcome::Skipped);

        let loaded = store.load().unwrap();
        let mut keys: Vec<_> = loaded.platforms.iter().map(|(k, _)| k.clone()).collect();
        keys.sort();
        let mut expected = vec![a.id().to_string(), "b".to_string()];
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[test]
    fn clear_emergency_removes_both_copies() {
        let primary = Arc::new(FailingKV::new());
        primary.fail_keys_containing(":platforms");
        let (store, backends) = store_with(primary);
        store.save(&platform("p1", &[1.0])).unwrap();

        let keys: Vec<String> = store
            .recover()
            .unwrap()
            .into_iter()
            .filter(|r| r.tier == RecoveryTier::Emergency)
            .map(|r| r.key)
            .collect();
        store.clear_emergency(&keys);
        assert!(backends.session.scan("inventory:alice:emergency:").unwrap().is_empty());
        assert!(store
            .recover()
            .unwrap()
            .iter()
            .all(|r| r.tier == RecoveryTier::Snapshot));
    }
}
