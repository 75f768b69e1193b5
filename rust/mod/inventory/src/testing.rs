//! Test doubles shared by the unit tests of this crate.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use yard_client::ApiError;
use yard_core::ListParams;
use yard_kv::{KVError, KVStore, MemoryKV};

use crate::calc;
use crate::config::InventoryConfig;
use crate::connectivity::Connectivity;
use crate::engine::InventoryEngine;
use crate::model::{Identity, Piece, Platform, UNSPECIFIED_MATERIAL};
use crate::remote::{PlatformPayload, PlatformRemote, RemotePlatform};
use crate::store::{Backends, DurableStore};

/// A synced platform `id` (business number `P-{id}`), width 0.30, one
/// piece per length, derived values consistent.
pub fn platform(id: &str, lengths: &[f64]) -> Platform {
    let width = 0.30;
    let pieces = lengths
        .iter()
        .enumerate()
        .map(|(i, &length)| Piece {
            id: format!("{}-piece-{}", id, i + 1),
            sequence_number: i as u32 + 1,
            length,
            standard_width: width,
            linear_meters: calc::linear_meters(length, width),
            material: UNSPECIFIED_MATERIAL.into(),
        })
        .collect();
    let mut p = Platform {
        identity: Identity::synced(id, format!("P-{}", id)),
        material_types: vec!["oak".into()],
        provider: "Acme Timber".into(),
        driver: "Sam".into(),
        reception_date: "2026-03-01".into(),
        notes: None,
        standard_width: width,
        pieces,
        total_length: 0.0,
        total_linear_meters: 0.0,
        status: Default::default(),
        needs_sync: false,
        created_at: "2026-03-01T08:00:00.000Z".into(),
        updated_at: "2026-03-01T08:00:00.000Z".into(),
    };
    p.recompute();
    p
}

/// Engine over in-memory tiers and the given remote.
pub fn engine(remote: Arc<MockRemote>, online: bool) -> InventoryEngine {
    engine_with(Backends::in_memory(), remote, online)
}

pub fn engine_with(backends: Backends, remote: Arc<MockRemote>, online: bool) -> InventoryEngine {
    let config = InventoryConfig::default();
    let store = DurableStore::new("tester", backends, config.snapshot_retention);
    InventoryEngine::new(store, remote, Connectivity::new(online), config)
}

// ── MockRemote ──────────────────────────────────────────────────────

#[derive(Default)]
struct MockState {
    records: BTreeMap<String, RemotePlatform>,
    issued: u32,
    creates: usize,
    updates: usize,
    deletes: usize,
    not_found: bool,
}

/// Scripted in-memory remote. Issues ids `srv-N` and business numbers
/// `P-000N`.
pub struct MockRemote {
    reachable: AtomicBool,
    fail_next_create: AtomicBool,
    create_delay: Mutex<Option<Duration>>,
    state: Mutex<MockState>,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            fail_next_create: AtomicBool::new(false),
            create_delay: Mutex::new(None),
            state: Mutex::new(MockState::default()),
        }
    }
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_reachable(&self) -> Result<(), ApiError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ApiError::Unreachable("mock offline".into()))
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make every update answer 404.
    pub fn fail_updates_with_not_found(&self, on: bool) {
        self.state().not_found = on;
    }

    /// Fail the next create after its delay, as if the link dropped
    /// mid-request.
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Hold each create for `delay` before answering.
    pub fn delay_creates(&self, delay: Duration) {
        *self.create_delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    pub fn creates(&self) -> usize {
        self.state().creates
    }

    pub fn updates(&self) -> usize {
        self.state().updates
    }

    pub fn deletes(&self) -> usize {
        self.state().deletes
    }

    pub fn records(&self) -> Vec<RemotePlatform> {
        self.state().records.values().cloned().collect()
    }

    /// Seed a record as if another client created it.
    pub fn insert(&self, record: RemotePlatform) {
        self.state().records.insert(record.id.clone(), record);
    }

    /// Drop a record behind the engine's back.
    pub fn remove(&self, id: &str) {
        self.state().records.remove(id);
    }

    fn apply(record: &mut RemotePlatform, payload: &PlatformPayload) {
        record.material_types = payload.material_types.clone();
        record.provider = payload.provider.clone();
        record.driver = payload.driver.clone();
        record.reception_date = payload.reception_date.clone();
        record.notes = payload.notes.clone();
        record.standard_width = payload.standard_width;
        record.pieces = payload.pieces.clone();
        record.status = payload.status;
    }
}

/// A remote record with the given id and no pieces.
pub fn remote_record(id: &str) -> RemotePlatform {
    RemotePlatform {
        id: id.into(),
        business_number: format!("P-{}", id),
        material_types: vec![],
        provider: "Remote".into(),
        driver: String::new(),
        reception_date: String::new(),
        notes: None,
        standard_width: 0.30,
        pieces: vec![],
        status: Default::default(),
        created_at: String::new(),
        updated_at: String::new(),
    }
}

#[async_trait]
impl PlatformRemote for MockRemote {
    async fn create(&self, payload: &PlatformPayload) -> Result<RemotePlatform, ApiError> {
        self.check_reachable()?;
        let delay = *self.create_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(ApiError::Unreachable("connection reset".into()));
        }

        let mut state = self.state();
        state.creates += 1;
        state.issued += 1;
        let n = state.issued;
        let mut record = remote_record(&format!("srv-{}", n));
        record.business_number = format!("P-{:04}", n);
        Self::apply(&mut record, payload);
        state.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        id: &str,
        _owner: &str,
        payload: &PlatformPayload,
    ) -> Result<RemotePlatform, ApiError> {
        self.check_reachable()?;
        let mut state = self.state();
        state.updates += 1;
        let not_found = state.not_found;
        match state.records.get_mut(id) {
            Some(record) if !not_found => {
                Self::apply(record, payload);
                Ok(record.clone())
            }
            _ => Err(ApiError::Server {
                status: 404,
                message: format!("platform {} not found", id),
            }),
        }
    }

    async fn delete(&self, id: &str, _owner: &str) -> Result<(), ApiError> {
        self.check_reachable()?;
        let mut state = self.state();
        state.deletes += 1;
        match state.records.remove(id) {
            Some(_) => Ok(()),
            None => Err(ApiError::Server {
                status: 404,
                message: format!("platform {} not found", id),
            }),
        }
    }

    async fn list(&self, params: &ListParams) -> Result<Vec<RemotePlatform>, ApiError> {
        self.check_reachable()?;
        Ok(self
            .state()
            .records
            .values()
            .skip(params.offset)
            .take(params.limit)
            .cloned()
            .collect())
    }
}

// ── FailingKV ───────────────────────────────────────────────────────

/// In-memory store whose writes fail with `Unavailable` for keys that
/// contain any configured fragment, the way a full quota would.
#[derive(Default)]
pub struct FailingKV {
    inner: MemoryKV,
    fragments: RwLock<Vec<String>>,
}

impl FailingKV {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_keys_containing(&self, fragment: &str) {
        self.fragments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fragment.to_string());
    }

    pub fn heal(&self) {
        self.fragments.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn check(&self, key: &str) -> Result<(), KVError> {
        let fragments = self.fragments.read().unwrap_or_else(PoisonError::into_inner);
        if fragments.iter().any(|f| key.contains(f.as_str())) {
            return Err(KVError::Unavailable(format!("quota exceeded writing {}", key)));
        }
        Ok(())
    }
}

impl KVStore for FailingKV {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KVError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KVError> {
        self.check(key)?;
        self.inner.set(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        self.inner.delete(key)
    }

    fn batch_set(&self, entries: &[(&str, &[u8])]) -> Result<(), KVError> {
        for (key, _) in entries {
            self.check(key)?;
        }
        self.inner.batch_set(entries)
    }

    fn batch_delete(&self, keys: &[&str]) -> Result<(), KVError> {
        self.inner.batch_delete(keys)
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KVError> {
        self.inner.scan(prefix)
    }
}
