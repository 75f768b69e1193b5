//! Offline-first inventory of platforms and their pieces.
//!
//! Mutations land in a local working set and are persisted through a
//! multi-tier [`DurableStore`] before any remote call is attempted. A
//! background coordinator pushes flagged platforms to the remote system
//! of record whenever connectivity comes back.

pub mod calc;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod integrity;
pub mod model;
pub mod remote;
pub mod repo;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use yard_core::ServiceError;

pub use config::InventoryConfig;
pub use connectivity::{Connectivity, Link};
pub use engine::{InventoryEngine, PullReport, RecoveryReport, SyncOutcome};
pub use integrity::{IntegrityError, Violation, VerifyReport};
pub use model::{
    Identity, NewPiece, NewPlatform, Origin, Piece, PiecePatch, Platform, PlatformPatch,
    PlatformStatus, SyncStatus,
};
pub use remote::{NoRemote, PlatformPayload, PlatformRemote, RemotePlatform};
pub use store::{Backends, DurableStore, TierOutcome, WriteReport};
pub use sync::SyncSummary;

/// The inventory module: a loaded engine plus its sync coordinator.
///
/// Dropping the module stops the coordinator.
pub struct InventoryModule {
    engine: Arc<InventoryEngine>,
    cancel: CancellationToken,
}

impl InventoryModule {
    /// Load `user`'s working set, fold back any emergency records, and
    /// start the coordinator. Must be called within a tokio runtime.
    pub fn open(
        user: &str,
        backends: Backends,
        remote: Arc<dyn PlatformRemote>,
        connectivity: Connectivity,
        config: InventoryConfig,
    ) -> Result<Self, ServiceError> {
        let store = DurableStore::new(user, backends, config.snapshot_retention);
        let engine = Arc::new(InventoryEngine::new(store, remote, connectivity, config));
        let count = engine.load()?;
        let recovery = engine.recover_into_primary()?;
        info!(
            user,
            count,
            restored = recovery.restored.len(),
            "inventory module opened"
        );

        let cancel = sync::start(Arc::clone(&engine));
        Ok(Self { engine, cancel })
    }

    pub fn engine(&self) -> &Arc<InventoryEngine> {
        &self.engine
    }

    /// Stop the background coordinator. Local operations keep working.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for InventoryModule {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::MockRemote;

    #[tokio::test]
    async fn module_reopens_and_syncs() {
        let backends = Backends::in_memory();
        let remote = MockRemote::new();
        let connectivity = Connectivity::new(false);

        let id = {
            let module = InventoryModule::open(
                "alice",
                backends.clone(),
                remote.clone(),
                connectivity.clone(),
                InventoryConfig::default(),
            )
            .unwrap();
            let attrs = NewPlatform {
                standard_width: 0.30,
                ..Default::default()
            };
            module.engine().create_platform(attrs).await.unwrap().id().to_string()
        };

        let module = InventoryModule::open(
            "alice",
            backends,
            remote.clone(),
            connectivity.clone(),
            InventoryConfig::default(),
        )
        .unwrap();
        assert!(module.engine().get(&id).is_some());

        connectivity.set_online(true);
        for _ in 0..200 {
            if module.engine().sync_status().needs_sync == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(module.engine().sync_status().synced, 1);
        assert_eq!(remote.creates(), 1);
        module.shutdown();
    }

    #[tokio::test]
    async fn redb_backed_module_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let open_backends = || -> Backends {
            Backends {
                primary: Arc::new(yard_kv::RedbStore::open(&dir.path().join("data.redb")).unwrap()),
                mirror: Arc::new(yard_kv::RedbStore::open(&dir.path().join("mirror.redb")).unwrap()),
                session: Arc::new(yard_kv::MemoryKV::new()),
            }
        };

        let id = {
            let module = InventoryModule::open(
                "bob",
                open_backends(),
                Arc::new(NoRemote),
                Connectivity::new(false),
                InventoryConfig::default(),
            )
            .unwrap();
            let engine = module.engine();
            let p = engine
                .create_platform(NewPlatform {
                    standard_width: 0.30,
                    pieces: vec![NewPiece::new(2.0), NewPiece::new(1.5)],
                    ..Default::default()
                })
                .await
                .unwrap();
            engine.change_standard_width(p.id(), 0.25).await.unwrap();
            p.id().to_string()
        };
        // Let the stopped coordinator release its handle on the databases.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let module = InventoryModule::open(
            "bob",
            open_backends(),
            Arc::new(NoRemote),
            Connectivity::new(false),
            InventoryConfig::default(),
        )
        .unwrap();
        let p = module.engine().get(&id).unwrap();
        assert!((p.total_linear_meters - 0.875).abs() < 1e-9);
        assert!(p.needs_sync);
        assert!(module.engine().verify().is_valid);
    }
}
