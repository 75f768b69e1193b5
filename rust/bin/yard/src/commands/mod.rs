pub mod context;
pub mod maintenance;
pub mod platform;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use yard_client::{NoAuth, ResourceClient, StaticToken, TokenSource};
use yard_core::ServiceConfig;
use yard_inventory::{
    Backends, Connectivity, DurableStore, InventoryConfig, InventoryEngine, NoRemote,
    PlatformRemote, RemotePlatform,
};
use yard_kv::{KVStore, MemoryKV, QuotaKV, RedbStore};

use crate::config::{default_data_dir, ClientConfig};

/// Effective settings for one invocation: the current context with
/// command-line overrides applied on top.
#[derive(Debug, Clone)]
pub struct Settings {
    pub service: ServiceConfig,
    pub token: String,
    pub offline: bool,
}

impl Settings {
    /// `overrides` are `--flag=value` strings as understood by
    /// [`ServiceConfig::from_args`]; they win over the context.
    pub fn resolve(config_path: &Path, overrides: &[String], offline: bool) -> Result<Self> {
        let client = ClientConfig::load(config_path)?;
        let mut args = Vec::new();
        let mut token = String::new();
        if let Some(ctx) = client.current() {
            let data_dir = if ctx.data_dir.is_empty() {
                default_data_dir(&ctx.name).to_string_lossy().to_string()
            } else {
                ctx.data_dir.clone()
            };
            args.push(format!("--data-dir={}", data_dir));
            if !ctx.server.is_empty() {
                args.push(format!("--server={}", ctx.server));
            }
            if !ctx.user.is_empty() {
                args.push(format!("--user={}", ctx.user));
            }
            token = ctx.token.clone();
        }
        args.extend(overrides.iter().cloned());

        Ok(Self {
            service: ServiceConfig::from_args(&args)?,
            token,
            offline,
        })
    }

    pub fn is_online(&self) -> bool {
        self.service.has_server() && !self.offline
    }
}

fn open_kv(path: &Path, quota: Option<u64>) -> Result<Arc<dyn KVStore>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let db = RedbStore::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(match quota {
        Some(limit) => Arc::new(QuotaKV::new(db, limit)?),
        None => Arc::new(db),
    })
}

/// Open the local stores, build the engine, load the working set and fold
/// emergency records back into it.
pub fn open_engine(settings: &Settings) -> Result<InventoryEngine> {
    let service = &settings.service;
    let backends = Backends {
        primary: open_kv(&service.resolve_db_path(), service.quota_bytes)?,
        mirror: open_kv(&service.resolve_mirror_path(), None)?,
        session: Arc::new(MemoryKV::new()),
    };

    let remote: Arc<dyn PlatformRemote> = if service.has_server() {
        let tokens: Arc<dyn TokenSource> = if settings.token.is_empty() {
            Arc::new(NoAuth)
        } else {
            Arc::new(StaticToken::new(settings.token.clone()))
        };
        Arc::new(ResourceClient::<RemotePlatform>::new(service.server.clone(), tokens))
    } else {
        Arc::new(NoRemote)
    };

    let config = InventoryConfig::default();
    let store = DurableStore::new(service.user.clone(), backends, config.snapshot_retention);
    let engine = InventoryEngine::new(store, remote, Connectivity::new(settings.is_online()), config);
    engine.load()?;
    engine.recover_into_primary()?;
    Ok(engine)
}
