//! Entity mutation engine.
//!
//! Every mutation is a synchronous read-modify-write of the working set,
//! persisted through the durable store before it becomes visible. The
//! remote call, if any, happens afterwards and can only ever add state
//! (canonical identifiers) or flag the entity for re-sync; it never rolls
//! back the local write.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};
use yard_core::{now_rfc3339, ListParams, ServiceError};

use crate::calc;
use crate::config::InventoryConfig;
use crate::connectivity::Connectivity;
use crate::integrity::{self, VerifyReport};
use crate::model::{
    Identity, NewPiece, NewPlatform, Origin, Piece, PiecePatch, Platform, PlatformPatch, SyncStatus,
};
use crate::remote::{PlatformPayload, PlatformRemote, RemotePlatform};
use crate::repo::{Repository, WorkingSet};
use crate::store::{DurableStore, LoadSource, RecoveryTier};

/// Result of one per-entity sync attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The remote confirmed the entity; `id` is its canonical id.
    Synced { id: String },
    /// The remote create failed; the entity stays flagged.
    Failed(String),
    /// Another attempt for the same id is running.
    InFlight,
    /// Nothing to do.
    AlreadySynced,
    Offline,
    /// No such entity locally.
    Missing,
    /// The entity was deleted locally while its create was in flight; the
    /// fresh remote record was removed again.
    Orphaned,
}

/// What `recover_into_primary` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Ids restored from the emergency tier.
    pub restored: Vec<String>,
    /// Emergency records consumed (restored or superseded).
    pub cleared: usize,
    /// Snapshot records seen. Reported only.
    pub snapshots: usize,
}

/// What `pull_remote` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub fetched: usize,
    pub inserted: Vec<String>,
    /// False when a page failed and the listing stopped early.
    pub complete: bool,
}

/// Marks an id as being synced for as long as it lives.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, id: &str) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string());
        inserted.then(|| Self { set, id: id.to_string() })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

fn not_found(id: &str) -> ServiceError {
    ServiceError::NotFound(format!("platform '{}' not found", id))
}

/// Offline-first inventory engine for one user session.
pub struct InventoryEngine {
    repo: Repository,
    store: DurableStore,
    remote: Arc<dyn PlatformRemote>,
    connectivity: Connectivity,
    config: InventoryConfig,
    in_flight: Mutex<HashSet<String>>,
}

impl InventoryEngine {
    pub fn new(
        store: DurableStore,
        remote: Arc<dyn PlatformRemote>,
        connectivity: Connectivity,
        config: InventoryConfig,
    ) -> Self {
        Self {
            repo: Repository::default(),
            store,
            remote,
            connectivity,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }

    /// Owner reference sent with remote mutations.
    fn owner(&self) -> &str {
        self.store.user()
    }

    // ── Loading ─────────────────────────────────────────────────────

    /// Replace the working set with the stored collection. Returns the
    /// number of platforms loaded. A collection recovered from the mirror
    /// is written back to the primary tier.
    pub fn load(&self) -> Result<usize, ServiceError> {
        let loaded = self.store.load()?;
        let mut set = WorkingSet::default();
        for (key, platform) in loaded.platforms {
            set.platforms.insert(key, platform);
        }
        for record in loaded.corrupt {
            warn!(key = %record.key, error = %record.error, "unreadable platform record");
            set.quarantined.insert(record.key, record.error);
        }

        if loaded.source == LoadSource::Mirror {
            warn!(user = %self.owner(), "restoring primary collection from mirror");
            let platforms: Vec<Platform> = set.platforms.values().cloned().collect();
            self.store.save_all(&platforms, &[])?;
        }

        let count = set.len();
        self.repo.reset(set);
        info!(user = %self.owner(), count, "working set loaded");
        Ok(count)
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Option<Platform> {
        self.repo.get(id)
    }

    pub fn list(&self) -> Vec<Platform> {
        self.repo.all()
    }

    /// Ids of every platform whose remote existence is not confirmed.
    pub fn pending_sync_ids(&self) -> Vec<String> {
        self.repo
            .read()
            .platforms
            .values()
            .filter(|p| p.needs_sync || p.identity.is_provisional())
            .map(|p| p.id().to_string())
            .collect()
    }

    pub fn sync_status(&self) -> SyncStatus {
        let set = self.repo.read();
        let total = set.len();
        let needs_sync = set.platforms.values().filter(|p| p.needs_sync).count();
        let pending = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len();
        SyncStatus {
            total,
            pending,
            synced: total - needs_sync,
            needs_sync,
            is_online: self.connectivity.is_online(),
        }
    }

    // ── Local write path ────────────────────────────────────────────

    /// Clone, mutate, recompute, persist, then commit. On any error the
    /// working set is untouched.
    fn mutate_local<F>(&self, id: &str, f: F) -> Result<Platform, ServiceError>
    where
        F: FnOnce(&mut Platform) -> Result<(), ServiceError>,
    {
        let mut set = self.repo.write();
        let mut next = set.get(id).cloned().ok_or_else(|| not_found(id))?;
        f(&mut next)?;
        next.recompute();
        next.updated_at = now_rfc3339();
        if !self.connectivity.is_online() || next.identity.is_provisional() {
            next.needs_sync = true;
        }
        self.store.save(&next)?;
        set.commit(Some(id), next.clone());
        Ok(next)
    }

    /// Set `needs_sync` on a stored platform. Failures are logged only.
    fn flag_needs_sync(&self, id: &str) {
        let mut set = self.repo.write();
        let Some(current) = set.get(id) else { return };
        if current.needs_sync {
            return;
        }
        let mut next = current.clone();
        next.needs_sync = true;
        if let Err(e) = self.store.save(&next) {
            error!(id, error = %e, "could not persist sync flag");
        }
        set.commit(Some(id), next);
    }

    /// Record that a remote create was attempted and failed.
    fn mark_unconfirmed(&self, id: &str) {
        let mut set = self.repo.write();
        let Some(current) = set.get(id) else { return };
        let offline = current.identity.origin() == Some(Origin::Offline);
        if current.needs_sync && !offline {
            return;
        }
        let mut next = current.clone();
        next.needs_sync = true;
        if let Identity::Provisional { origin, .. } = &mut next.identity {
            *origin = Origin::Unconfirmed;
        }
        if let Err(e) = self.store.save(&next) {
            error!(id, error = %e, "could not persist sync flag");
        }
        set.commit(Some(id), next);
    }

    // ── Remote propagation ──────────────────────────────────────────

    /// Propagate a committed local change. Never fails: every remote error
    /// ends with the entity flagged. Returns the latest local copy.
    async fn push_remote(&self, local: Platform) -> Platform {
        if !self.connectivity.is_online() {
            return local;
        }

        if local.needs_sync || local.identity.is_provisional() {
            // Remote existence is not assumed: create, which carries the
            // full state. A change made while the create was in flight is
            // pushed as an update against the new id.
            let id = match self.sync_platform(local.id()).await {
                SyncOutcome::Synced { id } => id,
                _ => local.id().to_string(),
            };
            return self.repo.get(&id).unwrap_or(local);
        }

        let payload = PlatformPayload::from(&local);
        match self.remote.update(local.id(), self.owner(), &payload).await {
            Ok(_) => {
                debug!(id = %local.id(), "remote update applied");
                local
            }
            Err(e) => {
                if e.is_not_found() {
                    warn!(id = %local.id(), "remote copy not found, flagging for re-sync");
                } else {
                    warn!(id = %local.id(), error = %e, "remote update failed, flagging for re-sync");
                }
                self.flag_needs_sync(local.id());
                self.repo.get(local.id()).unwrap_or(local)
            }
        }
    }

    /// Create the remote counterpart of a flagged entity and adopt the
    /// canonical identifiers. At most one attempt per id runs at a time.
    pub async fn sync_platform(&self, id: &str) -> SyncOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, id) else {
            debug!(id, "sync already in flight");
            return SyncOutcome::InFlight;
        };
        let Some(local) = self.repo.get(id) else {
            return SyncOutcome::Missing;
        };
        if !local.needs_sync && !local.identity.is_provisional() {
            return SyncOutcome::AlreadySynced;
        }
        if !self.connectivity.is_online() {
            return SyncOutcome::Offline;
        }

        let sent = PlatformPayload::from(&local);
        debug!(id, "remote create");
        match self.remote.create(&sent).await {
            Ok(remote) => self.adopt(id, &sent, remote).await,
            Err(e) => {
                warn!(id, error = %e, "remote create failed, platform stays flagged");
                self.mark_unconfirmed(id);
                SyncOutcome::Failed(e.to_string())
            }
        }
    }

    /// Swap provisional identifiers for the canonical ones.
    async fn adopt(&self, old_id: &str, sent: &PlatformPayload, remote: RemotePlatform) -> SyncOutcome {
        let canonical = remote.id.clone();
        let adopted = {
            let mut set = self.repo.write();
            match set.get(old_id).cloned() {
                None => None,
                Some(mut p) => {
                    p.identity = Identity::synced(remote.id, remote.business_number);
                    p.needs_sync = false;
                    p.updated_at = now_rfc3339();
                    // The working set follows the remote even if every
                    // tier fails, so this session never creates it twice.
                    if let Err(e) = self.store.replace(old_id, &p) {
                        error!(id = %canonical, error = %e, "could not persist canonical identifiers");
                    }
                    set.commit(Some(old_id), p.clone());
                    Some(p)
                }
            }
        };

        let Some(synced) = adopted else {
            info!(id = old_id, remote_id = %canonical, "platform deleted during sync, removing remote copy");
            if let Err(e) = self.remote.delete(&canonical, self.owner()).await {
                warn!(remote_id = %canonical, error = %e, "could not remove orphaned remote copy");
            }
            return SyncOutcome::Orphaned;
        };

        info!(
            provisional = old_id,
            id = %canonical,
            business_number = %synced.business_number(),
            "platform synced"
        );

        let current = PlatformPayload::from(&synced);
        if current != *sent {
            debug!(id = %canonical, "local changes during create, sending update");
            if let Err(e) = self.remote.update(&canonical, self.owner(), &current).await {
                warn!(id = %canonical, error = %e, "follow-up update failed");
            }
        }

        SyncOutcome::Synced { id: canonical }
    }

    // ── Platform operations ─────────────────────────────────────────

    /// Create a platform locally with provisional identifiers, then try
    /// the remote create when online.
    pub async fn create_platform(&self, attrs: NewPlatform) -> Result<Platform, ServiceError> {
        calc::validate_width(attrs.standard_width, self.config.max_width)?;
        for piece in &attrs.pieces {
            calc::validate_length(piece.length, self.config.max_length)?;
        }

        let online = self.connectivity.is_online();
        let origin = if online { Origin::Unconfirmed } else { Origin::Offline };
        let now = now_rfc3339();
        let mut platform = Platform {
            identity: Identity::provisional(origin),
            material_types: attrs.material_types,
            provider: attrs.provider,
            driver: attrs.driver,
            reception_date: attrs.reception_date,
            notes: attrs.notes,
            standard_width: attrs.standard_width,
            pieces: Vec::new(),
            total_length: 0.0,
            total_linear_meters: 0.0,
            status: Default::default(),
            needs_sync: true,
            created_at: now.clone(),
            updated_at: now,
        };
        for draft in &attrs.pieces {
            platform.push_piece(draft);
        }
        platform.recompute();

        {
            let mut set = self.repo.write();
            self.store.save(&platform)?;
            set.commit(None, platform.clone());
        }
        info!(id = %platform.id(), online, "platform created");

        Ok(self.push_remote(platform).await)
    }

    /// Apply a partial update. Width changes propagate to every piece.
    pub async fn update_platform(&self, id: &str, patch: PlatformPatch) -> Result<Platform, ServiceError> {
        if let Some(width) = patch.standard_width {
            calc::validate_width(width, self.config.max_width)?;
        }

        let updated = self.mutate_local(id, |p| {
            if let Some(status) = patch.status {
                if !p.status.can_become(status) {
                    return Err(ServiceError::Validation(format!(
                        "status cannot move from {} to {}",
                        p.status, status
                    )));
                }
                p.status = status;
            }
            if let Some(v) = patch.material_types {
                p.material_types = v;
            }
            if let Some(v) = patch.provider {
                p.provider = v;
            }
            if let Some(v) = patch.driver {
                p.driver = v;
            }
            if let Some(v) = patch.reception_date {
                p.reception_date = v;
            }
            if let Some(v) = patch.notes {
                p.notes = Some(v);
            }
            if let Some(width) = patch.standard_width {
                p.apply_width(width);
            }
            Ok(())
        })?;

        Ok(self.push_remote(updated).await)
    }

    /// Remove locally, then remotely if the remote copy is known to exist.
    pub async fn delete_platform(&self, id: &str) -> Result<(), ServiceError> {
        let removed = {
            let mut set = self.repo.write();
            let removed = set.get(id).cloned().ok_or_else(|| not_found(id))?;
            self.store.delete(id)?;
            set.platforms.remove(id);
            removed
        };
        info!(id, "platform deleted");

        let known_remote = !removed.needs_sync && !removed.identity.is_provisional();
        if known_remote && self.connectivity.is_online() {
            if let Err(e) = self.remote.delete(id, self.owner()).await {
                warn!(id, error = %e, "remote delete failed");
            }
        }
        Ok(())
    }

    /// Rewrite the standard width on the platform and every piece.
    pub async fn change_standard_width(&self, id: &str, width: f64) -> Result<Platform, ServiceError> {
        calc::validate_width(width, self.config.max_width)?;
        let updated = self.mutate_local(id, |p| {
            p.apply_width(width);
            Ok(())
        })?;
        debug!(id, width, "standard width changed");
        Ok(self.push_remote(updated).await)
    }

    // ── Piece operations ────────────────────────────────────────────

    pub async fn add_piece(&self, platform_id: &str, piece: NewPiece) -> Result<Piece, ServiceError> {
        let mut added = self.add_pieces(platform_id, vec![piece]).await?;
        added.pop().ok_or_else(|| ServiceError::Internal("no piece added".into()))
    }

    /// Append a batch of pieces in one persisted write. The whole batch is
    /// rejected if any length is invalid.
    pub async fn add_pieces(&self, platform_id: &str, pieces: Vec<NewPiece>) -> Result<Vec<Piece>, ServiceError> {
        for piece in &pieces {
            calc::validate_length(piece.length, self.config.max_length)?;
        }

        let mut ids = Vec::with_capacity(pieces.len());
        let updated = self.mutate_local(platform_id, |p| {
            for draft in &pieces {
                ids.push(p.push_piece(draft).id);
            }
            Ok(())
        })?;

        let latest = self.push_remote(updated).await;
        Ok(ids
            .iter()
            .filter_map(|id| latest.piece(id).cloned())
            .collect())
    }

    pub async fn update_piece(
        &self,
        platform_id: &str,
        piece_id: &str,
        patch: PiecePatch,
    ) -> Result<Piece, ServiceError> {
        if let Some(length) = patch.length {
            calc::validate_length(length, self.config.max_length)?;
        }

        let updated = self.mutate_local(platform_id, |p| {
            let piece = p
                .pieces
                .iter_mut()
                .find(|piece| piece.id == piece_id)
                .ok_or_else(|| ServiceError::NotFound(format!("piece '{}' not found", piece_id)))?;
            if let Some(length) = patch.length {
                piece.length = length;
            }
            if let Some(material) = patch.material {
                piece.material = material;
            }
            Ok(())
        })?;

        let latest = self.push_remote(updated).await;
        latest
            .piece(piece_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("piece '{}' not found", piece_id)))
    }

    /// Remove a piece; the rest are renumbered.
    pub async fn delete_piece(&self, platform_id: &str, piece_id: &str) -> Result<Platform, ServiceError> {
        let updated = self.mutate_local(platform_id, |p| {
            let before = p.pieces.len();
            p.pieces.retain(|piece| piece.id != piece_id);
            if p.pieces.len() == before {
                return Err(ServiceError::NotFound(format!("piece '{}' not found", piece_id)));
            }
            Ok(())
        })?;
        Ok(self.push_remote(updated).await)
    }

    // ── Integrity ───────────────────────────────────────────────────

    pub fn verify(&self) -> VerifyReport {
        integrity::verify(&self.repo.read())
    }

    /// Apply every safe fix and persist the corrected platforms in one
    /// batch. Returns whether anything changed.
    pub fn repair(&self) -> Result<bool, ServiceError> {
        let mut set = self.repo.write();
        let mut claimed: HashSet<String> = set.platforms.keys().cloned().collect();
        let mut fixed = Vec::new();
        let mut removed = Vec::new();

        for (key, platform) in &set.platforms {
            let mut candidate = platform.clone();
            let mut changed = integrity::repair_platform(&mut candidate, &self.config);
            if candidate.id() != key {
                if claimed.contains(candidate.id()) {
                    warn!(key = %key, id = %candidate.id(), "id already taken, leaving record for manual repair");
                    continue;
                }
                claimed.insert(candidate.id().to_string());
                removed.push(key.clone());
                changed = true;
            }
            if changed {
                fixed.push((key.clone(), candidate));
            }
        }

        if fixed.is_empty() {
            debug!("repair found nothing to fix");
            return Ok(false);
        }

        let platforms: Vec<Platform> = fixed.iter().map(|(_, p)| p.clone()).collect();
        self.store.save_all(&platforms, &removed)?;
        for (key, platform) in fixed {
            set.commit(Some(&key), platform);
        }
        info!(count = platforms.len(), "platforms repaired");
        Ok(true)
    }

    // ── Recovery ────────────────────────────────────────────────────

    /// Re-integrate emergency records not older than (or missing from) the
    /// primary collection, then clear the consumed emergency keys.
    /// Snapshots are counted, never restored.
    pub fn recover_into_primary(&self) -> Result<RecoveryReport, ServiceError> {
        let records = self.store.recover()?;
        let mut report = RecoveryReport::default();
        let mut consumed = Vec::new();
        let mut newest: BTreeMap<String, Platform> = BTreeMap::new();

        let mut set = self.repo.write();
        for record in records {
            match record.tier {
                RecoveryTier::Snapshot => report.snapshots += 1,
                RecoveryTier::Emergency => {
                    consumed.push(record.key);
                    let candidate = record.platform;
                    let id = candidate.id().to_string();
                    let beats_primary = set
                        .get(&id)
                        .map_or(true, |current| candidate.updated_at >= current.updated_at);
                    let beats_seen = newest
                        .get(&id)
                        .map_or(true, |seen| candidate.updated_at >= seen.updated_at);
                    if beats_primary && beats_seen {
                        newest.insert(id, candidate);
                    }
                }
            }
        }

        if !newest.is_empty() {
            let platforms: Vec<Platform> = newest.into_values().collect();
            self.store.save_all(&platforms, &[])?;
            for platform in platforms {
                report.restored.push(platform.id().to_string());
                set.commit(None, platform);
            }
        }
        drop(set);

        self.store.clear_emergency(&consumed);
        report.cleared = consumed.len();
        if report.cleared > 0 {
            info!(restored = report.restored.len(), cleared = report.cleared, "emergency tier reconciled");
        }
        Ok(report)
    }

    // ── Startup reconciliation ──────────────────────────────────────

    /// Page through the remote list and insert records missing locally as
    /// synced platforms. Local records are never overwritten.
    pub async fn pull_remote(&self) -> Result<PullReport, ServiceError> {
        let mut report = PullReport::default();
        if !self.connectivity.is_online() {
            debug!("offline, skipping remote pull");
            return Ok(report);
        }

        let mut params = ListParams {
            limit: self.config.pull_page_size.max(1),
            offset: 0,
        };
        let mut fetched = Vec::new();
        loop {
            let page = match self.remote.list(&params).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(offset = params.offset, error = %e, "remote list failed");
                    break;
                }
            };
            let short = page.len() < params.limit;
            fetched.extend(page);
            if short {
                report.complete = true;
                break;
            }
            params = params.next_page();
        }
        report.fetched = fetched.len();

        let mut set = self.repo.write();
        let mut fresh: BTreeMap<String, Platform> = BTreeMap::new();
        for record in fetched {
            if record.id.is_empty() || set.platforms.contains_key(&record.id) {
                continue;
            }
            fresh.entry(record.id.clone()).or_insert_with(|| record.into_platform());
        }
        if !fresh.is_empty() {
            let platforms: Vec<Platform> = fresh.into_values().collect();
            self.store.save_all(&platforms, &[])?;
            for platform in platforms {
                report.inserted.push(platform.id().to_string());
                set.commit(None, platform);
            }
            info!(count = report.inserted.len(), "remote platforms pulled");
        }
        Ok(report)
    }
}
