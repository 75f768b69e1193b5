use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{InventoryEngine, SyncOutcome};

/// Totals of one sequential sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    /// In flight elsewhere, already synced, gone, or connectivity dropped.
    pub skipped: usize,
}

/// Sync every flagged platform, one at a time, through the create path.
/// Failures stay flagged until the next pass.
pub async fn sync_pending(engine: &InventoryEngine) -> SyncSummary {
    let ids = engine.pending_sync_ids();
    let mut summary = SyncSummary::default();
    if ids.is_empty() {
        debug!("sync pass: nothing flagged");
        return summary;
    }

    info!("sync pass started for {} platforms", ids.len());
    for id in ids {
        summary.attempted += 1;
        match engine.sync_platform(&id).await {
            SyncOutcome::Synced { .. } => summary.synced += 1,
            SyncOutcome::Failed(_) => summary.failed += 1,
            outcome => {
                debug!(id = %id, ?outcome, "sync skipped");
                summary.skipped += 1;
            }
        }
    }

    if summary.failed > 0 {
        warn!(
            synced = summary.synced,
            failed = summary.failed,
            "sync pass finished with failures"
        );
    } else {
        info!(synced = summary.synced, skipped = summary.skipped, "sync pass finished");
    }
    summary
}

/// Start the background coordinator.
///
/// Runs a pass immediately if already online, then one whenever the link
/// is up and has reconnected since the last pass began. Reconnects that
/// happen during a pass trigger another pass after it. Passes never
/// overlap. Returns a CancellationToken that stops the loop when cancelled.
pub fn start(engine: Arc<InventoryEngine>) -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let mut rx = engine.connectivity().subscribe();

    tokio::spawn(async move {
        info!("sync coordinator started");
        let link = *rx.borrow_and_update();
        let mut seen = link.generation;
        if link.online {
            sync_pending(&engine).await;
        }

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("sync coordinator stopped");
                    break;
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let link = *rx.borrow_and_update();
                    let reconnected = link.generation != seen;
                    seen = link.generation;
                    if link.online && reconnected {
                        sync_pending(&engine).await;
                    }
                }
            }
        }
    });

    cancel
}
