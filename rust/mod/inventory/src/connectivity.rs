use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// What subscribers see: the current state plus a counter bumped on every
/// offline→online transition. A reconnect that happens while a subscriber
/// is busy still shows up as a newer generation afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Link {
    pub online: bool,
    pub generation: u64,
}

/// Shared online/offline flag. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<Link>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(Link {
            online,
            generation: u64::from(online),
        });
        Self { tx: Arc::new(tx) }
    }

    /// Record the current state. Subscribers are woken only on a change.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|link| {
            if link.online == online {
                return false;
            }
            link.online = online;
            if online {
                link.generation += 1;
            }
            true
        });
        if changed {
            info!(online, "connectivity changed");
        }
    }

    pub fn is_online(&self) -> bool {
        self.tx.borrow().online
    }

    /// Number of offline→online transitions so far.
    pub fn generation(&self) -> u64 {
        self.tx.borrow().generation
    }

    pub fn subscribe(&self) -> watch::Receiver<Link> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(false)
    }
}
