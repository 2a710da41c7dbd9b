use crate::liveness::{LivenessCell, LivenessFlag};
use std::sync::{Arc, PoisonError, RwLock};
use toxiwarden_core::{Proxy, ProxyRegistry, ProxySource};
use tracing::{debug, error};

/// Last proxy registry fetched from the managed server.
///
/// Readers get an immutable snapshot; a sync swaps in a whole new one, so
/// nobody ever observes a half-applied update.
pub struct StateCache {
    source: Arc<dyn ProxySource>,
    liveness: Arc<LivenessCell>,
    registry: RwLock<Arc<ProxyRegistry>>,
}

impl StateCache {
    pub fn new(source: Arc<dyn ProxySource>, liveness: Arc<LivenessCell>) -> Self {
        Self {
            source,
            liveness,
            registry: RwLock::new(Arc::new(ProxyRegistry::new())),
        }
    }

    /// Refresh the snapshot from the server.
    ///
    /// Only attempted while the server is confirmed running. Any failure
    /// leaves the previous snapshot in place; an unreachable server also
    /// drops the flag back to unknown.
    pub async fn sync(&self) -> bool {
        if self.liveness.flag() != LivenessFlag::ConfirmedRunning {
            debug!("Skipping sync, toxiproxy server is not confirmed running");
            return false;
        }

        let epoch = self.liveness.epoch();
        match self.source.fetch_proxies().await {
            Ok(registry) => {
                debug!("Synchronized {} proxies from toxiproxy server", registry.len());
                self.replace(registry);
                true
            }
            Err(e) => {
                error!("Error synchronizing state: {e}");
                if e.is_retryable() {
                    self.liveness.demote(epoch);
                }
                false
            }
        }
    }

    pub fn proxies(&self) -> Arc<ProxyRegistry> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn proxy(&self, name: &str) -> Option<Proxy> {
        self.proxies().get(name).cloned()
    }

    pub(crate) fn replace(&self, registry: ProxyRegistry) {
        *self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(registry);
    }
}
