//! Node health monitoring and the orphan-reservation janitor.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::client::NodeClientFactory;
use crate::config::GridConfig;
use crate::registry::NodeRegistry;

/// Consecutive failed probes before a stale node is evicted.
const EVICT_AFTER_FAILURES: u32 = 3;

/// Periodically sweeps the fleet: a node whose heartbeat has gone stale
/// gets an active status probe, and repeated probe failures evict it.
///
/// Transport errors on the session path never evict; this loop is the only
/// component with that authority.
pub struct HealthMonitor {
    registry: Arc<NodeRegistry>,
    clients: Arc<dyn NodeClientFactory>,
    config: GridConfig,
    failures: Mutex<HashMap<String, u32>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        clients: Arc<dyn NodeClientFactory>,
        config: GridConfig,
    ) -> Self {
        Self {
            registry,
            clients,
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Run the sweep on the heartbeat cadence until shutdown.
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.heartbeat_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.sweep().await,
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    /// One pass over the fleet.
    pub async fn sweep(&self) {
        let unhealthy_after = self.config.unhealthy_after();
        let stale: Vec<(String, String)> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|n| n.last_heartbeat.elapsed() > unhealthy_after)
            .map(|n| (n.node_id, n.external_uri))
            .collect();

        // a node whose heartbeats resumed sheds its failure history
        {
            let mut failures = self.failures.lock().await;
            failures.retain(|node_id, _| stale.iter().any(|(id, _)| id == node_id));
        }

        for (node_id, uri) in stale {
            let client = self.clients.client_for(&uri);
            match timeout(self.config.health_probe_timeout(), client.status()).await {
                Ok(Ok(_)) => {
                    self.failures.lock().await.remove(&node_id);
                    tracing::debug!(node_id = %node_id, "stale node answered its probe");
                }
                Ok(Err(err)) => self.record_failure(&node_id, &err.to_string()).await,
                Err(_) => self.record_failure(&node_id, "probe timed out").await,
            }
        }
    }

    async fn record_failure(&self, node_id: &str, cause: &str) {
        let count = {
            let mut failures = self.failures.lock().await;
            let entry = failures.entry(node_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        tracing::warn!(
            node_id = %node_id,
            consecutive = count,
            cause = %cause,
            "health probe failed"
        );
        if count >= EVICT_AFTER_FAILURES {
            self.failures.lock().await.remove(node_id);
            self.registry.evict(node_id, "unhealthy").await;
        }
    }
}

/// Forcibly releases reservations that outlived the node-RPC deadline.
pub struct Janitor {
    registry: Arc<NodeRegistry>,
    config: GridConfig,
}

impl Janitor {
    pub fn new(registry: Arc<NodeRegistry>, config: GridConfig) -> Self {
        Self { registry, config }
    }

    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.janitor_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let swept = self
                            .registry
                            .sweep_stale_reservations(self.config.node_rpc_timeout())
                            .await;
                        if swept > 0 {
                            tracing::warn!(swept, "janitor released orphaned reservations");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}
