use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::analysis::{analyze, ReplicaSetState, ReplicationAnalysis};
use crate::cluster::Cluster;
use crate::sampler::{SampleLevel, Sampler};

/// Poll cadences of one cluster monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often the topology is rediscovered.
    pub discovery_poll_interval: Duration,

    /// How often the current snapshot is analyzed for failures.
    pub recovery_poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            discovery_poll_interval: Duration::from_secs(5),
            recovery_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Drives continuous discovery of one cluster and streams the resulting
/// diagnoses to the failover controller.
pub struct Monitor {
    cluster: Arc<Cluster>,
    config: MonitorConfig,
    cancel: CancellationToken,
}

impl Monitor {
    pub fn new(cluster: Arc<Cluster>, config: MonitorConfig) -> Self {
        Self {
            cluster,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Spawns the discovery and analysis loops. The returned stream yields
    /// one diagnosis per replica set per analyzed snapshot; its sole
    /// consumer is the failover controller.
    pub fn serve(&self) -> mpsc::UnboundedReceiver<ReplicationAnalysis> {
        let (tx, rx) = mpsc::unbounded_channel();

        let cluster = self.cluster.clone();
        let config = self.config.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut discovery_tick = tokio::time::interval(config.discovery_poll_interval);
            let mut recovery_tick = tokio::time::interval(config.recovery_poll_interval);

            // Give discovery a chance to see the whole cluster before the
            // first failure detection is allowed to act on it.
            let started_at = tokio::time::Instant::now();
            let quiet_period = 3 * config.discovery_poll_interval;

            let sampler = Arc::new(Sampler::new(true));
            let mut analyzed: i64 = 0;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = discovery_tick.tick() => {
                        let cluster = cluster.clone();
                        tokio::spawn(async move { cluster.discover().await });
                    }
                    _ = recovery_tick.tick() => {
                        if started_at.elapsed() < quiet_period {
                            tracing::info!(
                                cluster = %cluster.name(),
                                "waiting for {:?} to pass before running failure detection",
                                quiet_period
                            );
                            continue;
                        }
                        analyzed = check_cluster(&cluster, &tx, &sampler, analyzed);
                    }
                }
            }
        });

        rx
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Analyzes every replica set of the current snapshot, unless that
/// snapshot was already analyzed. Returns the timestamp now covered.
fn check_cluster(
    cluster: &Arc<Cluster>,
    stream: &mpsc::UnboundedSender<ReplicationAnalysis>,
    sampler: &Arc<Sampler>,
    analyzed: i64,
) -> i64 {
    let discovered = cluster.last_discovered();
    if discovered <= analyzed {
        // Prevent repeated analyzes of the same cluster topology.
        return analyzed;
    }

    for set in cluster.replica_sets() {
        let cluster = cluster.clone();
        let stream = stream.clone();
        let sampler = sampler.clone();

        tokio::spawn(async move {
            let analysis = match analyze(&set) {
                Some(analysis) => analysis,
                None => return,
            };

            match sampler.sample(&analysis) {
                SampleLevel::Info => tracing::info!(
                    cluster = %cluster.name(),
                    replica_set = %set.uuid,
                    "analysis: {}", analysis
                ),
                SampleLevel::Debug => tracing::debug!(
                    cluster = %cluster.name(),
                    replica_set = %set.uuid,
                    "analysis: {}", analysis
                ),
            }

            for state in ReplicaSetState::ALL {
                shardguard_metrics::set_shard_state(
                    cluster.name(),
                    &set.uuid,
                    &set.master_uri,
                    state.as_str(),
                    state == analysis.state,
                );
            }

            let _ = stream.send(analysis);
        });
    }

    discovered
}
