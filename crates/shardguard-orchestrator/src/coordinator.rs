use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use shardguard_client::BackendFactory;
use shardguard_common::{ClusterName, Error, Result, Snapshot};
use shardguard_storage::{SaveRequest, Storage};

use crate::cluster::{Cluster, ClusterConfig};
use crate::config::OrchestrationConfig;
use crate::failover::{Failover, FailoverConfig};
use crate::hook::{HookType, Hooker};
use crate::monitor::Monitor;
use crate::quorum::Elector;
use crate::recovery::Recovery;

enum Component {
    Cluster(Arc<Cluster>),
    Monitor(Monitor),
    Failover(Arc<Failover>),
}

/// Owns every registered cluster and its pipeline of monitor and
/// failover controller. Shutdown tears the components down in reverse
/// registration order: controller, analyzer, discovery, connections.
pub struct Coordinator {
    storage: Arc<dyn Storage>,
    factory: Arc<dyn BackendFactory>,
    clusters: Mutex<HashMap<ClusterName, Arc<Cluster>>>,
    shutdown_queue: Mutex<Vec<Component>>,
}

impl Coordinator {
    pub fn new(storage: Arc<dyn Storage>, factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            storage,
            factory,
            clusters: Mutex::new(HashMap::new()),
            shutdown_queue: Mutex::new(Vec::new()),
        }
    }

    /// Registers a cluster and starts observing it. A second registration
    /// under the same name is an error.
    pub fn register_cluster(
        &self,
        name: &str,
        cluster_cfg: ClusterConfig,
        orchestration: OrchestrationConfig,
    ) -> Result<()> {
        {
            let clusters = self.clusters.lock().unwrap();
            if clusters.contains_key(name) {
                return Err(Error::ConfigInvalid(format!(
                    "cluster with the name '{}' is already registered",
                    name
                )));
            }
        }

        let cluster = Arc::new(Cluster::new(name, cluster_cfg, self.factory.clone()));

        let storage = self.storage.clone();
        cluster.set_on_discovered(Arc::new(move |cluster_name: &str, snapshot: &Snapshot| {
            let storage = storage.clone();
            let cluster_name = cluster_name.to_string();
            let created_at = snapshot.created;
            let data = match serde_json::to_value(snapshot) {
                Ok(data) => data,
                Err(err) => {
                    tracing::error!(cluster = %cluster_name, %err, "failed to encode the cluster snapshot");
                    return;
                }
            };

            tokio::spawn(async move {
                let req = SaveRequest {
                    cluster_name: cluster_name.clone(),
                    created_at,
                    data,
                };
                if let Err(err) = storage.save_snapshot(req).await {
                    tracing::error!(cluster = %cluster_name, %err, "failed to save the cluster snapshot");
                }
            });
        }));

        let monitor = Monitor::new(cluster.clone(), orchestration.monitor);

        let mut hooker = Hooker::new(orchestration.hooks.shell.clone());
        hooker.set_timeout(orchestration.hooks.timeout);
        hooker.set_timeout_async(orchestration.hooks.timeout_async);
        hooker.add_hooks(HookType::PreFailover, orchestration.hooks.pre_failover);
        hooker.add_hooks(
            HookType::PostSuccessfulFailover,
            orchestration.hooks.post_successful_failover,
        );
        hooker.add_hooks(
            HookType::PostUnsuccessfulFailover,
            orchestration.hooks.post_unsuccessful_failover,
        );

        let elector = Elector::new(orchestration.elector_mode, orchestration.elector_options);
        let failover = Arc::new(Failover::new(
            cluster.clone(),
            FailoverConfig {
                elector,
                hooker,
                set_recovery_block: orchestration.set_recovery_block,
                instance_recovery_block: orchestration.instance_recovery_block,
            },
        ));

        let storage = self.storage.clone();
        failover.set_on_recovered(Arc::new(move |recovery: &Recovery| {
            let storage = storage.clone();
            let cluster_name = recovery.cluster_name.clone();
            let created_at = recovery.start_timestamp;
            let data = match serde_json::to_value(recovery) {
                Ok(data) => data,
                Err(err) => {
                    tracing::error!(cluster = %cluster_name, %err, "failed to encode the recovery record");
                    return;
                }
            };

            tokio::spawn(async move {
                let req = SaveRequest {
                    cluster_name: cluster_name.clone(),
                    created_at,
                    data,
                };
                if let Err(err) = storage.save_recovery(req).await {
                    tracing::error!(cluster = %cluster_name, %err, "failed to save the recovery record");
                }
            });
        }));

        let stream = monitor.serve();
        failover.clone().serve(stream);

        let mut queue = self.shutdown_queue.lock().unwrap();
        queue.push(Component::Cluster(cluster.clone()));
        queue.push(Component::Monitor(monitor));
        queue.push(Component::Failover(failover));

        self.clusters
            .lock()
            .unwrap()
            .insert(name.to_string(), cluster);

        Ok(())
    }

    pub fn cluster_names(&self) -> Vec<ClusterName> {
        let mut names: Vec<_> = self.clusters.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn cluster(&self, name: &str) -> Option<Arc<Cluster>> {
        self.clusters.lock().unwrap().get(name).cloned()
    }

    pub async fn shutdown(&self) {
        let components = {
            let mut queue = self.shutdown_queue.lock().unwrap();
            std::mem::take(&mut *queue)
        };

        for component in components.into_iter().rev() {
            match component {
                Component::Failover(failover) => failover.shutdown(),
                Component::Monitor(monitor) => monitor.shutdown(),
                Component::Cluster(cluster) => cluster.shutdown().await,
            }
        }
    }
}
