use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use shardguard_client::pool::OverrideUriRules;
use shardguard_client::{BackendFactory, ConnOptions, ConnPool, Connector, Query};
use shardguard_common::parser;
use shardguard_common::{
    now_unix, ClusterName, Error, Instance, InstanceId, LeaderDescriptor, LeaderStatus,
    ReplicaSet, Result, Router, RouterId, Snapshot,
};

/// Hard deadline of one discovery tick.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// One router from the cluster configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub name: String,
    pub addr: String,
    pub uuid: RouterId,
}

/// Static description of a registered cluster.
#[derive(Debug, Clone, Default)]
pub struct ClusterConfig {
    pub readonly: bool,
    pub connection: ConnOptions,
    pub override_uri_rules: OverrideUriRules,
    pub priorities: HashMap<InstanceId, i32>,
    pub routers: Vec<RouterConfig>,
}

/// Fired after every installed snapshot.
pub type DiscoveryCallback = Arc<dyn Fn(&str, &Snapshot) + Send + Sync>;

/// Live state of one registered cluster: the connection pool, the current
/// topology snapshot and the discovery engine that refreshes it.
pub struct Cluster {
    name: ClusterName,
    pool: ConnPool,

    snapshot: RwLock<Snapshot>,

    read_only: AtomicBool,
    has_active_recovery: AtomicBool,

    // Last logged state line per set, keyed by its hash.
    set_states: RwLock<HashMap<String, String>>,

    on_discovered: RwLock<Option<DiscoveryCallback>>,
}

impl Cluster {
    pub fn new(name: impl Into<ClusterName>, cfg: ClusterConfig, factory: Arc<dyn BackendFactory>) -> Self {
        let mut snapshot = Snapshot {
            created: now_unix(),
            routers: cfg
                .routers
                .iter()
                .map(|r| Router::new(r.addr.clone(), r.uuid.clone()))
                .collect(),
            replica_sets: Vec::new(),
            priorities: HashMap::new(),
        };
        snapshot.update_priorities(cfg.priorities);

        Self {
            name: name.into(),
            pool: ConnPool::new(cfg.connection, cfg.override_uri_rules, factory),
            snapshot: RwLock::new(snapshot),
            read_only: AtomicBool::new(cfg.readonly),
            has_active_recovery: AtomicBool::new(false),
            set_states: RwLock::new(HashMap::new()),
            on_discovered: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers the callback fired after every installed snapshot.
    pub fn set_on_discovered(&self, callback: DiscoveryCallback) {
        *self.on_discovered.write().unwrap() = Some(callback);
    }

    pub async fn connector(&self, uri: &str) -> Arc<Connector> {
        self.pool.get(uri).await
    }

    /// Timestamp of the current snapshot.
    pub fn last_discovered(&self) -> i64 {
        self.snapshot.read().unwrap().created
    }

    /// JSON rendering of the current snapshot.
    pub fn dump(&self) -> String {
        let snapshot = self.snapshot.read().unwrap();
        serde_json::to_string(&*snapshot).unwrap_or_default()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.read().unwrap().clone()
    }

    /// Whether the orchestrator may run a failover or should only observe.
    pub fn read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    pub fn set_read_only(&self, v: bool) {
        self.read_only.store(v, Ordering::SeqCst);
    }

    pub fn start_recovery(&self) {
        self.has_active_recovery.store(true, Ordering::SeqCst);
    }

    pub fn stop_recovery(&self) {
        self.has_active_recovery.store(false, Ordering::SeqCst);
    }

    /// Whether a failover is currently being applied to this cluster.
    pub fn has_active_recovery(&self) -> bool {
        self.has_active_recovery.load(Ordering::SeqCst)
    }

    pub fn set_priorities(&self, priorities: HashMap<InstanceId, i32>) {
        self.snapshot.write().unwrap().update_priorities(priorities);
    }

    pub fn routers(&self) -> Vec<Router> {
        self.snapshot.read().unwrap().routers.clone()
    }

    pub fn replica_sets(&self) -> Vec<ReplicaSet> {
        self.snapshot.read().unwrap().replica_sets.clone()
    }

    pub fn replica_set(&self, uuid: &str) -> Result<ReplicaSet> {
        self.snapshot
            .read()
            .unwrap()
            .replica_set(uuid)
            .cloned()
    }

    pub fn instances(&self) -> Vec<Instance> {
        self.snapshot
            .read()
            .unwrap()
            .replica_sets
            .iter()
            .flat_map(|set| set.instances.iter().cloned())
            .collect()
    }

    pub fn instance(&self, uuid: &str) -> Result<Instance> {
        self.snapshot
            .read()
            .unwrap()
            .replica_sets
            .iter()
            .flat_map(|set| set.instances.iter())
            .find(|inst| inst.uuid == uuid)
            .cloned()
            .ok_or(Error::InstanceNotFound)
    }

    pub async fn shutdown(&self) {
        self.pool.close().await;
    }

    /// One discovery tick: rebuilds the topology snapshot from a randomly
    /// chosen router and parallel per-instance probes, then installs it if
    /// it is not older than the current one.
    pub async fn discover(&self) {
        let txn = shardguard_metrics::start_cluster_discovery(&self.name);
        let deadline = Instant::now() + DISCOVERY_TIMEOUT;

        // Work against a copy so concurrent readers and a concurrent
        // discovery never observe a half-built snapshot.
        let snapshot = self.snapshot();

        let router = match pick_random_router(&snapshot.routers) {
            Some(router) => router,
            None => {
                tracing::error!(
                    cluster = %self.name,
                    "there is no router in the cluster to discover its topology"
                );
                return;
            }
        };
        tracing::debug!(
            cluster = %self.name,
            router = %router.uuid,
            uri = %router.uri,
            "picked up a router to discover the cluster topology"
        );

        let conn = self.pool.get(&router.uri).await;
        let reply = match conn.exec_until(&Query::RouterInfo, deadline).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(
                    cluster = %self.name,
                    router = %router.uuid,
                    uri = %router.uri,
                    %err,
                    "failed to discover the topology of the cluster"
                );
                shardguard_metrics::record_discovery_error(&self.name, &router.uri);
                return;
            }
        };

        let mut router_info = match parser::parse_router_info(&reply) {
            Ok(info) => info,
            Err(err) => {
                tracing::error!(
                    cluster = %self.name,
                    router = %router.uuid,
                    uri = %router.uri,
                    %err,
                    "failed to decode the topology reported by the router"
                );
                shardguard_metrics::record_discovery_error(&self.name, &router.uri);
                return;
            }
        };
        router_info.last_seen = now_unix();

        // Poll every replica set of the cluster in parallel.
        let probes = router_info.replica_sets.iter().map(|(set_uuid, leader)| {
            let prev = &snapshot;
            async move {
                let instances = match self.discover_replication(leader, deadline).await {
                    Ok(instances) => instances,
                    Err(err) => {
                        tracing::warn!(
                            cluster = %self.name,
                            replica_set = %set_uuid,
                            leader = %leader.uuid,
                            uri = %leader.uri,
                            %err,
                            "failed to update the topology, will use the previous snapshot"
                        );

                        match prev.topology_of(set_uuid) {
                            Ok(instances) => instances,
                            Err(_) => {
                                tracing::error!(
                                    cluster = %self.name,
                                    replica_set = %set_uuid,
                                    uri = %leader.uri,
                                    "there is no previous snapshot of the topology"
                                );
                                return None;
                            }
                        }
                    }
                };

                let mut instances = instances;
                self.discover_instances(&mut instances, deadline).await;

                Some(ReplicaSet {
                    uuid: set_uuid.clone(),
                    master_uuid: leader.uuid.clone(),
                    master_uri: leader.uri.clone(),
                    instances,
                })
            }
        });
        let discovered: Vec<ReplicaSet> = futures::future::join_all(probes)
            .await
            .into_iter()
            .flatten()
            .collect();

        let mut new_snapshot = Snapshot {
            created: now_unix(),
            routers: snapshot.routers.clone(),
            replica_sets: discovered,
            priorities: HashMap::new(),
        };
        if let Some(entry) = new_snapshot
            .routers
            .iter_mut()
            .find(|r| r.uuid == router.uuid)
        {
            entry.info = router_info;
        }

        for set in &new_snapshot.replica_sets {
            let (code, _) = set.health();
            shardguard_metrics::set_shard_critical_level(
                &self.name,
                &set.uuid,
                &set.master_uri,
                code as i64,
            );
            self.log_set_state(set);
        }

        let installed = {
            let mut current = self.snapshot.write().unwrap();
            // A concurrent tick may have installed a fresher snapshot
            // while this one was being assembled.
            if current.created <= new_snapshot.created {
                let priorities = current.priorities.clone();
                new_snapshot.update_priorities(priorities);
                *current = new_snapshot.clone();
                true
            } else {
                false
            }
        };

        if installed {
            let callback = self.on_discovered.read().unwrap().clone();
            if let Some(callback) = callback {
                callback(&self.name, &new_snapshot);
            }
        }

        txn.end();
    }

    async fn discover_replication(
        &self,
        leader: &LeaderDescriptor,
        deadline: Instant,
    ) -> Result<Vec<Instance>> {
        if leader.status != LeaderStatus::Available {
            return Err(Error::MasterNotAvailable);
        }

        let conn = self.pool.get(&leader.uri).await;
        let reply = conn.exec_until(&Query::Replication, deadline).await?;
        let mut instances = parser::parse_replication(&reply)?;

        // The master is not in its own upstream, so its URI has to be
        // patched from the router descriptor.
        for inst in &mut instances {
            if inst.uuid == leader.uuid {
                inst.uri = leader.uri.clone();
                break;
            }
        }

        Ok(instances)
    }

    async fn discover_instances(&self, instances: &mut [Instance], deadline: Instant) {
        let probes = instances
            .iter_mut()
            .map(|inst| self.discover_instance(inst, deadline));
        futures::future::join_all(probes).await;
    }

    async fn discover_instance(&self, inst: &mut Instance, deadline: Instant) {
        let txn = shardguard_metrics::start_instance_discovery(&self.name, &inst.uri);

        let conn = self.pool.get(&inst.uri).await;
        let reply = match conn.exec_until(&Query::InstanceInfo, deadline).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(
                    cluster = %self.name,
                    instance = %inst.uuid,
                    uri = %inst.uri,
                    %err,
                    "failed to discover the instance"
                );
                shardguard_metrics::record_discovery_error(&self.name, &inst.uri);
                inst.last_check_valid = false;
                return;
            }
        };

        let info = match parser::parse_instance_info(&reply) {
            Ok(info) => info,
            Err(err) => {
                tracing::error!(
                    cluster = %self.name,
                    instance = %inst.uuid,
                    uri = %inst.uri,
                    %err,
                    "failed to read info of the instance"
                );
                inst.last_check_valid = false;
                return;
            }
        };

        inst.readonly = info.readonly;
        inst.storage_info = info.storage_info;
        inst.vshard_fingerprint = info.vshard_fingerprint;
        inst.last_check_valid = true;

        txn.end();
    }

    /// Logs the one-line state of a set, once per distinct state.
    fn log_set_state(&self, set: &ReplicaSet) {
        let state = set.to_string();
        let hash = state_hash(&state);

        {
            let states = self.set_states.read().unwrap();
            if states.get(set.uuid.as_str()) == Some(&hash) {
                return;
            }
        }

        tracing::info!(cluster = %self.name, "set state: {}", state);

        self.set_states
            .write()
            .unwrap()
            .insert(set.uuid.clone(), hash);
    }
}

fn state_hash(state: &str) -> String {
    let digest = Sha256::digest(state.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn pick_random_router(routers: &[Router]) -> Option<Router> {
    if routers.is_empty() {
        return None;
    }
    let idx = rand::thread_rng().gen_range(0..routers.len());
    Some(routers[idx].clone())
}
