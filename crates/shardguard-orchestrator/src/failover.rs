use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use shardguard_client::Query;
use shardguard_common::{Error, Instance, UpstreamStatus};

use crate::analysis::{ReplicaSetState, ReplicationAnalysis};
use crate::cluster::Cluster;
use crate::hook::{HookType, Hooker};
use crate::instance_sort::failover_order;
use crate::quorum::Elector;
use crate::recovery::{Recovery, RecoveryScope, RecoveryStore};

/// Cadence of the recovery store cleanup.
const CLEANUP_PERIOD: Duration = Duration::from_secs(60);

/// Wiring of one failover controller.
pub struct FailoverConfig {
    pub elector: Elector,
    pub hooker: Hooker,

    /// Quiet period after a set-scope recovery during which the same set
    /// is not recovered again.
    pub set_recovery_block: Duration,

    /// Quiet period after an instance-scope recovery.
    pub instance_recovery_block: Duration,
}

/// Fired for every finished recovery.
pub type RecoveryCallback = Arc<dyn Fn(&Recovery) + Send + Sync>;

/// Consumes the diagnosis stream and drives recoveries: promotes a
/// follower on a dead-master diagnosis, demotes co-masters on a
/// master-master diagnosis, observes everything else.
pub struct Failover {
    cluster: Arc<Cluster>,
    elector: Elector,
    hooker: Hooker,
    store: RecoveryStore,
    set_recovery_block: Duration,
    instance_recovery_block: Duration,
    cancel: CancellationToken,
    on_recovered: RwLock<Option<RecoveryCallback>>,
}

enum RecoveryAction {
    Promote,
    Demote,
}

impl Failover {
    pub fn new(cluster: Arc<Cluster>, cfg: FailoverConfig) -> Self {
        Self {
            cluster,
            elector: cfg.elector,
            hooker: cfg.hooker,
            store: RecoveryStore::new(),
            set_recovery_block: cfg.set_recovery_block,
            instance_recovery_block: cfg.instance_recovery_block,
            cancel: CancellationToken::new(),
            on_recovered: RwLock::new(None),
        }
    }

    /// Registers the callback fired for every finished recovery.
    pub fn set_on_recovered(&self, callback: RecoveryCallback) {
        *self.on_recovered.write().unwrap() = Some(callback);
    }

    /// All recoveries currently retained by the store.
    pub fn recoveries(&self) -> Vec<Recovery> {
        self.store.entries()
    }

    /// Spawns the single consumer of the diagnosis stream. Diagnoses are
    /// processed one at a time, so recoveries for different sets are
    /// serialized here even if the analyzers produced them concurrently.
    pub fn serve(self: Arc<Self>, mut stream: mpsc::UnboundedReceiver<ReplicationAnalysis>) {
        let this = self;

        tokio::spawn(async move {
            let mut cleanup_tick = tokio::time::interval(CLEANUP_PERIOD);

            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => return,
                    _ = cleanup_tick.tick() => this.store.cleanup(false),
                    analysis = stream.recv() => {
                        let Some(analysis) = analysis else { return };
                        if this.should_check() {
                            this.check_and_recover(&analysis).await;
                        }
                    }
                }
            }
        });
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn should_check(&self) -> bool {
        if self.cluster.read_only() {
            tracing::info!(
                cluster = %self.cluster.name(),
                "readonly cluster: skip check and recovery step for all shards"
            );
            return false;
        }
        if self.cluster.has_active_recovery() {
            tracing::info!(
                cluster = %self.cluster.name(),
                "cluster has an active recovery: skip check and recovery step for all shards"
            );
            return false;
        }
        true
    }

    async fn check_and_recover(&self, analysis: &ReplicationAnalysis) {
        tracing::info!(
            cluster = %self.cluster.name(),
            replica_set = %analysis.set.uuid,
            "check and recover: {}", analysis
        );

        let (action, description) = recovery_plan(analysis.state);
        let Some(action) = action else {
            if !description.is_empty() {
                tracing::warn!(
                    cluster = %self.cluster.name(),
                    replica_set = %analysis.set.uuid,
                    "{}", description
                );
            }
            return;
        };

        self.cluster.start_recovery();
        tracing::warn!(
            cluster = %self.cluster.name(),
            replica_set = %analysis.set.uuid,
            "{}", description
        );
        tracing::info!(
            cluster = %self.cluster.name(),
            "cluster snapshot before recovery: {}", self.cluster.dump()
        );

        let recoveries = match action {
            RecoveryAction::Promote => self.promote_follower_to_master(analysis).await,
            RecoveryAction::Demote => self.demote_co_masters(analysis).await,
        };

        for recovery in &recoveries {
            self.store.register(recovery.clone());
            shardguard_metrics::record_recovery_event(
                &recovery.cluster_name,
                recovery.scope.as_str(),
                recovery.is_successful,
            );

            let hook = if recovery.is_successful {
                HookType::PostSuccessfulFailover
            } else {
                HookType::PostUnsuccessfulFailover
            };
            let _ = self.hooker.execute(hook, recovery, false).await;

            let callback = self.on_recovered.read().unwrap().clone();
            if let Some(callback) = callback {
                callback(recovery);
            }

            tracing::info!(
                cluster = %self.cluster.name(),
                "finished recovery: {}", recovery
            );
        }

        if !recoveries.is_empty() {
            tracing::info!(
                cluster = %self.cluster.name(),
                "run a force discovery after the applied recoveries"
            );
            self.cluster.discover().await;
            tracing::info!(
                cluster = %self.cluster.name(),
                "cluster snapshot after recovery: {}", self.cluster.dump()
            );
        }

        self.cluster.stop_recovery();
    }

    /// Promotes an elected follower to master after a dead-master class
    /// diagnosis.
    async fn promote_follower_to_master(&self, analysis: &ReplicationAnalysis) -> Vec<Recovery> {
        let set = &analysis.set;

        if self.store.is_blocked(&set.uuid) {
            tracing::warn!(
                cluster = %self.cluster.name(),
                replica_set = %set.uuid,
                "replica set has been recovered recently so a new failover is blocked"
            );
            return Vec::new();
        }

        let failed = match set.master() {
            Ok(master) => master.ident(),
            Err(_) => return Vec::new(),
        };

        let mut recovery = Recovery::new(RecoveryScope::Set, failed, analysis);
        recovery.expire_after(self.set_recovery_block);
        recovery.cluster_name = self.cluster.name().to_string();

        if self
            .hooker
            .execute(HookType::PreFailover, &recovery, true)
            .await
            .is_err()
        {
            recovery.finish();
            return vec![recovery];
        }

        let candidate_uuid = match self.elector.choose_master(set) {
            Ok(uuid) => uuid,
            Err(err) => {
                tracing::error!(
                    cluster = %self.cluster.name(),
                    replica_set = %set.uuid,
                    %err,
                    "failed to elect a new master"
                );
                recovery.finish();
                return vec![recovery];
            }
        };

        let candidate = match self.cluster.instance(&candidate_uuid) {
            Ok(candidate) => candidate,
            Err(err) => {
                tracing::error!(
                    cluster = %self.cluster.name(),
                    replica_set = %set.uuid,
                    candidate = %candidate_uuid,
                    %err,
                    "elected candidate is not in the snapshot"
                );
                recovery.finish();
                return vec![recovery];
            }
        };
        recovery.successor = Some(candidate.ident());

        if let Err(reason) = should_promote_follower(&candidate) {
            tracing::warn!(
                cluster = %self.cluster.name(),
                replica_set = %set.uuid,
                candidate = %candidate_uuid,
                %reason,
                "promotion of the chosen candidate is too risky, the recovery is interrupted"
            );
            recovery.finish();
            return vec![recovery];
        }

        tracing::info!(
            cluster = %self.cluster.name(),
            replica_set = %set.uuid,
            candidate = %candidate_uuid,
            "new master is elected, going to update the cluster configuration"
        );

        let query = Query::PromoteMaster {
            set: set.uuid.clone(),
            master: candidate_uuid.clone(),
        };

        // First priority is the configuration of the new master itself.
        // If this fails, the recovery aborts: the successor is the only
        // unrecoverable point.
        let conn = self.cluster.connector(&candidate.uri).await;
        match conn.exec(&query).await {
            Ok(_) => {
                tracing::info!(
                    cluster = %self.cluster.name(),
                    instance = %candidate_uuid,
                    uri = %candidate.uri,
                    "configuration of the chosen master was updated"
                );
            }
            Err(err) => {
                tracing::error!(
                    cluster = %self.cluster.name(),
                    instance = %candidate_uuid,
                    uri = %candidate.uri,
                    %err,
                    "recovery fatal error: failed to update the configuration of the chosen master"
                );
                recovery.finish();
                return vec![recovery];
            }
        }

        // Routers next, so write requests are accepted again as quickly
        // as possible.
        for router in self.cluster.routers() {
            let conn = self.cluster.connector(&router.uri).await;
            match conn.exec(&query).await {
                Ok(_) => tracing::info!(
                    cluster = %self.cluster.name(),
                    router = %router.uuid,
                    uri = %router.uri,
                    "configuration was updated on the router"
                ),
                Err(err) => tracing::error!(
                    cluster = %self.cluster.name(),
                    router = %router.uuid,
                    uri = %router.uri,
                    %err,
                    "failed to update the configuration on the router"
                ),
            }
        }

        // Finally the rest of the cluster members.
        let mut instances = self.cluster.instances();
        instances.sort_by(failover_order);
        for inst in &instances {
            if inst.uuid == candidate_uuid {
                continue;
            }

            let conn = self.cluster.connector(&inst.uri).await;
            match conn.exec(&query).await {
                Ok(_) => tracing::info!(
                    cluster = %self.cluster.name(),
                    instance = %inst.uuid,
                    uri = %inst.uri,
                    "configuration was updated on the node"
                ),
                Err(err) => tracing::error!(
                    cluster = %self.cluster.name(),
                    instance = %inst.uuid,
                    uri = %inst.uri,
                    %err,
                    "failed to update the configuration on the node"
                ),
            }
        }

        recovery.is_successful = true;
        recovery.finish();
        vec![recovery]
    }

    /// Applies the follower role back to every co-master of the shard
    /// except the recorded leader.
    async fn demote_co_masters(&self, analysis: &ReplicationAnalysis) -> Vec<Recovery> {
        let set = &analysis.set;

        let master = match set.master() {
            Ok(master) => master.clone(),
            Err(_) => return Vec::new(),
        };

        let query = Query::PromoteMaster {
            set: set.uuid.clone(),
            master: set.master_uuid.clone(),
        };

        let mut recoveries = Vec::new();
        for follower in set.followers() {
            if follower.vshard_fingerprint == master.vshard_fingerprint {
                continue;
            }

            if self.store.is_blocked(&follower.uuid) {
                tracing::warn!(
                    cluster = %self.cluster.name(),
                    instance = %follower.uuid,
                    uri = %follower.uri,
                    "instance has been recovered recently so a new failover is blocked"
                );
                continue;
            }

            let mut recovery = Recovery::new(RecoveryScope::Instance, follower.ident(), analysis);
            recovery.expire_after(self.instance_recovery_block);
            recovery.cluster_name = self.cluster.name().to_string();

            if self
                .hooker
                .execute(HookType::PreFailover, &recovery, true)
                .await
                .is_err()
            {
                recovery.finish();
                recoveries.push(recovery);
                continue;
            }

            let conn = self.cluster.connector(&follower.uri).await;
            match conn.exec(&query).await {
                Ok(_) => {
                    tracing::info!(
                        cluster = %self.cluster.name(),
                        instance = %follower.uuid,
                        uri = %follower.uri,
                        "configuration was updated on the node"
                    );
                    recovery.is_successful = true;
                }
                Err(err) => {
                    tracing::error!(
                        cluster = %self.cluster.name(),
                        instance = %follower.uuid,
                        uri = %follower.uri,
                        %err,
                        "failed to update the configuration on the node"
                    );
                }
            }

            recovery.finish();
            recoveries.push(recovery);
        }

        recoveries
    }
}

/// The fixed dispatch table from a diagnostic state to a recovery action.
fn recovery_plan(state: ReplicaSetState) -> (Option<RecoveryAction>, &'static str) {
    match state {
        ReplicaSetState::NoProblem => (None, ""),
        ReplicaSetState::DeadMaster => (
            Some(RecoveryAction::Promote),
            "master cannot be reached, will run failover",
        ),
        ReplicaSetState::DeadMasterAndSomeFollowers => (
            Some(RecoveryAction::Promote),
            "master cannot be reached and some of its followers are unreachable, will run failover",
        ),
        ReplicaSetState::DeadMasterAndFollowers => (
            None,
            "master cannot be reached and none of its followers is replicating, no actions will be applied",
        ),
        ReplicaSetState::AllMasterFollowersNotReplicating => (
            None,
            "master is reachable but none of its replicas is replicating, no actions will be applied",
        ),
        ReplicaSetState::DeadMasterWithoutFollowers => (
            None,
            "master cannot be reached and has no followers, no actions will be applied",
        ),
        ReplicaSetState::DeadFollowers => (
            None,
            "master is reachable but some of its replicas are not replicating, no actions will be applied",
        ),
        ReplicaSetState::NetworkProblems => (
            None,
            "master cannot be reached but some followers are still replicating, it might be a network problem, no actions will be applied",
        ),
        ReplicaSetState::MasterMasterReplication => (
            Some(RecoveryAction::Demote),
            "found master-master topology, will apply the follower role to all co-masters except the shard leader",
        ),
        ReplicaSetState::InconsistentVShardConfiguration => (
            None,
            "found replicas with an inconsistent sharding topology, no actions will be applied",
        ),
    }
}

/// Checks the chosen candidate to ensure the failover will not make the
/// shard state even worse. Sometimes it is better to give up and let the
/// operators do their job.
fn should_promote_follower(inst: &Instance) -> Result<(), Error> {
    if inst.lsn_behind_master < 0 {
        return Err(Error::ElectionVeto(
            "master LSN is behind the candidate LSN: replication might have been broken before the crash"
                .to_string(),
        ));
    }

    let status = inst.upstream.as_ref().map(|u| u.status);
    if status != Some(UpstreamStatus::Follow) && status != Some(UpstreamStatus::Running) {
        return Err(Error::ElectionVeto(
            "candidate had neither an upstream status follow nor running before the crash"
                .to_string(),
        ));
    }

    Ok(())
}
