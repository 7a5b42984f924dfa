use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use shardguard_common::{InstanceId, ReplicaSet, ReplicationStatus};

/// Diagnostic state of one replica set. Closed taxonomy: every diagnosis
/// lands in exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaSetState {
    NoProblem,
    DeadMaster,
    DeadMasterAndFollowers,
    DeadMasterAndSomeFollowers,
    DeadMasterWithoutFollowers,
    DeadFollowers,
    AllMasterFollowersNotReplicating,
    NetworkProblems,
    MasterMasterReplication,
    InconsistentVShardConfiguration,
}

impl ReplicaSetState {
    pub const ALL: [ReplicaSetState; 10] = [
        ReplicaSetState::NoProblem,
        ReplicaSetState::DeadMaster,
        ReplicaSetState::DeadMasterAndFollowers,
        ReplicaSetState::DeadMasterAndSomeFollowers,
        ReplicaSetState::DeadMasterWithoutFollowers,
        ReplicaSetState::DeadFollowers,
        ReplicaSetState::AllMasterFollowersNotReplicating,
        ReplicaSetState::NetworkProblems,
        ReplicaSetState::MasterMasterReplication,
        ReplicaSetState::InconsistentVShardConfiguration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaSetState::NoProblem => "NoProblem",
            ReplicaSetState::DeadMaster => "DeadMaster",
            ReplicaSetState::DeadMasterAndFollowers => "DeadMasterAndFollowers",
            ReplicaSetState::DeadMasterAndSomeFollowers => "DeadMasterAndSomeFollowers",
            ReplicaSetState::DeadMasterWithoutFollowers => "DeadMasterWithoutFollowers",
            ReplicaSetState::DeadFollowers => "DeadFollowers",
            ReplicaSetState::AllMasterFollowersNotReplicating => {
                "AllMasterFollowersNotReplicating"
            }
            ReplicaSetState::NetworkProblems => "NetworkProblems",
            ReplicaSetState::MasterMasterReplication => "MasterMasterReplication",
            ReplicaSetState::InconsistentVShardConfiguration => {
                "InconsistentVShardConfiguration"
            }
        }
    }
}

impl fmt::Display for ReplicaSetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnosis of one replica set produced from a single snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationAnalysis {
    pub set: ReplicaSet,

    /// Total number of followers in the set.
    pub count_replicas: usize,
    /// Followers polled successfully on the last discovery.
    pub count_working_replicas: usize,
    /// Followers with a confirmed replication link.
    pub count_replicating_replicas: usize,
    /// Working followers whose sharding configuration differs from the
    /// master's.
    pub count_inconsistent_vshard_conf: usize,

    pub state: ReplicaSetState,

    /// Followers that are not currently connected to the leader.
    pub dead_followers: Vec<InstanceId>,
}

impl fmt::Display for ReplicationAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[State: {}; CountReplicas: {}; CountWorkingReplicas: {}; CountReplicatingReplicas: {}]",
            self.state, self.count_replicas, self.count_working_replicas,
            self.count_replicating_replicas,
        )
    }
}

impl ReplicationAnalysis {
    /// Stable fingerprint used to deduplicate repeated identical analyses.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.state.as_str());
        hasher.update(self.count_replicas.to_string());
        hasher.update(self.count_working_replicas.to_string());
        hasher.update(self.count_replicating_replicas.to_string());
        hasher.update(self.count_inconsistent_vshard_conf.to_string());
        hasher.update(self.set.to_string());

        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Classifies a replica set against the diagnostic taxonomy.
///
/// Pure function of the snapshot data. Returns `None` when the master id
/// is absent from the set, which means the snapshot is internally
/// inconsistent: the caller logs and drops such a set.
pub fn analyze(set: &ReplicaSet) -> Option<ReplicationAnalysis> {
    let master = match set.master() {
        Ok(master) => master,
        Err(_) => {
            tracing::error!(
                replica_set = %set.uuid,
                master = %set.master_uuid,
                "fatal analyze error: master not found in the given snapshot, likely an internal error"
            );
            return None;
        }
    };

    let mut count_replicas = 0;
    let mut count_working_replicas = 0;
    let mut count_replicating_replicas = 0;
    let mut count_inconsistent_vshard_conf = 0;
    let mut master_master_replication = false;
    let mut dead_followers = Vec::new();

    for follower in set.followers() {
        count_replicas += 1;
        if follower.last_check_valid {
            count_working_replicas += 1;

            let status = follower.storage_info.replication.status;
            match status {
                ReplicationStatus::Follow => count_replicating_replicas += 1,
                ReplicationStatus::Master => {
                    count_replicating_replicas += 1;
                    master_master_replication = true;

                    tracing::warn!(
                        replica_set = %set.uuid,
                        master = %set.master_uuid,
                        co_master = %follower.uuid,
                        "found M-M replication"
                    );
                }
                ReplicationStatus::Disconnected => dead_followers.push(follower.uuid.clone()),
            }

            if follower.vshard_fingerprint != master.vshard_fingerprint {
                count_inconsistent_vshard_conf += 1;
            }
        } else {
            dead_followers.push(follower.uuid.clone());
        }
    }

    let master_dead = !master.last_check_valid;

    let state = if master_dead
        && count_working_replicas == count_replicas
        && count_replicating_replicas == 0
    {
        if count_replicas == 0 {
            ReplicaSetState::DeadMasterWithoutFollowers
        } else {
            ReplicaSetState::DeadMaster
        }
    } else if master_dead
        && count_working_replicas <= count_replicas
        && count_replicating_replicas == 0
    {
        if count_working_replicas == 0 {
            ReplicaSetState::DeadMasterAndFollowers
        } else {
            ReplicaSetState::DeadMasterAndSomeFollowers
        }
    } else if master_dead && count_replicating_replicas != 0 {
        ReplicaSetState::NetworkProblems
    } else if !master_dead && count_replicas > 0 && count_replicating_replicas == 0 {
        ReplicaSetState::AllMasterFollowersNotReplicating
    } else if count_inconsistent_vshard_conf > 0 {
        if master_master_replication {
            ReplicaSetState::MasterMasterReplication
        } else {
            ReplicaSetState::InconsistentVShardConfiguration
        }
    } else if !master_dead && count_replicas > 0 && count_replicating_replicas < count_replicas {
        ReplicaSetState::DeadFollowers
    } else {
        ReplicaSetState::NoProblem
    };

    Some(ReplicationAnalysis {
        set: set.clone(),
        count_replicas,
        count_working_replicas,
        count_replicating_replicas,
        count_inconsistent_vshard_conf,
        state,
        dead_followers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardguard_common::{
        HealthCode, Instance, Replication, StorageInfo, Upstream, UpstreamStatus,
    };

    fn instance(uuid: &str, valid: bool, repl: ReplicationStatus, fingerprint: u64) -> Instance {
        Instance {
            id: 0,
            uuid: uuid.into(),
            uri: format!("{}:3301", uuid),
            readonly: false,
            last_check_valid: valid,
            lsn: 0,
            lsn_behind_master: 0,
            upstream: Some(Upstream {
                peer: "m:3301".into(),
                status: UpstreamStatus::Follow,
                idle: 0.1,
                lag: 0.0,
                message: String::new(),
            }),
            downstream: None,
            storage_info: StorageInfo {
                status: HealthCode::Green,
                replication: Replication {
                    status: repl,
                    delay: 0.1,
                },
                ..StorageInfo::default()
            },
            vshard_fingerprint: fingerprint,
            priority: 0,
        }
    }

    fn set(instances: Vec<Instance>) -> ReplicaSet {
        ReplicaSet {
            uuid: "set-1".into(),
            master_uuid: "m".into(),
            master_uri: "m:3301".into(),
            instances,
        }
    }

    #[test]
    fn test_no_problem() {
        let rs = set(vec![
            instance("m", true, ReplicationStatus::Master, 1),
            instance("f1", true, ReplicationStatus::Follow, 1),
            instance("f2", true, ReplicationStatus::Follow, 1),
        ]);
        let analysis = analyze(&rs).unwrap();
        assert_eq!(analysis.state, ReplicaSetState::NoProblem);
        assert_eq!(analysis.count_replicas, 2);
        assert_eq!(analysis.count_working_replicas, 2);
        assert_eq!(analysis.count_replicating_replicas, 2);
        assert!(analysis.dead_followers.is_empty());
    }

    #[test]
    fn test_dead_master() {
        let rs = set(vec![
            instance("m", false, ReplicationStatus::Master, 1),
            instance("f1", true, ReplicationStatus::Disconnected, 1),
            instance("f2", true, ReplicationStatus::Disconnected, 1),
        ]);
        let analysis = analyze(&rs).unwrap();
        assert_eq!(analysis.state, ReplicaSetState::DeadMaster);
        assert_eq!(analysis.dead_followers.len(), 2);
    }

    #[test]
    fn test_dead_master_without_followers() {
        let rs = set(vec![instance("m", false, ReplicationStatus::Master, 1)]);
        let analysis = analyze(&rs).unwrap();
        assert_eq!(analysis.state, ReplicaSetState::DeadMasterWithoutFollowers);
        assert_eq!(analysis.count_replicas, 0);
    }

    #[test]
    fn test_dead_master_and_followers() {
        let rs = set(vec![
            instance("m", false, ReplicationStatus::Master, 1),
            instance("f1", false, ReplicationStatus::Follow, 1),
        ]);
        let analysis = analyze(&rs).unwrap();
        assert_eq!(analysis.state, ReplicaSetState::DeadMasterAndFollowers);
    }

    #[test]
    fn test_dead_master_and_some_followers() {
        let rs = set(vec![
            instance("m", false, ReplicationStatus::Master, 1),
            instance("f1", false, ReplicationStatus::Follow, 1),
            instance("f2", true, ReplicationStatus::Disconnected, 1),
        ]);
        let analysis = analyze(&rs).unwrap();
        assert_eq!(analysis.state, ReplicaSetState::DeadMasterAndSomeFollowers);
    }

    #[test]
    fn test_network_problems() {
        let rs = set(vec![
            instance("m", false, ReplicationStatus::Master, 1),
            instance("f1", true, ReplicationStatus::Follow, 1),
        ]);
        let analysis = analyze(&rs).unwrap();
        assert_eq!(analysis.state, ReplicaSetState::NetworkProblems);
    }

    #[test]
    fn test_all_master_followers_not_replicating() {
        let rs = set(vec![
            instance("m", true, ReplicationStatus::Master, 1),
            instance("f1", true, ReplicationStatus::Disconnected, 1),
            instance("f2", false, ReplicationStatus::Follow, 1),
        ]);
        let analysis = analyze(&rs).unwrap();
        assert_eq!(
            analysis.state,
            ReplicaSetState::AllMasterFollowersNotReplicating
        );
    }

    #[test]
    fn test_dead_followers() {
        let rs = set(vec![
            instance("m", true, ReplicationStatus::Master, 1),
            instance("f1", true, ReplicationStatus::Follow, 1),
            instance("f2", true, ReplicationStatus::Disconnected, 1),
        ]);
        let analysis = analyze(&rs).unwrap();
        assert_eq!(analysis.state, ReplicaSetState::DeadFollowers);
        assert_eq!(analysis.dead_followers, vec!["f2".to_string()]);
    }

    #[test]
    fn test_inconsistent_vshard_configuration() {
        let rs = set(vec![
            instance("m", true, ReplicationStatus::Master, 1),
            instance("f1", true, ReplicationStatus::Follow, 1),
            instance("f2", true, ReplicationStatus::Follow, 2),
        ]);
        let analysis = analyze(&rs).unwrap();
        assert_eq!(
            analysis.state,
            ReplicaSetState::InconsistentVShardConfiguration
        );
        assert_eq!(analysis.count_inconsistent_vshard_conf, 1);
    }

    #[test]
    fn test_master_master_replication() {
        let rs = set(vec![
            instance("m", true, ReplicationStatus::Master, 1),
            instance("f1", true, ReplicationStatus::Master, 2),
        ]);
        let analysis = analyze(&rs).unwrap();
        assert_eq!(analysis.state, ReplicaSetState::MasterMasterReplication);
    }

    #[test]
    fn test_master_master_with_same_fingerprint_is_no_problem() {
        // Co-master with an identical sharding configuration: nothing to
        // reconcile, the inconsistency counter stays at zero.
        let rs = set(vec![
            instance("m", true, ReplicationStatus::Master, 1),
            instance("f1", true, ReplicationStatus::Master, 1),
        ]);
        let analysis = analyze(&rs).unwrap();
        assert_eq!(analysis.state, ReplicaSetState::NoProblem);
    }

    #[test]
    fn test_missing_master_is_skipped() {
        let rs = ReplicaSet {
            uuid: "set-1".into(),
            master_uuid: "ghost".into(),
            master_uri: "ghost:3301".into(),
            instances: vec![instance("f1", true, ReplicationStatus::Follow, 1)],
        };
        assert!(analyze(&rs).is_none());
    }

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        let rs = set(vec![
            instance("m", true, ReplicationStatus::Master, 1),
            instance("f1", true, ReplicationStatus::Follow, 1),
        ]);
        let a = analyze(&rs).unwrap();
        assert_eq!(a.fingerprint(), a.clone().fingerprint());

        let mut degraded = rs.clone();
        degraded.instances[0].last_check_valid = false;
        let b = analyze(&degraded).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
