use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::instance::{HealthCode, HealthLevel, Instance, InstanceId};
use crate::replicaset::{ReplicaSet, ReplicaSetId};
use crate::router::Router;

/// A copy of the cluster topology at a given time.
///
/// Snapshots are plain values: cloning one yields a deep copy which can be
/// inspected or mutated without touching the live cluster state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unix timestamp of the discovery that produced this snapshot.
    pub created: i64,
    pub routers: Vec<Router>,
    pub replica_sets: Vec<ReplicaSet>,

    /// Operator promotion rules, keyed by instance uuid. Re-applied to the
    /// instances whenever the map or the topology changes.
    #[serde(default)]
    pub priorities: HashMap<InstanceId, i32>,
}

impl Snapshot {
    /// Worst health code across all replica sets, as a level.
    pub fn cluster_health_level(&self) -> HealthLevel {
        let mut worst = HealthCode::Green;
        for set in &self.replica_sets {
            let (code, _) = set.health();
            if code > worst {
                worst = code;
            }
        }
        worst.level()
    }

    /// Instances of the given replica set, if it is known to this snapshot.
    pub fn topology_of(&self, uuid: &str) -> Result<Vec<Instance>> {
        self.replica_set(uuid).map(|set| set.instances.clone())
    }

    pub fn replica_set(&self, uuid: &str) -> Result<&ReplicaSet> {
        self.replica_sets
            .iter()
            .find(|set| set.uuid == uuid)
            .ok_or(Error::ReplicaSetNotFound)
    }

    /// Replaces the promotion rules and pushes them down to the instances.
    /// Instances absent from the map get the default priority of zero.
    pub fn update_priorities(&mut self, priorities: HashMap<InstanceId, i32>) {
        self.priorities = priorities;
        for set in &mut self.replica_sets {
            for inst in &mut set.instances {
                inst.priority = self.priorities.get(&inst.uuid).copied().unwrap_or(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::StorageInfo;

    fn instance(uuid: &str) -> Instance {
        Instance {
            id: 0,
            uuid: uuid.into(),
            uri: format!("{}:3301", uuid),
            readonly: false,
            last_check_valid: true,
            lsn: 0,
            lsn_behind_master: 0,
            upstream: None,
            downstream: None,
            storage_info: StorageInfo {
                status: HealthCode::Green,
                ..StorageInfo::default()
            },
            vshard_fingerprint: 0,
            priority: 0,
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            created: 100,
            routers: vec![Router::new("r:3300".into(), "router-1".into())],
            replica_sets: vec![ReplicaSet {
                uuid: "set-1".into(),
                master_uuid: "m".into(),
                master_uri: "m:3301".into(),
                instances: vec![instance("m"), instance("f1")],
            }],
            priorities: HashMap::new(),
        }
    }

    #[test]
    fn test_topology_of_known_set() {
        let snap = snapshot();
        let instances = snap.topology_of("set-1").unwrap();
        assert_eq!(instances.len(), 2);
    }

    #[test]
    fn test_topology_of_unknown_set() {
        let snap = snapshot();
        assert!(matches!(
            snap.topology_of("set-2"),
            Err(Error::ReplicaSetNotFound)
        ));
    }

    #[test]
    fn test_update_priorities_applies_and_resets() {
        let mut snap = snapshot();
        snap.update_priorities(HashMap::from([("f1".to_string(), 10)]));
        assert_eq!(snap.replica_sets[0].instances[1].priority, 10);
        assert_eq!(snap.replica_sets[0].instances[0].priority, 0);

        snap.update_priorities(HashMap::new());
        assert_eq!(snap.replica_sets[0].instances[1].priority, 0);
    }

    #[test]
    fn test_cluster_health_level_takes_worst() {
        let mut snap = snapshot();
        assert_eq!(snap.cluster_health_level(), HealthLevel::Green);

        snap.replica_sets[0].instances[0].storage_info.status = HealthCode::Orange;
        assert_eq!(snap.cluster_health_level(), HealthLevel::Orange);
    }

    #[test]
    fn test_clone_is_deep() {
        let snap = snapshot();
        let mut copy = snap.clone();
        copy.replica_sets[0].master_uuid = "f1".into();
        assert_eq!(snap.replica_sets[0].master_uuid, "m");
    }

    #[test]
    fn test_serde_round_trip() {
        let mut snap = snapshot();
        snap.update_priorities(HashMap::from([("f1".to_string(), -1)]));
        let encoded = serde_json::to_string(&snap).unwrap();
        let decoded: Snapshot = serde_json::from_str(&encoded).unwrap();
        assert_eq!(snap, decoded);
    }
}
