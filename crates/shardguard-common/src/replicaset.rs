use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::instance::{
    DownstreamStatus, HealthCode, HealthLevel, Instance, InstanceId, UpstreamStatus,
};

/// Unique identifier of a replica set in the cluster. Opaque string.
pub type ReplicaSetId = String;

/// One leader plus zero or more followers replicating from it.
/// The unit of failover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSet {
    /// Unique identifier of the replica set.
    pub uuid: ReplicaSetId,

    /// Identifier of the current master in the replica set.
    pub master_uuid: InstanceId,

    /// URI of the current master in the replica set.
    pub master_uri: String,

    /// Replication statistics and storage info for all instances
    /// in regard to the current master.
    pub instances: Vec<Instance>,
}

impl ReplicaSet {
    /// Change-detection equality: same id, same master and the same
    /// multiset of `(uuid, uri, fingerprint)` triples.
    pub fn same_as(&self, other: &ReplicaSet) -> bool {
        if self.uuid != other.uuid
            || self.master_uuid != other.master_uuid
            || self.instances.len() != other.instances.len()
        {
            return false;
        }

        let mut left: Vec<_> = self
            .instances
            .iter()
            .map(|i| (&i.uuid, &i.uri, i.vshard_fingerprint))
            .collect();
        let mut right: Vec<_> = other
            .instances
            .iter()
            .map(|i| (&i.uuid, &i.uri, i.vshard_fingerprint))
            .collect();
        left.sort();
        right.sort();

        left == right
    }

    /// Health of the set is the health its master reports. Unknown when
    /// the master is absent from the snapshot.
    pub fn health(&self) -> (HealthCode, HealthLevel) {
        match self.master() {
            Ok(master) => (master.critical_code(), master.critical_level()),
            Err(_) => (HealthCode::Unknown, HealthLevel::Unknown),
        }
    }

    pub fn followers(&self) -> Vec<Instance> {
        self.instances
            .iter()
            .filter(|inst| inst.uuid != self.master_uuid)
            .cloned()
            .collect()
    }

    /// Followers which were polled successfully and keep at least one
    /// replication link in a non-broken state. A follower with neither an
    /// upstream nor a downstream record is not alive.
    pub fn alive_followers(&self) -> Vec<Instance> {
        self.instances
            .iter()
            .filter(|inst| inst.uuid != self.master_uuid && inst.last_check_valid)
            .filter(|inst| match (&inst.upstream, &inst.downstream) {
                (Some(upstream), _) => {
                    upstream.status != UpstreamStatus::Disconnected
                        && upstream.status != UpstreamStatus::Stopped
                }
                (None, Some(downstream)) => downstream.status != DownstreamStatus::Stopped,
                (None, None) => false,
            })
            .cloned()
            .collect()
    }

    pub fn master(&self) -> Result<&Instance> {
        self.instances
            .iter()
            .find(|inst| inst.uuid == self.master_uuid)
            .ok_or(Error::InstanceNotFound)
    }
}

impl fmt::Display for ReplicaSet {
    /// Minimal one-line rendering, only important info. The output is
    /// stable: its hash is used to deduplicate set-state log records.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (_, level) = self.health();
        write!(
            f,
            "id: {}; master: {}; master uri: {}; size: {}; health: {}",
            self.uuid,
            self.master_uuid,
            self.master_uri,
            self.instances.len(),
            level
        )?;

        if level == HealthLevel::Green {
            return Ok(());
        }

        write!(f, "; alerts: [")?;
        let mut pretty_list = false;
        for inst in &self.instances {
            if inst.storage_info.alerts.is_empty() {
                continue;
            }
            if pretty_list {
                write!(f, ", ")?;
            }
            write!(f, "{} -> ", inst.uri)?;
            for (i, alert) in inst.storage_info.alerts.iter().enumerate() {
                write!(f, "{}", alert)?;
                if i != inst.storage_info.alerts.len() - 1 {
                    write!(f, ", ")?;
                }
            }
            pretty_list = true;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::Alert;
    use crate::instance::{Downstream, StorageInfo, Upstream};

    fn follower(uuid: &str, status: UpstreamStatus, valid: bool) -> Instance {
        Instance {
            id: 0,
            uuid: uuid.into(),
            uri: format!("{}:3301", uuid),
            readonly: true,
            last_check_valid: valid,
            lsn: 0,
            lsn_behind_master: 0,
            upstream: Some(Upstream {
                peer: "master:3301".into(),
                status,
                idle: 0.1,
                lag: 0.0,
                message: String::new(),
            }),
            downstream: None,
            storage_info: StorageInfo {
                status: HealthCode::Green,
                ..StorageInfo::default()
            },
            vshard_fingerprint: 42,
            priority: 0,
        }
    }

    fn master(uuid: &str) -> Instance {
        let mut inst = follower(uuid, UpstreamStatus::Running, true);
        inst.readonly = false;
        inst.upstream = None;
        inst.downstream = Some(Downstream {
            status: DownstreamStatus::Follow,
        });
        inst
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
    fn test_master_lookup() {
        let rs = set(vec![
            master("m"),
            follower("f1", UpstreamStatus::Follow, true),
        ]);
        assert_eq!(rs.master().unwrap().uuid, "m");
    }

    #[test]
    fn test_master_missing() {
        let rs = set(vec![follower("f1", UpstreamStatus::Follow, true)]);
        assert!(rs.master().is_err());
    }

    #[test]
    fn test_followers_excludes_master() {
        let rs = set(vec![
            master("m"),
            follower("f1", UpstreamStatus::Follow, true),
            follower("f2", UpstreamStatus::Stopped, true),
        ]);
        let followers = rs.followers();
        assert_eq!(followers.len(), 2);
        assert!(followers.iter().all(|i| i.uuid != "m"));
    }

    #[test]
    fn test_alive_followers_filters_broken_links() {
        let rs = set(vec![
            master("m"),
            follower("f1", UpstreamStatus::Follow, true),
            follower("f2", UpstreamStatus::Disconnected, true),
            follower("f3", UpstreamStatus::Stopped, true),
            follower("f4", UpstreamStatus::Follow, false),
        ]);
        let alive = rs.alive_followers();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].uuid, "f1");
    }

    #[test]
    fn test_alive_followers_via_downstream_only() {
        let mut f = follower("f1", UpstreamStatus::Follow, true);
        f.upstream = None;
        f.downstream = Some(Downstream {
            status: DownstreamStatus::Follow,
        });
        let rs = set(vec![master("m"), f]);
        assert_eq!(rs.alive_followers().len(), 1);

        let mut stopped = follower("f2", UpstreamStatus::Follow, true);
        stopped.upstream = None;
        stopped.downstream = Some(Downstream {
            status: DownstreamStatus::Stopped,
        });
        let rs = set(vec![master("m"), stopped]);
        assert!(rs.alive_followers().is_empty());
    }

    #[test]
    fn test_alive_followers_without_any_link() {
        let mut f = follower("f1", UpstreamStatus::Follow, true);
        f.upstream = None;
        f.downstream = None;
        let rs = set(vec![master("m"), f]);
        assert!(rs.alive_followers().is_empty());
    }

    #[test]
    fn test_same_as_ignores_instance_order() {
        let a = set(vec![
            master("m"),
            follower("f1", UpstreamStatus::Follow, true),
        ]);
        let b = set(vec![
            follower("f1", UpstreamStatus::Follow, true),
            master("m"),
        ]);
        assert!(a.same_as(&b));
    }

    #[test]
    fn test_same_as_detects_fingerprint_change() {
        let a = set(vec![
            master("m"),
            follower("f1", UpstreamStatus::Follow, true),
        ]);
        let mut b = a.clone();
        b.instances[1].vshard_fingerprint = 7;
        assert!(!a.same_as(&b));
    }

    #[test]
    fn test_same_as_detects_master_change() {
        let a = set(vec![
            master("m"),
            follower("f1", UpstreamStatus::Follow, true),
        ]);
        let mut b = a.clone();
        b.master_uuid = "f1".into();
        assert!(!a.same_as(&b));
    }

    #[test]
    fn test_display_green_is_minimal() {
        let rs = set(vec![
            master("m"),
            follower("f1", UpstreamStatus::Follow, true),
        ]);
        let s = rs.to_string();
        assert_eq!(
            s,
            "id: set-1; master: m; master uri: m:3301; size: 2; health: green"
        );
    }

    #[test]
    fn test_display_degraded_lists_alerts() {
        let mut m = master("m");
        m.storage_info.status = HealthCode::Orange;
        m.storage_info.alerts.push(Alert {
            kind: "UNREACHABLE_REPLICA".into(),
            description: "lost".into(),
        });
        let rs = set(vec![m, follower("f1", UpstreamStatus::Follow, true)]);
        let s = rs.to_string();
        assert!(s.contains("health: orange"));
        assert!(s.contains("UNREACHABLE_REPLICA: \"lost\""));
    }

    #[test]
    fn test_display_is_stable() {
        let rs = set(vec![
            master("m"),
            follower("f1", UpstreamStatus::Follow, true),
        ]);
        assert_eq!(rs.to_string(), rs.clone().to_string());
    }
}
