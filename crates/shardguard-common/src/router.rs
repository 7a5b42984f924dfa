use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::alert::Alert;
use crate::error::{Error, Result};
use crate::instance::InstanceId;
use crate::replicaset::ReplicaSetId;

/// Unique identifier of a router. Opaque string.
pub type RouterId = String;

/// Availability of a replica set leader as reported by a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderStatus {
    Available,
    Unreachable,
    Missing,
}

impl LeaderStatus {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "available" => Ok(LeaderStatus::Available),
            "unreachable" => Ok(LeaderStatus::Unreachable),
            "missing" => Ok(LeaderStatus::Missing),
            _ => Err(Error::Parse("master.status".into())),
        }
    }
}

/// A stateless frontend which knows the mapping from bucket to replica set
/// and the current leader of each set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Router {
    pub uri: String,
    pub uuid: RouterId,
    pub info: RouterInfo,
}

impl Router {
    pub fn new(uri: String, uuid: RouterId) -> Self {
        Router {
            uri,
            uuid,
            info: RouterInfo {
                status: -1,
                ..RouterInfo::default()
            },
        }
    }
}

/// Per-set leader descriptors known to a router.
pub type RouterReplicaSets = HashMap<ReplicaSetId, LeaderDescriptor>;

/// The last successful info reply of a router.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterInfo {
    pub last_seen: i64,
    pub replica_sets: RouterReplicaSets,
    pub bucket: RouterBucket,
    pub status: i64,
    pub alerts: Vec<Alert>,
}

/// Leader of one replica set as seen by a router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderDescriptor {
    pub uuid: InstanceId,
    pub status: LeaderStatus,
    pub uri: String,
    pub network_timeout: f64,
}

/// Bucket counters known to a router.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterBucket {
    /// Buckets known to the router and available for read requests.
    pub available_ro: i64,

    /// Buckets known to the router and available for read-write requests.
    pub available_rw: i64,

    /// Buckets known to the router but unavailable for any requests.
    pub unknown: i64,

    /// Buckets whose replica sets are not known to the router.
    pub unreachable: i64,
}
