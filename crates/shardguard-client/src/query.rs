use std::time::Duration;

use serde_json::{json, Value};

use shardguard_common::{InstanceId, ReplicaSetId};

/// A request understood by every node of a managed cluster.
///
/// The wire representation is owned by the [`Backend`](crate::Backend)
/// implementation; the orchestrator only ever deals in these variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Ask a router for its status, bucket counters and the leader of
    /// every replica set it knows about.
    RouterInfo,

    /// Ask a storage node for the replication records of its local
    /// replica set, one per instance.
    Replication,

    /// Ask a node for its read-only flag, sharding configuration
    /// fingerprint and storage health.
    InstanceInfo,

    /// Rewrite the sharding configuration on the target node so that
    /// `master` is the single writable instance of `set`. A storage
    /// node belonging to `set` also flips its local read-only flag.
    PromoteMaster {
        set: ReplicaSetId,
        master: InstanceId,
    },
}

impl Query {
    /// Wire envelope of the query. Stable: probes are identified by the
    /// `op` field.
    pub fn to_wire(&self) -> Value {
        match self {
            Query::RouterInfo => json!({"op": "router_info"}),
            Query::Replication => json!({"op": "replication"}),
            Query::InstanceInfo => json!({"op": "instance_info"}),
            Query::PromoteMaster { set, master } => json!({
                "op": "promote_master",
                "set": set,
                "master": master,
            }),
        }
    }
}

/// Options applied to every connection built by the pool.
#[derive(Debug, Clone)]
pub struct ConnOptions {
    pub user: String,
    pub password: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ConnOptions {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: String::new(),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
        }
    }
}
