//! Shardguard Common Types
//!
//! This crate holds the topology data model shared by every shardguard
//! component: instances, replica sets, routers, cluster snapshots and the
//! decoders that turn dynamically typed database replies into those records.
//!
//! # Overview
//!
//! A shardguard-managed cluster is a set of *replica sets* (one writable
//! leader plus asynchronous followers) federated by stateless *routers*.
//! The discovery engine polls the cluster and materializes a [`Snapshot`],
//! an immutable value describing the whole topology at one instant.
//!
//! # Components
//!
//! - [`instance`] - Instances, replication statistics and storage health
//! - [`replicaset`] - Replica sets and follower classification
//! - [`router`] - Routers and the per-set leader descriptors they report
//! - [`snapshot`] - Deep-copyable topology snapshots
//! - [`parser`] - Decoders for router/replication/storage replies
//! - [`error`] - The error type used across all shardguard crates

pub mod alert;
pub mod error;
pub mod instance;
pub mod parser;
pub mod replicaset;
pub mod router;
pub mod snapshot;

pub use alert::{Alert, AlertType};
pub use error::{Error, Result};
pub use instance::{
    Downstream, DownstreamStatus, HealthCode, HealthLevel, Instance, InstanceBucket, InstanceId,
    InstanceIdent, InstanceInfo, Replication, ReplicationStatus, StorageInfo, Upstream,
    UpstreamStatus,
};
pub use replicaset::{ReplicaSet, ReplicaSetId};
pub use router::{
    LeaderDescriptor, LeaderStatus, Router, RouterBucket, RouterId, RouterInfo, RouterReplicaSets,
};
pub use snapshot::Snapshot;

/// Name of a registered cluster. Opaque to the orchestrator.
pub type ClusterName = String;

/// Current unix time in seconds. All record timestamps use this clock.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
