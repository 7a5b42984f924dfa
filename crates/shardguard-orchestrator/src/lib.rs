//! Shardguard Orchestrator
//!
//! The failover engine: per-cluster topology discovery, replication
//! analysis and automated master promotion for sharded in-memory database
//! clusters.
//!
//! # Architecture
//!
//! Each registered cluster gets one pipeline of three components wired by
//! the [`Coordinator`]:
//!
//! 1. **Discovery** ([`Cluster`]): periodically rebuilds a consistent
//!    topology snapshot from a randomly chosen router and parallel
//!    per-instance probes, surviving partial failures by falling back to
//!    the previous snapshot per replica set.
//! 2. **Analysis** ([`Monitor`]): classifies every replica set of a fresh
//!    snapshot into one of ten diagnostic states and streams the
//!    diagnoses downstream.
//! 3. **Failover** ([`Failover`]): consumes diagnoses one at a time,
//!    debounces via scoped TTL recovery locks, elects a successor through
//!    a pluggable [`quorum::Elector`], rewrites the sharding
//!    configuration successor-first and runs operator hooks around the
//!    change.
//!
//! The orchestrator never claims more than at-most-one concurrent
//! promotion per scope within a configurable quiet period: it is not a
//! consensus engine and does not fence split brains beyond writing the
//! new configuration to every reachable node.

pub mod analysis;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod failover;
pub mod hook;
pub mod instance_sort;
pub mod monitor;
pub mod quorum;
pub mod recovery;
pub mod sampler;

pub use analysis::{analyze, ReplicaSetState, ReplicationAnalysis};
pub use cluster::{Cluster, ClusterConfig, RouterConfig};
pub use config::{HooksConfig, OrchestrationConfig};
pub use coordinator::Coordinator;
pub use failover::{Failover, FailoverConfig};
pub use hook::{HookType, Hooker};
pub use monitor::{Monitor, MonitorConfig};
pub use quorum::{Elector, Mode, Options};
pub use recovery::{Recovery, RecoveryScope, RecoveryStore};
