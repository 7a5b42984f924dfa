//! Shardguard Persistence
//!
//! Durable store for topology snapshots and recovery records. Snapshots
//! are upsert-keyed on the cluster name (only the latest one is kept);
//! recoveries are append-only history. Payloads travel as JSON values so
//! the store stays independent of the orchestrator types.

pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;

use shardguard_common::Result;

pub use sqlite::{SqliteStorage, StorageConfig};

/// One row to persist: the owning cluster, the event time and the
/// serialized payload.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub cluster_name: String,
    pub created_at: i64,
    pub data: Value,
}

/// Persistence contract consumed by the coordinator and the HTTP API.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stores the latest snapshot of a cluster, replacing any previous one.
    async fn save_snapshot(&self, req: SaveRequest) -> Result<()>;

    /// Appends one recovery record.
    async fn save_recovery(&self, req: SaveRequest) -> Result<()>;

    /// Names of every cluster with a stored snapshot.
    async fn get_clusters(&self) -> Result<Vec<String>>;

    /// Latest stored snapshot of a cluster.
    async fn get_cluster_snapshot(&self, cluster_name: &str) -> Result<Value>;

    /// Every stored recovery of a cluster, oldest first.
    async fn get_recoveries(&self, cluster_name: &str) -> Result<Vec<Value>>;
}
