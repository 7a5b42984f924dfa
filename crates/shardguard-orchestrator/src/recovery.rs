use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use shardguard_common::{now_unix, ClusterName, InstanceIdent, ReplicaSetId};

use crate::analysis::ReplicationAnalysis;

/// What a recovery lock covers: an entire replica set or one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryScope {
    Set,
    Instance,
}

impl RecoveryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryScope::Set => "set",
            RecoveryScope::Instance => "instance",
        }
    }
}

/// One failover attempt. Besides describing what happened, the record
/// acts as a TTL-bounded lock against re-entry on the same scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recovery {
    /// The failure being recovered from, the diagnostic state name.
    pub kind: String,

    pub scope: RecoveryScope,

    /// The diagnosis that triggered this recovery.
    pub analysis: ReplicationAnalysis,

    pub cluster_name: ClusterName,
    pub set_uuid: ReplicaSetId,

    /// The instance being recovered from: the dead master for a set
    /// recovery, the co-master for an instance recovery.
    pub failed: InstanceIdent,

    /// The elected successor, known once the election has run.
    pub successor: Option<InstanceIdent>,

    pub is_successful: bool,

    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub expiration: i64,
}

impl Recovery {
    pub fn new(scope: RecoveryScope, failed: InstanceIdent, analysis: &ReplicationAnalysis) -> Self {
        Self {
            kind: analysis.state.as_str().to_string(),
            scope,
            analysis: analysis.clone(),
            cluster_name: String::new(),
            set_uuid: analysis.set.uuid.clone(),
            failed,
            successor: None,
            is_successful: false,
            start_timestamp: now_unix(),
            end_timestamp: 0,
            expiration: 0,
        }
    }

    pub fn expire_after(&mut self, ttl: Duration) {
        self.expiration = now_unix() + ttl.as_secs() as i64;
    }

    /// The key the recovery lock is held under.
    pub fn scope_key(&self) -> &str {
        match self.scope {
            RecoveryScope::Set => &self.set_uuid,
            RecoveryScope::Instance => &self.failed.uuid,
        }
    }

    pub fn expired(&self) -> bool {
        self.expiration < now_unix()
    }

    pub fn finish(&mut self) {
        self.end_timestamp = now_unix();
    }
}

impl fmt::Display for Recovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_ts = |ts: i64| {
            Utc.timestamp_opt(ts, 0)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| ts.to_string())
        };

        write!(
            f,
            "scope: {}, set: {}, type: {}, failed: {}, successor: {}, success: {}, period: {} - {}, duration: {}s",
            self.scope.as_str(),
            self.set_uuid,
            self.kind,
            self.failed.uuid,
            self.successor
                .as_ref()
                .map(|s| s.uuid.as_str())
                .unwrap_or("<none>"),
            self.is_successful,
            fmt_ts(self.start_timestamp),
            fmt_ts(self.end_timestamp),
            self.end_timestamp - self.start_timestamp,
        )
    }
}

/// Append-only list of recoveries guarded by a read-write lock.
///
/// `is_blocked` answers whether a scope still holds an unexpired lock;
/// expired entries are dropped by the periodic cleanup.
#[derive(Default)]
pub struct RecoveryStore {
    recoveries: RwLock<Vec<Recovery>>,
}

impl RecoveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, recovery: Recovery) {
        self.recoveries.write().unwrap().push(recovery);
    }

    /// True iff any non-expired record holds the given scope key.
    pub fn is_blocked(&self, scope_key: &str) -> bool {
        self.recoveries
            .read()
            .unwrap()
            .iter()
            .any(|r| r.scope_key() == scope_key && !r.expired())
    }

    /// Drops expired entries, or everything when forced.
    pub fn cleanup(&self, force: bool) {
        let mut recoveries = self.recoveries.write().unwrap();
        if force {
            recoveries.clear();
        } else {
            recoveries.retain(|r| !r.expired());
        }
    }

    pub fn entries(&self) -> Vec<Recovery> {
        self.recoveries.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.recoveries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
