use std::fmt;

use serde::{Deserialize, Serialize};

use crate::alert::Alert;
use crate::error::{Error, Result};

/// Globally unique identifier of an instance. Opaque string.
pub type InstanceId = String;

/// Replication status of an instance as seen by its own storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationStatus {
    Follow,
    Master,
    Disconnected,
}

impl ReplicationStatus {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "follow" => Ok(ReplicationStatus::Follow),
            "master" => Ok(ReplicationStatus::Master),
            "disconnected" => Ok(ReplicationStatus::Disconnected),
            _ => Err(Error::Parse("replication.status".into())),
        }
    }
}

/// Status of the replication link an instance uploads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamStatus {
    /// The instance is getting authenticated to connect to a replication source.
    Auth,
    /// The instance is trying to connect to its replication sources.
    Connecting,
    /// Not connected to the replica set due to network problems.
    Disconnected,
    /// Replication is in progress.
    Follow,
    /// The instance is a writable master and replication is in progress.
    Running,
    /// Replication was stopped due to a replication error.
    Stopped,
    /// The instance has not yet joined the required number of masters.
    Orphan,
    /// The master and replica are synchronizing to have the same data.
    Sync,
}

impl UpstreamStatus {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "auth" => Ok(UpstreamStatus::Auth),
            "connecting" => Ok(UpstreamStatus::Connecting),
            "disconnected" => Ok(UpstreamStatus::Disconnected),
            "follow" => Ok(UpstreamStatus::Follow),
            "running" => Ok(UpstreamStatus::Running),
            "stopped" => Ok(UpstreamStatus::Stopped),
            "orphan" => Ok(UpstreamStatus::Orphan),
            "sync" => Ok(UpstreamStatus::Sync),
            _ => Err(Error::Parse("upstream.status".into())),
        }
    }
}

/// Status of the replication link an instance serves downloads on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownstreamStatus {
    Follow,
    Stopped,
}

impl DownstreamStatus {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "follow" => Ok(DownstreamStatus::Follow),
            "stopped" => Ok(DownstreamStatus::Stopped),
            _ => Err(Error::Parse("downstream.status".into())),
        }
    }
}

/// Health code of a replica set, from green (working) to red (disabled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthCode {
    /// The replica set works in a regular way.
    Green = 0,
    /// There are issues which do not affect the replica set efficiency.
    Yellow = 1,
    /// The replica set is in a degraded state.
    Orange = 2,
    /// The replica set is disabled.
    Red = 3,
    /// The health of the replica set could not be determined.
    Unknown = 4,
}

impl HealthCode {
    pub fn from_wire(code: i64) -> Result<Self> {
        match code {
            0 => Ok(HealthCode::Green),
            1 => Ok(HealthCode::Yellow),
            2 => Ok(HealthCode::Orange),
            3 => Ok(HealthCode::Red),
            _ => Err(Error::Parse("storage.status".into())),
        }
    }

    pub fn level(self) -> HealthLevel {
        match self {
            HealthCode::Green => HealthLevel::Green,
            HealthCode::Yellow => HealthLevel::Yellow,
            HealthCode::Orange => HealthLevel::Orange,
            HealthCode::Red => HealthLevel::Red,
            HealthCode::Unknown => HealthLevel::Unknown,
        }
    }
}

/// Human readable counterpart of [`HealthCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Green,
    Yellow,
    Orange,
    Red,
    Unknown,
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthLevel::Green => "green",
            HealthLevel::Yellow => "yellow",
            HealthLevel::Orange => "orange",
            HealthLevel::Red => "red",
            HealthLevel::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A node of a replica set together with its last polled state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Short numeric identifier of the instance within the replica set.
    pub id: u64,

    /// Globally unique identifier of the instance.
    pub uuid: InstanceId,

    /// Host address and port number of the instance, user info stripped.
    pub uri: String,

    /// Whether the instance is readonly or readwrite.
    #[serde(default)]
    pub readonly: bool,

    /// Whether the last poll of the instance succeeded.
    #[serde(default)]
    pub last_check_valid: bool,

    /// Log sequence number of the latest entry in the instance's WAL.
    pub lsn: i64,

    /// How far the instance is behind the master. Negative means the
    /// instance is ahead of the master, evidence of broken replication in
    /// the past.
    pub lsn_behind_master: i64,

    /// Statistics of the replication link the instance uploads from.
    pub upstream: Option<Upstream>,

    /// Statistics of the replication link the instance serves downloads on.
    pub downstream: Option<Downstream>,

    /// Storage-level health of the instance.
    #[serde(default)]
    pub storage_info: StorageInfo,

    /// Checksum of the normalized sharding configuration observed locally
    /// by the instance. Used to detect configuration drift within a set.
    #[serde(default)]
    pub vshard_fingerprint: u64,

    /// Operator-assigned election priority. An instance with a negative
    /// priority never participates in the master election.
    #[serde(default)]
    pub priority: i32,
}

impl Instance {
    pub fn ident(&self) -> InstanceIdent {
        InstanceIdent {
            uuid: self.uuid.clone(),
            uri: self.uri.clone(),
        }
    }

    /// Seconds since the instance received the last event from its master.
    /// An instance without upstream statistics is treated as infinitely
    /// stale.
    pub fn idle(&self) -> f64 {
        self.upstream.as_ref().map_or(f64::INFINITY, |u| u.idle)
    }

    pub fn has_alert(&self, kind: &str) -> bool {
        self.storage_info.alerts.iter().any(|a| a.kind == kind)
    }

    pub fn critical_code(&self) -> HealthCode {
        self.storage_info.status
    }

    pub fn critical_level(&self) -> HealthLevel {
        self.critical_code().level()
    }
}

/// Unique UUID and URI pair of an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceIdent {
    pub uuid: InstanceId,
    pub uri: String,
}

impl fmt::Display for InstanceIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.uuid, self.uri)
    }
}

/// Statistics for the replication data uploaded by the instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    /// Address of the replication source used by the instance.
    pub peer: String,

    /// Replication status of the link.
    pub status: UpstreamStatus,

    /// Seconds since the instance received the last event from a master.
    /// Primary indicator of replication health.
    pub idle: f64,

    /// Time difference between the local clock when an event was received
    /// and the master clock when the event was written to its WAL.
    pub lag: f64,

    /// Error message in case of a degraded state, empty otherwise.
    #[serde(default)]
    pub message: String,
}

/// Statistics for the replication data downloaded from the instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Downstream {
    pub status: DownstreamStatus,
}

/// Probe result of a single instance in custom format.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceInfo {
    pub readonly: bool,
    pub vshard_fingerprint: u64,
    pub storage_info: StorageInfo,
}

/// Storage-level state of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageInfo {
    /// Current health of the replica set as seen by this instance.
    pub status: HealthCode,
    pub replication: Replication,
    pub bucket: InstanceBucket,
    pub alerts: Vec<Alert>,
}

impl Default for StorageInfo {
    fn default() -> Self {
        Self {
            status: HealthCode::Unknown,
            replication: Replication::default(),
            bucket: InstanceBucket::default(),
            alerts: Vec::new(),
        }
    }
}

/// Replication summary of the storage layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replication {
    pub status: ReplicationStatus,

    /// Either the lag or the idle value: the backend reports idle when
    /// replication is broken and the lag otherwise.
    pub delay: f64,
}

impl Default for Replication {
    fn default() -> Self {
        Self {
            status: ReplicationStatus::Disconnected,
            delay: 0.0,
        }
    }
}

/// Bucket counters of a storage instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceBucket {
    pub active: i64,
    pub garbage: i64,
    pub pinned: i64,
    pub receiving: i64,
    pub sending: i64,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance_with_upstream(idle: f64) -> Instance {
        Instance {
            id: 1,
            uuid: "inst-1".into(),
            uri: "127.0.0.1:3301".into(),
            readonly: true,
            last_check_valid: true,
            lsn: 100,
            lsn_behind_master: 0,
            upstream: Some(Upstream {
                peer: "127.0.0.1:3302".into(),
                status: UpstreamStatus::Follow,
                idle,
                lag: 0.01,
                message: String::new(),
            }),
            downstream: None,
            storage_info: StorageInfo::default(),
            vshard_fingerprint: 0,
            priority: 0,
        }
    }

    #[test]
    fn test_ident_display() {
        let inst = instance_with_upstream(0.1);
        assert_eq!(inst.ident().to_string(), "inst-1/127.0.0.1:3301");
    }

    #[test]
    fn test_idle_without_upstream() {
        let mut inst = instance_with_upstream(0.1);
        inst.upstream = None;
        assert!(inst.idle().is_infinite());
    }

    #[test]
    fn test_idle_with_upstream() {
        let inst = instance_with_upstream(1.5);
        assert_eq!(inst.idle(), 1.5);
    }

    #[test]
    fn test_health_code_from_wire() {
        assert_eq!(HealthCode::from_wire(0).unwrap(), HealthCode::Green);
        assert_eq!(HealthCode::from_wire(3).unwrap(), HealthCode::Red);
        assert!(HealthCode::from_wire(4).is_err());
        assert!(HealthCode::from_wire(-1).is_err());
    }

    #[test]
    fn test_health_code_ordering() {
        assert!(HealthCode::Green < HealthCode::Yellow);
        assert!(HealthCode::Red < HealthCode::Unknown);
    }

    #[test]
    fn test_upstream_status_parse() {
        assert_eq!(
            UpstreamStatus::parse("follow").unwrap(),
            UpstreamStatus::Follow
        );
        assert_eq!(
            UpstreamStatus::parse("orphan").unwrap(),
            UpstreamStatus::Orphan
        );
        assert!(UpstreamStatus::parse("resync").is_err());
    }

    #[test]
    fn test_has_alert() {
        let mut inst = instance_with_upstream(0.1);
        assert!(!inst.has_alert(crate::alert::ALERT_UNREACHABLE_MASTER));

        inst.storage_info.alerts.push(Alert {
            kind: crate::alert::ALERT_UNREACHABLE_MASTER.to_string(),
            description: "timed out".into(),
        });
        assert!(inst.has_alert(crate::alert::ALERT_UNREACHABLE_MASTER));
    }

    #[test]
    fn test_instance_serde_round_trip() {
        let inst = instance_with_upstream(0.25);
        let encoded = serde_json::to_string(&inst).unwrap();
        let decoded: Instance = serde_json::from_str(&encoded).unwrap();
        assert_eq!(inst, decoded);
    }
}
