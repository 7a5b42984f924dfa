//! Decoders for the dynamically typed replies of the backend database.
//!
//! The backend returns heterogeneous maps whose numeric fields may arrive
//! in any integer or float width. Each decoder is total: it validates field
//! presence and numeric domain and reports any mismatch as
//! [`Error::Parse`] naming the offending field.

use serde_json::{Map, Value};

use crate::alert::Alert;
use crate::error::{Error, Result};
use crate::instance::{
    Downstream, DownstreamStatus, HealthCode, Instance, InstanceBucket, InstanceInfo, Replication,
    ReplicationStatus, StorageInfo, Upstream, UpstreamStatus,
};
use crate::router::{LeaderDescriptor, LeaderStatus, RouterBucket, RouterInfo, RouterReplicaSets};

type Container<'a> = &'a Map<String, Value>;

fn as_container<'a>(v: &'a Value, field: &str) -> Result<Container<'a>> {
    v.as_object().ok_or_else(|| Error::Parse(field.to_string()))
}

fn get_container<'a>(c: Container<'a>, key: &str) -> Result<Container<'a>> {
    c.get(key)
        .and_then(Value::as_object)
        .ok_or_else(|| Error::Parse(key.to_string()))
}

fn get_array<'a>(c: Container<'a>, key: &str) -> Result<&'a Vec<Value>> {
    c.get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Parse(key.to_string()))
}

fn get_str<'a>(c: Container<'a>, key: &str) -> Result<&'a str> {
    c.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Parse(key.to_string()))
}

fn get_bool(c: Container<'_>, key: &str) -> Result<bool> {
    c.get(key)
        .and_then(Value::as_bool)
        .ok_or_else(|| Error::Parse(key.to_string()))
}

/// Signed integers may arrive in any width; unsigned values are accepted
/// as long as they fit.
fn get_i64(c: Container<'_>, key: &str) -> Result<i64> {
    match c.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| Error::Parse(key.to_string())),
        _ => Err(Error::Parse(key.to_string())),
    }
}

fn get_u64(c: Container<'_>, key: &str) -> Result<u64> {
    match c.get(key) {
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| Error::Parse(key.to_string())),
        _ => Err(Error::Parse(key.to_string())),
    }
}

/// Floats promote from any numeric width.
fn get_f64(c: Container<'_>, key: &str) -> Result<f64> {
    match c.get(key) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| Error::Parse(key.to_string())),
        _ => Err(Error::Parse(key.to_string())),
    }
}

/// Decodes a router info reply: status, bucket counters, alerts and the
/// per-set leader descriptors.
pub fn parse_router_info(data: &Value) -> Result<RouterInfo> {
    let dt = as_container(data, "router_info")?;

    let status = get_i64(dt, "status")?;
    let alerts = parse_alerts(dt)?;
    let bucket = parse_router_bucket(dt)?;
    let replica_sets = parse_router_replica_sets(dt)?;

    Ok(RouterInfo {
        last_seen: 0,
        replica_sets,
        bucket,
        status,
        alerts,
    })
}

fn parse_router_replica_sets(dt: Container<'_>) -> Result<RouterReplicaSets> {
    let mp = get_container(dt, "replicasets")?;

    let mut result = RouterReplicaSets::new();
    for (uuid, v) in mp {
        let vc = as_container(v, "replicasets")?;
        result.insert(uuid.clone(), parse_leader_descriptor(vc)?);
    }

    Ok(result)
}

fn parse_leader_descriptor(dt: Container<'_>) -> Result<LeaderDescriptor> {
    let mp = get_container(dt, "master")?;

    Ok(LeaderDescriptor {
        uuid: get_str(mp, "uuid")?.to_string(),
        status: LeaderStatus::parse(get_str(mp, "status")?)?,
        uri: get_str(mp, "uri")?.to_string(),
        network_timeout: get_f64(mp, "network_timeout")?,
    })
}

fn parse_router_bucket(dt: Container<'_>) -> Result<RouterBucket> {
    let mp = get_container(dt, "bucket")?;

    Ok(RouterBucket {
        available_ro: get_i64(mp, "available_ro")?,
        available_rw: get_i64(mp, "available_rw")?,
        unknown: get_i64(mp, "unknown")?,
        unreachable: get_i64(mp, "unreachable")?,
    })
}

/// Decodes a replication probe reply: one record per instance of the
/// replica set local to the polled node.
pub fn parse_replication(data: &Value) -> Result<Vec<Instance>> {
    let records = data
        .as_array()
        .ok_or_else(|| Error::Parse("replication".to_string()))?;
    if records.is_empty() {
        return Err(Error::Parse("replication".to_string()));
    }

    let mut instances = Vec::with_capacity(records.len());
    for record in records {
        let mp = as_container(record, "replication")?;

        let upstream = parse_upstream(mp)?;
        let downstream = parse_downstream(mp)?;

        // The master has no upstream; its URI is patched later from the
        // router's leader descriptor.
        let uri = upstream
            .as_ref()
            .map(|u| u.peer.clone())
            .unwrap_or_default();

        let lsn_behind_master = if mp.contains_key("lsn_behind_master") {
            get_i64(mp, "lsn_behind_master")?
        } else {
            0
        };

        instances.push(Instance {
            id: get_u64(mp, "id")?,
            uuid: get_str(mp, "uuid")?.to_string(),
            uri,
            readonly: false,
            last_check_valid: false,
            lsn: get_i64(mp, "lsn")?,
            lsn_behind_master,
            upstream,
            downstream,
            storage_info: StorageInfo::default(),
            vshard_fingerprint: 0,
            priority: 0,
        });
    }

    Ok(instances)
}

fn parse_upstream(dt: Container<'_>) -> Result<Option<Upstream>> {
    if !dt.contains_key("upstream") {
        return Ok(None);
    }
    let u = get_container(dt, "upstream")?;

    let message = if u.contains_key("message") {
        get_str(u, "message")?.to_string()
    } else {
        String::new()
    };

    Ok(Some(Upstream {
        peer: get_str(u, "peer")?.to_string(),
        status: UpstreamStatus::parse(get_str(u, "status")?)?,
        idle: get_f64(u, "idle")?,
        lag: get_f64(u, "lag")?,
        message,
    }))
}

fn parse_downstream(dt: Container<'_>) -> Result<Option<Downstream>> {
    if !dt.contains_key("downstream") {
        return Ok(None);
    }
    let d = get_container(dt, "downstream")?;

    Ok(Some(Downstream {
        status: DownstreamStatus::parse(get_str(d, "status")?)?,
    }))
}

/// Decodes an instance probe reply: read-only flag, sharding configuration
/// fingerprint and the storage info block.
pub fn parse_instance_info(data: &Value) -> Result<InstanceInfo> {
    let dt = as_container(data, "instance_info")?;

    Ok(InstanceInfo {
        readonly: get_bool(dt, "read_only")?,
        vshard_fingerprint: get_u64(dt, "vshard_fingerprint")?,
        storage_info: parse_storage_info(dt)?,
    })
}

fn parse_storage_info(dt: Container<'_>) -> Result<StorageInfo> {
    // Routers answer the same probe without a storage section.
    if !dt.contains_key("storage") {
        return Ok(StorageInfo::default());
    }
    let s = get_container(dt, "storage")?;

    let status = HealthCode::from_wire(get_i64(s, "status")?)?;
    let alerts = parse_alerts(s)?;
    let bucket = parse_instance_bucket(s)?;

    let replication = get_container(s, "replication")?;
    // The backend reports idle when replication is broken, the lag
    // otherwise; idle wins when both are present.
    let mut delay = 0.0;
    if replication.contains_key("lag") {
        delay = get_f64(replication, "lag")?;
    }
    if replication.contains_key("idle") {
        delay = get_f64(replication, "idle")?;
    }
    let repl_status = ReplicationStatus::parse(get_str(replication, "status")?)?;

    Ok(StorageInfo {
        status,
        replication: Replication {
            status: repl_status,
            delay,
        },
        bucket,
        alerts,
    })
}

fn parse_instance_bucket(dt: Container<'_>) -> Result<InstanceBucket> {
    let mp = get_container(dt, "bucket")?;

    Ok(InstanceBucket {
        active: get_i64(mp, "active")?,
        garbage: get_i64(mp, "garbage")?,
        pinned: get_i64(mp, "pinned")?,
        receiving: get_i64(mp, "receiving")?,
        sending: get_i64(mp, "sending")?,
        total: get_i64(mp, "total")?,
    })
}

fn parse_alerts(dt: Container<'_>) -> Result<Vec<Alert>> {
    let mp = get_array(dt, "alerts")?;

    let mut alerts = Vec::with_capacity(mp.len());
    for entry in mp {
        let arr = entry
            .as_array()
            .ok_or_else(|| Error::Parse("alerts".to_string()))?;
        if arr.len() < 2 {
            continue;
        }

        let kind = arr[0]
            .as_str()
            .ok_or_else(|| Error::Parse("alerts".to_string()))?;
        let description = arr[1]
            .as_str()
            .ok_or_else(|| Error::Parse("alerts".to_string()))?;

        alerts.push(Alert {
            kind: kind.to_string(),
            description: description.to_string(),
        });
    }

    Ok(alerts)
}
