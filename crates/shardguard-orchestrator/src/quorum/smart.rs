use std::cmp::Ordering;

use shardguard_common::{Error, Instance, InstanceId, ReplicaSet, Result, UpstreamStatus};

use super::{filter, Options};

/// Two followers whose idle values differ by less than this are treated
/// as equally fresh, letting operator priorities break the tie.
const IDLE_DIFF_DELTA: f64 = 0.5;

/// Chooses a successor by ranking candidates on:
///  - sharding configuration consistency with the master,
///  - upstream status,
///  - LSN distance behind the master,
///  - operator promotion rules when the freshness is almost identical,
///  - upstream idle.
pub(super) fn choose_master(set: &ReplicaSet, opts: &Options) -> Result<InstanceId> {
    let mut followers = filter(set.alive_followers(), opts);
    if followers.is_empty() {
        return Err(Error::NoAliveFollowers);
    }

    let master = set.master().map_err(|_| Error::NoAliveFollowers)?;

    followers.sort_by(|a, b| compare(master, a, b));

    Ok(followers[0].uuid.clone())
}

fn compare(master: &Instance, left: &Instance, right: &Instance) -> Ordering {
    // Prefer replicas with the same sharding configuration as the master.
    let conf_hash = master.vshard_fingerprint;
    let left_consistent = left.vshard_fingerprint == conf_hash;
    let right_consistent = right.vshard_fingerprint == conf_hash;
    if left_consistent != right_consistent {
        return right_consistent.cmp(&left_consistent);
    }

    // Prefer replicas with a follow upstream status.
    let left_follows = upstream_follows(left);
    let right_follows = upstream_follows(right);
    if left_follows != right_follows {
        return right_follows.cmp(&left_follows);
    }

    // Prefer the most up to date replica. A negative distance means the
    // replica is ahead of the master: it was recovered from an old
    // snapshot and its history cannot be trusted, so a positive distance
    // always wins over a negative one.
    if left.lsn_behind_master != right.lsn_behind_master {
        if left.lsn_behind_master > 0 && right.lsn_behind_master < 0 {
            return Ordering::Less;
        }
        if left.lsn_behind_master < 0 && right.lsn_behind_master > 0 {
            return Ordering::Greater;
        }
        return left.lsn_behind_master.cmp(&right.lsn_behind_master);
    }

    // If the followers are almost equally fresh, use the operator
    // promotion rules.
    let left_idle = left.idle();
    let right_idle = right.idle();
    if left.priority != right.priority && in_delta(left_idle, right_idle, IDLE_DIFF_DELTA) {
        return right.priority.cmp(&left.priority);
    }

    left_idle.partial_cmp(&right_idle).unwrap_or(Ordering::Equal)
}

fn upstream_follows(inst: &Instance) -> bool {
    inst.upstream
        .as_ref()
        .is_some_and(|u| u.status == UpstreamStatus::Follow)
}

fn in_delta(a: f64, b: f64, delta: f64) -> bool {
    let diff = a - b;
    (-delta..=delta).contains(&diff)
}
