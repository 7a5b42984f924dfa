use std::cmp::Ordering;

use shardguard_common::alert::ALERT_UNREACHABLE_MASTER;
use shardguard_common::Instance;

/// Order in which the remaining cluster members receive a new sharding
/// configuration during a failover: nodes polled successfully last time
/// first, then nodes already complaining about an unreachable master,
/// then the smallest replication delay.
pub fn failover_order(left: &Instance, right: &Instance) -> Ordering {
    if left.last_check_valid != right.last_check_valid {
        return right.last_check_valid.cmp(&left.last_check_valid);
    }

    let left_alert = left.has_alert(ALERT_UNREACHABLE_MASTER);
    let right_alert = right.has_alert(ALERT_UNREACHABLE_MASTER);
    if left_alert != right_alert {
        return right_alert.cmp(&left_alert);
    }

    left.storage_info
        .replication
        .delay
        .partial_cmp(&right.storage_info.replication.delay)
        .unwrap_or(Ordering::Equal)
}
