//! Shardguard Metrics
//!
//! Process-wide Prometheus collectors for the orchestrator: discovery
//! latencies per cluster and per instance, shard health gauges, discovery
//! error counters and recovery event counters. Everything registers with
//! the default registry so the HTTP layer can expose it with a plain
//! text-encoder pass.

use once_cell::sync::Lazy;
use prometheus::{
    exponential_buckets, register_counter_vec, register_gauge_vec, register_histogram_vec,
    CounterVec, GaugeVec, HistogramTimer, HistogramVec, TextEncoder,
};

static DISCOVERY_CLUSTER_DURATIONS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "shardguard_discovery_cluster_durations",
        "Cluster discovery latencies in seconds",
        &["cluster_name"],
        exponential_buckets(0.001, 2.5, 10).unwrap()
    )
    .unwrap()
});

static DISCOVERY_INSTANCE_DURATIONS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "shardguard_discovery_instance_durations",
        "Instance discovery latencies in seconds",
        &["cluster_name", "hostname"],
        exponential_buckets(0.001, 2.5, 10).unwrap()
    )
    .unwrap()
});

static SHARD_CRITICAL_LEVEL: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "shardguard_shard_critical_level",
        "Critical level of the replica set",
        &["cluster_name", "uuid", "master_uri"]
    )
    .unwrap()
});

static SHARD_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "shardguard_shard_state",
        "The state of each shard in the cluster; one line per possible state of each shard. \
         A value of 1 means the shard is in the state specified by the state label.",
        &["cluster_name", "uuid", "master_uri", "state"]
    )
    .unwrap()
});

static DISCOVERY_ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "shardguard_discovery_errors",
        "Errors that happen during the discovery process",
        &["cluster_name", "uri"]
    )
    .unwrap()
});

static RECOVERY_EVENTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "shardguard_recovery_events",
        "Recoveries applied by the failover controller",
        &["cluster_name", "scope", "outcome"]
    )
    .unwrap()
});

/// A started latency measurement. Observes on drop or on an explicit
/// [`Transaction::end`].
pub struct Transaction {
    timer: Option<HistogramTimer>,
}

impl Transaction {
    pub fn end(mut self) {
        if let Some(timer) = self.timer.take() {
            timer.observe_duration();
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.observe_duration();
        }
    }
}

pub fn start_cluster_discovery(cluster_name: &str) -> Transaction {
    Transaction {
        timer: Some(
            DISCOVERY_CLUSTER_DURATIONS
                .with_label_values(&[cluster_name])
                .start_timer(),
        ),
    }
}

pub fn start_instance_discovery(cluster_name: &str, hostname: &str) -> Transaction {
    Transaction {
        timer: Some(
            DISCOVERY_INSTANCE_DURATIONS
                .with_label_values(&[cluster_name, hostname])
                .start_timer(),
        ),
    }
}

pub fn set_shard_critical_level(cluster_name: &str, uuid: &str, master_uri: &str, level: i64) {
    SHARD_CRITICAL_LEVEL
        .with_label_values(&[cluster_name, uuid, master_uri])
        .set(level as f64);
}

pub fn set_shard_state(cluster_name: &str, uuid: &str, master_uri: &str, state: &str, active: bool) {
    SHARD_STATE
        .with_label_values(&[cluster_name, uuid, master_uri, state])
        .set(if active { 1.0 } else { 0.0 });
}

pub fn record_discovery_error(cluster_name: &str, uri: &str) {
    DISCOVERY_ERRORS.with_label_values(&[cluster_name, uri]).inc();
}

pub fn record_recovery_event(cluster_name: &str, scope: &str, successful: bool) {
    let outcome = if successful { "successful" } else { "unsuccessful" };
    RECOVERY_EVENTS
        .with_label_values(&[cluster_name, scope, outcome])
        .inc();
}

/// Text exposition of the default registry.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&prometheus::gather())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transactions_observe_on_end() {
        start_cluster_discovery("test-cluster").end();
        start_instance_discovery("test-cluster", "127.0.0.1:3301").end();

        let exposition = gather();
        assert!(exposition.contains("shardguard_discovery_cluster_durations"));
        assert!(exposition.contains("shardguard_discovery_instance_durations"));
    }

    #[test]
    fn test_shard_gauges() {
        set_shard_critical_level("test-cluster", "set-1", "m:3301", 2);
        set_shard_state("test-cluster", "set-1", "m:3301", "DeadMaster", true);
        set_shard_state("test-cluster", "set-1", "m:3301", "NoProblem", false);

        let exposition = gather();
        assert!(exposition.contains("shardguard_shard_critical_level"));
        assert!(exposition.contains("state=\"DeadMaster\""));
    }

    #[test]
    fn test_counters() {
        record_discovery_error("test-cluster", "r:3300");
        record_recovery_event("test-cluster", "set", true);
        record_recovery_event("test-cluster", "instance", false);

        let exposition = gather();
        assert!(exposition.contains("shardguard_discovery_errors"));
        assert!(exposition.contains("outcome=\"successful\""));
        assert!(exposition.contains("outcome=\"unsuccessful\""));
    }
}
