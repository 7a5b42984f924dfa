//! YAML configuration of the orchestrator.
//!
//! A global `orchestration` block sets the defaults; every cluster may
//! override any of its fields and additionally carries its routers,
//! connection credentials, URI rewrite rules and promotion priorities.
//! Durations are given in seconds.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use shardguard_client::ConnOptions;
use shardguard_common::{Error, Result};
use shardguard_orchestrator::quorum::{Mode, Options};
use shardguard_orchestrator::{
    ClusterConfig, HooksConfig, MonitorConfig, OrchestrationConfig, RouterConfig,
};
use shardguard_storage::StorageConfig;

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the HTTP API and the metrics endpoint bind to.
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default)]
    pub logging: LoggingOptions,

    #[serde(default)]
    pub database: DatabaseOptions,

    /// Global orchestration defaults, overridable per cluster.
    #[serde(default)]
    pub orchestration: OrchestrationOptions,

    #[serde(default)]
    pub clusters: HashMap<String, ClusterOptions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingOptions {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseOptions {
    #[serde(default = "DatabaseOptions::default_file")]
    pub file: String,
    #[serde(default = "DatabaseOptions::default_timeout")]
    pub connect_timeout: f64,
    #[serde(default = "DatabaseOptions::default_timeout")]
    pub query_timeout: f64,
}

impl DatabaseOptions {
    fn default_file() -> String {
        "shardguard.db".to_string()
    }

    fn default_timeout() -> f64 {
        1.0
    }
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            file: Self::default_file(),
            connect_timeout: Self::default_timeout(),
            query_timeout: Self::default_timeout(),
        }
    }
}

/// Orchestration options; every field is optional so the same shape
/// serves as the global block and as the per-cluster override.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrchestrationOptions {
    pub readonly: Option<bool>,
    pub cluster_discovery_time: Option<u64>,
    pub cluster_recovery_time: Option<u64>,
    pub shard_recovery_block_time: Option<u64>,
    pub instance_recovery_block_time: Option<u64>,
    pub elector: Option<String>,
    pub reasonable_follower_lsn_lag: Option<i64>,
    pub reasonable_follower_idle: Option<f64>,
    pub hooks: Option<HooksOptions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HooksOptions {
    pub shell: Option<String>,
    pub pre_failover: Option<Vec<String>>,
    pub post_successful_failover: Option<Vec<String>>,
    pub post_unsuccessful_failover: Option<Vec<String>>,
    pub timeout: Option<u64>,
    pub timeout_async: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterOptions {
    #[serde(flatten)]
    pub orchestration: OrchestrationOptions,

    #[serde(default)]
    pub override_uri_rules: HashMap<String, String>,

    #[serde(default)]
    pub priorities: HashMap<String, i32>,

    #[serde(default)]
    pub routers: Vec<RouterOptions>,

    #[serde(default)]
    pub connection: ConnectionOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterOptions {
    pub name: String,
    pub addr: String,
    pub uuid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionOptions {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "ConnectionOptions::default_timeout")]
    pub connect_timeout: f64,
    #[serde(default = "ConnectionOptions::default_timeout")]
    pub request_timeout: f64,
}

impl ConnectionOptions {
    fn default_timeout() -> f64 {
        1.0
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: String::new(),
            connect_timeout: Self::default_timeout(),
            request_timeout: Self::default_timeout(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(&path).map_err(|err| {
            Error::ConfigInvalid(format!(
                "cannot read '{}': {}",
                path.as_ref().display(),
                err
            ))
        })?;
        let config: Config = serde_yaml::from_str(&raw)
            .map_err(|err| Error::ConfigInvalid(err.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.orchestration.validate()?;
        for (name, cluster) in &self.clusters {
            cluster.orchestration.validate().map_err(|err| {
                Error::ConfigInvalid(format!("cluster '{}': {}", name, err))
            })?;
            for router in &cluster.routers {
                if router.addr.is_empty() {
                    return Err(Error::ConfigInvalid(format!(
                        "cluster '{}': router '{}' has an empty address",
                        name, router.name
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            file_name: self.database.file.clone(),
            connect_timeout: Duration::from_secs_f64(self.database.connect_timeout),
            query_timeout: Duration::from_secs_f64(self.database.query_timeout),
        }
    }

    /// Resolves the effective configuration of one cluster: the global
    /// orchestration block merged with the cluster's overrides.
    pub fn resolve(&self, cluster: &ClusterOptions) -> (ClusterConfig, OrchestrationConfig) {
        let merged = self.orchestration.merge(&cluster.orchestration);

        let cluster_cfg = ClusterConfig {
            readonly: merged.readonly.unwrap_or(false),
            connection: ConnOptions {
                user: cluster.connection.user.clone(),
                password: cluster.connection.password.clone(),
                connect_timeout: Duration::from_secs_f64(cluster.connection.connect_timeout),
                request_timeout: Duration::from_secs_f64(cluster.connection.request_timeout),
            },
            override_uri_rules: cluster.override_uri_rules.clone(),
            priorities: cluster.priorities.clone(),
            routers: cluster
                .routers
                .iter()
                .map(|r| RouterConfig {
                    name: r.name.clone(),
                    addr: r.addr.clone(),
                    uuid: r.uuid.clone(),
                })
                .collect(),
        };

        let hooks = merged.hooks.unwrap_or_default();
        let hook_defaults = HooksConfig::default();
        let orchestration = OrchestrationConfig {
            monitor: MonitorConfig {
                discovery_poll_interval: Duration::from_secs(
                    merged.cluster_discovery_time.unwrap_or(5),
                ),
                recovery_poll_interval: Duration::from_secs(
                    merged.cluster_recovery_time.unwrap_or(1),
                ),
            },
            // Validation guarantees the token parses.
            elector_mode: merged
                .elector
                .as_deref()
                .map(Mode::parse)
                .transpose()
                .unwrap_or(Some(Mode::Smart))
                .unwrap_or(Mode::Smart),
            elector_options: Options {
                reasonable_follower_lsn_lag: merged.reasonable_follower_lsn_lag.unwrap_or(0),
                reasonable_follower_idle: merged.reasonable_follower_idle.unwrap_or(0.0),
            },
            set_recovery_block: Duration::from_secs(
                merged.shard_recovery_block_time.unwrap_or(1800),
            ),
            instance_recovery_block: Duration::from_secs(
                merged.instance_recovery_block_time.unwrap_or(900),
            ),
            hooks: HooksConfig {
                shell: hooks.shell.unwrap_or(hook_defaults.shell),
                pre_failover: hooks.pre_failover.unwrap_or_default(),
                post_successful_failover: hooks.post_successful_failover.unwrap_or_default(),
                post_unsuccessful_failover: hooks.post_unsuccessful_failover.unwrap_or_default(),
                timeout: hooks
                    .timeout
                    .map(Duration::from_secs)
                    .unwrap_or(hook_defaults.timeout),
                timeout_async: hooks
                    .timeout_async
                    .map(Duration::from_secs)
                    .unwrap_or(hook_defaults.timeout_async),
            },
        };

        (cluster_cfg, orchestration)
    }
}

impl OrchestrationOptions {
    fn validate(&self) -> Result<()> {
        if let Some(elector) = &self.elector {
            Mode::parse(elector)?;
        }
        if self.cluster_discovery_time == Some(0) {
            return Err(Error::ConfigInvalid(
                "option 'cluster_discovery_time' must be positive".to_string(),
            ));
        }
        if self.cluster_recovery_time == Some(0) {
            return Err(Error::ConfigInvalid(
                "option 'cluster_recovery_time' must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Field-wise merge: the override wins wherever it is set.
    fn merge(&self, other: &OrchestrationOptions) -> OrchestrationOptions {
        OrchestrationOptions {
            readonly: other.readonly.or(self.readonly),
            cluster_discovery_time: other.cluster_discovery_time.or(self.cluster_discovery_time),
            cluster_recovery_time: other.cluster_recovery_time.or(self.cluster_recovery_time),
            shard_recovery_block_time: other
                .shard_recovery_block_time
                .or(self.shard_recovery_block_time),
            instance_recovery_block_time: other
                .instance_recovery_block_time
                .or(self.instance_recovery_block_time),
            elector: other.elector.clone().or_else(|| self.elector.clone()),
            reasonable_follower_lsn_lag: other
                .reasonable_follower_lsn_lag
                .or(self.reasonable_follower_lsn_lag),
            reasonable_follower_idle: other
                .reasonable_follower_idle
                .or(self.reasonable_follower_idle),
            hooks: other.hooks.clone().or_else(|| self.hooks.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
listen: ":1488"
logging:
  level: debug
database:
  file: /var/lib/shardguard/shardguard.db
  connect_timeout: 2
  query_timeout: 2
orchestration:
  readonly: true
  cluster_discovery_time: 5
  cluster_recovery_time: 1
  shard_recovery_block_time: 1800
  instance_recovery_block_time: 900
  elector: smart
  reasonable_follower_lsn_lag: 500
  reasonable_follower_idle: 60.0
  hooks:
    shell: sh
    timeout: 3
    timeout_async: 120
    pre_failover:
      - /usr/local/bin/notify {failureCluster}
    post_successful_failover:
      - "&/usr/local/bin/page {successorUUID}"
clusters:
  sandbox-1:
    readonly: false
    elector: idle
    connection:
      user: guard
      password: guard
      connect_timeout: 0.5
      request_timeout: 0.5
    override_uri_rules:
      "10.0.0.5:3301": "127.0.0.1:3301"
    priorities:
      inst-1: 10
      inst-2: -1
    routers:
      - name: router-1
        addr: 127.0.0.1:3300
        uuid: router-1-uuid
  sandbox-2:
    routers:
      - name: router-2
        addr: 127.0.0.1:7300
        uuid: router-2-uuid
"#;

    fn parse(raw: &str) -> Config {
        let config: Config = serde_yaml::from_str(raw).unwrap();
        config.validate().unwrap();
        config
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse(FULL_CONFIG);
        assert_eq!(config.listen, ":1488");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.database.file, "/var/lib/shardguard/shardguard.db");
        assert_eq!(config.clusters.len(), 2);

        let sandbox = &config.clusters["sandbox-1"];
        assert_eq!(sandbox.connection.user, "guard");
        assert_eq!(sandbox.priorities["inst-2"], -1);
        assert_eq!(
            sandbox.override_uri_rules["10.0.0.5:3301"],
            "127.0.0.1:3301"
        );
        assert_eq!(sandbox.routers[0].addr, "127.0.0.1:3300");
    }

    #[test]
    fn test_cluster_overrides_win() {
        let config = parse(FULL_CONFIG);

        let (cluster_cfg, orchestration) = config.resolve(&config.clusters["sandbox-1"]);
        assert!(!cluster_cfg.readonly);
        assert_eq!(orchestration.elector_mode, Mode::Idle);
        assert_eq!(
            orchestration.elector_options.reasonable_follower_lsn_lag,
            500
        );
        assert_eq!(orchestration.hooks.shell, "sh");
        assert_eq!(orchestration.hooks.timeout, Duration::from_secs(3));
        assert_eq!(orchestration.set_recovery_block, Duration::from_secs(1800));
        assert_eq!(
            cluster_cfg.connection.request_timeout,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_globals_apply_without_overrides() {
        let config = parse(FULL_CONFIG);

        let (cluster_cfg, orchestration) = config.resolve(&config.clusters["sandbox-2"]);
        assert!(cluster_cfg.readonly);
        assert_eq!(orchestration.elector_mode, Mode::Smart);
        assert_eq!(
            orchestration.monitor.discovery_poll_interval,
            Duration::from_secs(5)
        );
        assert_eq!(orchestration.hooks.pre_failover.len(), 1);
    }

    #[test]
    fn test_defaults_on_empty_config() {
        let config = parse("{}");
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.database.file, "shardguard.db");

        let (cluster_cfg, orchestration) = config.resolve(&ClusterOptions::default());
        assert!(!cluster_cfg.readonly);
        assert_eq!(orchestration.elector_mode, Mode::Smart);
        assert_eq!(
            orchestration.monitor.recovery_poll_interval,
            Duration::from_secs(1)
        );
        assert_eq!(orchestration.elector_options.reasonable_follower_idle, 0.0);
    }

    #[test]
    fn test_retired_elector_token_is_rejected() {
        let config: Config = serde_yaml::from_str("orchestration:\n  elector: delay\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("elector"));
    }

    #[test]
    fn test_unknown_elector_in_cluster_is_rejected() {
        let raw = "clusters:\n  sandbox:\n    elector: fastest\n";
        let config: Config = serde_yaml::from_str(raw).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sandbox"));
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let config: Config =
            serde_yaml::from_str("orchestration:\n  cluster_discovery_time: 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Config::load("no/such/config.yaml").is_err());
    }
}
