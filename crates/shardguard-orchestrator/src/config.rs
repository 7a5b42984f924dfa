use std::time::Duration;

use crate::hook::SHELL_BASH;
use crate::monitor::MonitorConfig;
use crate::quorum::{Mode, Options};

/// Operator hook commands and their budgets.
#[derive(Debug, Clone)]
pub struct HooksConfig {
    pub shell: String,
    pub pre_failover: Vec<String>,
    pub post_successful_failover: Vec<String>,
    pub post_unsuccessful_failover: Vec<String>,
    pub timeout: Duration,
    pub timeout_async: Duration,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            shell: SHELL_BASH.to_string(),
            pre_failover: Vec::new(),
            post_successful_failover: Vec::new(),
            post_unsuccessful_failover: Vec::new(),
            timeout: Duration::from_secs(2),
            timeout_async: Duration::from_secs(600),
        }
    }
}

/// Resolved orchestration options of one registered cluster.
#[derive(Debug, Clone)]
pub struct OrchestrationConfig {
    pub monitor: MonitorConfig,
    pub elector_mode: Mode,
    pub elector_options: Options,
    pub set_recovery_block: Duration,
    pub instance_recovery_block: Duration,
    pub hooks: HooksConfig,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            elector_mode: Mode::Smart,
            elector_options: Options::default(),
            set_recovery_block: Duration::from_secs(1800),
            instance_recovery_block: Duration::from_secs(900),
            hooks: HooksConfig::default(),
        }
    }
}
