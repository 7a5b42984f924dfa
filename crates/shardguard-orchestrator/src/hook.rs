use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::process::Command;

use shardguard_common::{Error, Result};

use crate::recovery::Recovery;

/// When a hook command fires relative to the failover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookType {
    PreFailover,
    PostSuccessfulFailover,
    PostUnsuccessfulFailover,
}

impl HookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookType::PreFailover => "PreFailover",
            HookType::PostSuccessfulFailover => "PostSuccessfulFailover",
            HookType::PostUnsuccessfulFailover => "PostUnsuccessfulFailover",
        }
    }
}

pub const SHELL_BASH: &str = "bash";

/// Executes operator-defined shell commands around a recovery.
///
/// Commands prefixed with `&` are scheduled asynchronously under the long
/// timeout and never affect the caller; everything else runs synchronously
/// under the short timeout.
pub struct Hooker {
    shell: String,
    hooks: HashMap<HookType, Vec<String>>,
    timeout: Duration,
    timeout_async: Duration,
}

impl Hooker {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            hooks: HashMap::new(),
            timeout: Duration::from_secs(2),
            timeout_async: Duration::from_secs(600),
        }
    }

    pub fn bash() -> Self {
        Self::new(SHELL_BASH)
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn set_timeout_async(&mut self, timeout: Duration) {
        self.timeout_async = timeout;
    }

    pub fn add_hooks(&mut self, kind: HookType, commands: impl IntoIterator<Item = String>) {
        self.hooks.entry(kind).or_default().extend(commands);
    }

    /// Runs the hook list of the given type.
    ///
    /// With `fail_on_error` a failing synchronous hook stops the list and
    /// propagates; otherwise failures are logged and the first one is
    /// returned after the whole list ran.
    pub async fn execute(
        &self,
        kind: HookType,
        recovery: &Recovery,
        fail_on_error: bool,
    ) -> Result<()> {
        let commands = self.hooks.get(&kind).map(Vec::as_slice).unwrap_or(&[]);
        if commands.is_empty() {
            tracing::info!(hook = kind.as_str(), "no hooks to run");
            return Ok(());
        }

        tracing::info!(hook = kind.as_str(), count = commands.len(), "running hooks");

        let mut first_err = None;
        for (i, raw) in commands.iter().enumerate() {
            let (command, asynchronous) = prepare_command(raw, recovery);
            let env = environment(recovery);

            let description = if asynchronous {
                format!("{} hook {} of {} (async)", kind.as_str(), i + 1, commands.len())
            } else {
                format!("{} hook {} of {}", kind.as_str(), i + 1, commands.len())
            };

            if asynchronous {
                let shell = self.shell.clone();
                let timeout = self.timeout_async;
                tokio::spawn(async move {
                    // Errors of async hooks never reach the caller.
                    let _ = run_process(&shell, &command, env, timeout, &description).await;
                });
                continue;
            }

            if let Err(err) =
                run_process(&self.shell, &command, env, self.timeout, &description).await
            {
                if fail_on_error {
                    tracing::warn!(hook = kind.as_str(), "not running further hooks");
                    return Err(err);
                }
                first_err.get_or_insert(err);
            }
        }

        tracing::info!(hook = kind.as_str(), "done running hooks");

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn run_process(
    shell: &str,
    command: &str,
    env: Vec<(String, String)>,
    timeout: Duration,
    description: &str,
) -> Result<()> {
    tracing::info!(%command, "running {}", description);
    let start = Instant::now();

    let status = Command::new(shell)
        .arg("-c")
        .arg(command)
        .envs(env)
        .kill_on_drop(true)
        .status();

    let result = match tokio::time::timeout(timeout, status).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(_) | Err(_) => Err(Error::HookFailed(description.to_string())),
    };

    match &result {
        Ok(()) => {
            tracing::info!(elapsed = ?start.elapsed(), "completed {}", description);
        }
        Err(err) => {
            tracing::error!(
                elapsed = ?start.elapsed(),
                %err,
                "execution of {} failed", description
            );
        }
    }

    result
}

/// Replaces the agreed-upon placeholders with recovery data. A leading
/// `&` marks the command asynchronous and is stripped.
fn prepare_command(command: &str, recovery: &Recovery) -> (String, bool) {
    let mut command = command.trim();
    let mut asynchronous = false;
    if let Some(stripped) = command.strip_prefix('&') {
        command = stripped;
        asynchronous = true;
    }

    let analysis = &recovery.analysis;
    let mut command = command
        .replace("{failureType}", &recovery.kind)
        .replace("{failedUUID}", &recovery.failed.uuid)
        .replace("{failedURI}", &recovery.failed.uri)
        .replace("{failureCluster}", &recovery.cluster_name)
        .replace("{failureReplicaSetUUID}", &recovery.set_uuid)
        .replace("{countFollowers}", &analysis.count_replicas.to_string())
        .replace(
            "{countWorkingFollowers}",
            &analysis.count_working_replicas.to_string(),
        )
        .replace(
            "{countReplicatingFollowers}",
            &analysis.count_replicating_replicas.to_string(),
        )
        .replace(
            "{countInconsistentVShardConf}",
            &analysis.count_inconsistent_vshard_conf.to_string(),
        )
        .replace("{isSuccessful}", &recovery.is_successful.to_string());

    if recovery.is_successful {
        if let Some(successor) = &recovery.successor {
            command = command
                .replace("{successorUUID}", &successor.uuid)
                .replace("{successorURI}", &successor.uri);
        }
    }

    (command, asynchronous)
}

/// The same recovery data as environment variables.
fn environment(recovery: &Recovery) -> Vec<(String, String)> {
    let analysis = &recovery.analysis;
    let mut env = vec![
        ("QUM_FAILURE_TYPE".to_string(), recovery.kind.clone()),
        ("QUM_FAILED_UUID".to_string(), recovery.failed.uuid.clone()),
        ("QUM_FAILED_URI".to_string(), recovery.failed.uri.clone()),
        (
            "QUM_FAILURE_CLUSTER".to_string(),
            recovery.cluster_name.clone(),
        ),
        (
            "QUM_FAILURE_REPLICA_SET_UUID".to_string(),
            recovery.set_uuid.clone(),
        ),
        (
            "QUM_COUNT_FOLLOWERS".to_string(),
            analysis.count_replicas.to_string(),
        ),
        (
            "QUM_COUNT_WORKING_FOLLOWERS".to_string(),
            analysis.count_working_replicas.to_string(),
        ),
        (
            "QUM_COUNT_REPLICATING_FOLLOWERS".to_string(),
            analysis.count_replicating_replicas.to_string(),
        ),
        (
            "QUM_COUNT_INCONSISTENT_VSHARD_CONF".to_string(),
            analysis.count_inconsistent_vshard_conf.to_string(),
        ),
        (
            "QUM_IS_SUCCESSFUL".to_string(),
            recovery.is_successful.to_string(),
        ),
    ];

    if recovery.is_successful {
        if let Some(successor) = &recovery.successor {
            env.push(("QUM_SUCCESSOR_UUID".to_string(), successor.uuid.clone()));
            env.push(("QUM_SUCCESSOR_URI".to_string(), successor.uri.clone()));
        }
    }

    env
}
