//! Tool execution.
//!
//! The [`Sandbox`] runs a tool's invocation command as a child process:
//!
//! 1. every required environment variable must be set, or nothing happens;
//! 2. declared dependencies are installed;
//! 3. the source is written to `{work_dir}/{id}.{ext}`;
//! 4. the command runs under the configured shell with a time bound;
//! 5. stdout and stderr are decoded as literal values.
//!
//! Steps 2-4 are serialized per tool id. The sandbox does not isolate the
//! child from the host; it only bounds its lifetime.

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;
use crate::error::{Result, StorageError, ToolError};
use crate::literal::decode_or_raw;
use crate::lock::KeyedLocks;
use crate::storage::validate_id;
use crate::tool::ToolRecord;

/// Everything needed to run one invocation of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub tool_id: String,
    pub command: String,
    pub implementation: String,
    pub env_variables: Vec<String>,
    pub dependencies: Vec<String>,
}

impl ExecutionRequest {
    /// Bind `command` to the record it runs.
    pub fn from_record(record: &ToolRecord, command: impl Into<String>) -> Self {
        Self {
            tool_id: record.id.clone(),
            command: command.into(),
            implementation: record.implementation.clone(),
            env_variables: record.env_variables.clone(),
            dependencies: record.dependencies.clone(),
        }
    }
}

/// Decoded result of a finished child process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    /// Decoded stdout, if any was printed.
    pub output: Option<Value>,

    /// Decoded stderr, if any was printed.
    pub error: Option<Value>,

    /// Exit code, absent when the child was killed by a signal.
    pub exit_code: Option<i32>,

    pub duration_ms: u64,
}

impl ExecutionOutput {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs tools as child processes.
pub struct Sandbox {
    config: SandboxConfig,
    locks: KeyedLocks,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// File name the source of `tool_id` is materialized under.
    pub fn source_file_name(&self, tool_id: &str) -> String {
        format!("{tool_id}.{}", self.config.source_extension)
    }

    /// Run one invocation.
    ///
    /// Precondition, provisioning and timeout failures are errors; anything
    /// the child prints to stderr is returned as data in
    /// [`ExecutionOutput::error`].
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutput> {
        check_preconditions(&request.env_variables)?;
        validate_id(&request.tool_id)?;

        let _guard = self.locks.lock(&request.tool_id).await;
        debug!(tool_id = %request.tool_id, "executing tool");

        self.provision(&request.dependencies).await?;
        self.materialize(&request.tool_id, &request.implementation)
            .await?;
        self.run(&request.tool_id, &request.command).await
    }

    async fn provision(&self, dependencies: &[String]) -> Result<()> {
        if dependencies.is_empty() {
            return Ok(());
        }
        let packages = dependencies.join(", ");
        let Some((program, args)) = self.config.installer.split_first() else {
            return Err(ToolError::Config(
                "sandbox.installer is empty but the tool has dependencies".to_string(),
            ));
        };

        info!(%packages, "installing dependencies");
        let mut cmd = Command::new(program);
        cmd.args(args)
            .args(dependencies)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        own_process_group(&mut cmd);
        let child = cmd.spawn().map_err(|e| ToolError::DependencyProvisioning {
            packages: packages.clone(),
            reason: format!("failed to start {program}: {e}"),
        })?;
        let pid = child.id();

        let limit = Duration::from_secs(self.config.install_timeout_secs);
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ToolError::DependencyProvisioning {
                packages: packages.clone(),
                reason: e.to_string(),
            })?,
            Err(_) => {
                kill_process_group(pid);
                return Err(ToolError::DependencyProvisioning {
                    packages,
                    reason: format!("installer timed out after {}s", limit.as_secs()),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let reason = if stderr.is_empty() {
                format!("installer exited with {}", output.status)
            } else {
                stderr
            };
            return Err(ToolError::DependencyProvisioning { packages, reason });
        }
        Ok(())
    }

    async fn materialize(&self, tool_id: &str, implementation: &str) -> Result<()> {
        let dir = &self.config.work_dir;
        fs::create_dir_all(dir)
            .await
            .map_err(|e| StorageError::CreateDirectory(format!("{}: {e}", dir.display())))?;
        let path = dir.join(self.source_file_name(tool_id));
        fs::write(&path, implementation)
            .await
            .map_err(|e| StorageError::WriteFile(format!("{}: {e}", path.display())))?;
        debug!(tool_id, path = %path.display(), "materialized tool source");
        Ok(())
    }

    async fn run(&self, tool_id: &str, command: &str) -> Result<ExecutionOutput> {
        let start = Instant::now();
        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.config.work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        own_process_group(&mut cmd);
        let child = cmd
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to start shell: {e}")))?;
        let pid = child.id();

        let limit = Duration::from_secs(self.config.timeout_secs);
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?,
            Err(_) => {
                kill_process_group(pid);
                warn!(tool_id, secs = limit.as_secs(), "tool timed out; process group killed");
                return Err(ToolError::ExecutionTimeout {
                    tool_id: tool_id.to_string(),
                    secs: limit.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut error = decode_stream(tool_id, "stderr", &stderr);
        if error.is_none() && !output.status.success() {
            error = Some(Value::String(format!("process exited with {}", output.status)));
        }

        let result = ExecutionOutput {
            output: decode_stream(tool_id, "stdout", &stdout),
            error,
            exit_code: output.status.code(),
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        info!(
            tool_id,
            success = result.is_success(),
            duration_ms = result.duration_ms,
            "tool finished"
        );
        Ok(result)
    }
}

/// Make the child lead a new process group, so everything it starts can be
/// signalled together.
#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// SIGKILL the process group led by `pid`.
///
/// Dropping the timed-out child only kills the shell itself; anything it
/// spawned lives on in the group until this runs. The shell is reaped by
/// tokio once dropped.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; an exited group yields ESRCH.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, "failed to kill process group: {err}");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Fail with the first required variable that is not set.
pub fn check_preconditions(env_variables: &[String]) -> Result<()> {
    match env_variables
        .iter()
        .find(|name| std::env::var_os(name.as_str()).is_none())
    {
        Some(missing) => Err(ToolError::MissingPrecondition(missing.clone())),
        None => Ok(()),
    }
}

fn decode_stream(tool_id: &str, stream: &str, text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    let (value, err) = decode_or_raw(text);
    if let Some(err) = err {
        warn!(tool_id, stream, "{stream} is not a literal, keeping raw text: {err}");
    }
    Some(value)
}
