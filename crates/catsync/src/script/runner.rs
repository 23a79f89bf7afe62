//! Spawning script runner built on `tokio::process`.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use super::error::{Result, ScriptError};
use super::{ScriptExec, ScriptOutput, ScriptSpec, ScriptStatus};

/// Runs scripts as child processes with piped output and a hard timeout.
#[derive(Debug, Clone, Default)]
pub struct ScriptRunner;

impl ScriptRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ScriptExec for ScriptRunner {
    async fn run(&self, spec: &ScriptSpec) -> Result<ScriptOutput> {
        tracing::debug!(command = %spec.command_line(), cwd = %spec.working_dir.display(), "spawning script");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| ScriptError::Spawn {
            program: spec.program.clone(),
            source: e,
        })?;

        // Drain both pipes as the script runs. Batch scripts here run for
        // hours; waiting for exit before reading would deadlock once the
        // pipe buffer fills.
        let stdout_task = tokio::spawn(collect_lines(child.stdout.take()));
        let stderr_task = tokio::spawn(collect_lines(child.stderr.take()));

        let exit = match tokio::time::timeout(spec.timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                return Err(ScriptError::Wait {
                    program: spec.program.clone(),
                    source: e,
                });
            }
            Err(_) => {
                tracing::warn!(
                    command = %spec.command_line(),
                    timeout_secs = spec.timeout.as_secs(),
                    "script exceeded timeout, killing"
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!("failed to kill timed-out script: {}", e);
                }
                None
            }
        };

        // Killing the child closes its pipes, so the collectors finish.
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        let status = match exit {
            Some(exit) => classify_exit(exit),
            None => ScriptStatus::TimedOut,
        };

        Ok(ScriptOutput {
            stdout,
            stderr,
            status,
        })
    }
}

async fn collect_lines<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut collected = Vec::new();
    if let Some(pipe) = pipe {
        let reader = BufReader::new(pipe);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            collected.push(line);
        }
    }
    collected.join("\n")
}

fn classify_exit(exit: std::process::ExitStatus) -> ScriptStatus {
    if exit.success() {
        return ScriptStatus::Succeeded;
    }
    if let Some(code) = exit.code() {
        return ScriptStatus::Failed { code };
    }
    ScriptStatus::Killed {
        signal: exit_signal_name(&exit),
    }
}

#[cfg(unix)]
fn exit_signal_name(exit: &std::process::ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match exit.signal() {
        Some(1) => "SIGHUP".to_string(),
        Some(2) => "SIGINT".to_string(),
        Some(9) => "SIGKILL".to_string(),
        Some(15) => "SIGTERM".to_string(),
        Some(n) => format!("signal {}", n),
        None => "unknown signal".to_string(),
    }
}

#[cfg(not(unix))]
fn exit_signal_name(_exit: &std::process::ExitStatus) -> String {
    "unknown signal".to_string()
}
