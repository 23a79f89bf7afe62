//! External script execution.
//!
//! The pipeline's batch steps are shell scripts living at fixed working
//! directories, invoked with positional arguments and an environment
//! map, and bounded by long timeouts (minutes to hours). [`ScriptExec`]
//! is the seam the orchestrator depends on; [`ScriptRunner`] is the
//! real spawning implementation.

use std::path::PathBuf;
use std::time::Duration;

pub mod error;
pub mod runner;

pub use error::ScriptError;
pub use runner::ScriptRunner;

/// One script invocation: what to run, where, and for how long.
#[derive(Debug, Clone)]
pub struct ScriptSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    /// Extra environment entries layered over the inherited environment.
    pub env: Vec<(String, String)>,
}

impl ScriptSpec {
    pub fn new(
        program: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            timeout,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Command line rendering for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// How a script finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStatus {
    /// Exit code 0.
    Succeeded,
    /// Normal exit with a nonzero code.
    Failed { code: i32 },
    /// Terminated by a signal we did not send — killed externally.
    Killed { signal: String },
    /// Exceeded its timeout and was terminated by the runner.
    TimedOut,
}

impl ScriptStatus {
    pub fn describe(&self) -> String {
        match self {
            ScriptStatus::Succeeded => "exited successfully".to_string(),
            ScriptStatus::Failed { code } => format!("exited with code {}", code),
            ScriptStatus::Killed { signal } => format!("terminated by {}", signal),
            ScriptStatus::TimedOut => "timed out".to_string(),
        }
    }
}

/// Captured result of one script invocation. Output is captured
/// incrementally, so a timed-out or killed script still carries
/// everything it printed before termination.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: ScriptStatus,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.status == ScriptStatus::Succeeded
    }

    /// One-line failure description for persistence: the exit condition
    /// plus the tail of stderr (or stdout when stderr is empty).
    pub fn failure_detail(&self) -> String {
        let output = if !self.stderr.trim().is_empty() {
            self.stderr.trim()
        } else {
            self.stdout.trim()
        };
        if output.is_empty() {
            self.status.describe()
        } else {
            format!("{}: {}", self.status.describe(), last_lines(output, 5))
        }
    }
}

/// Last `n` lines of a block of output, joined with `; `.
fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("; ")
}

/// Seam between the orchestrator and real process execution.
#[async_trait::async_trait]
pub trait ScriptExec: Send + Sync {
    async fn run(&self, spec: &ScriptSpec) -> error::Result<ScriptOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_builder() {
        let spec = ScriptSpec::new("/opt/scripts/extract.sh", "/opt/scripts", Duration::from_secs(60))
            .arg("acme")
            .args(["shoes", "bags"])
            .env("REGION", "eu-west-1");

        assert_eq!(spec.args, vec!["acme", "shoes", "bags"]);
        assert_eq!(spec.env.len(), 1);
        assert_eq!(
            spec.command_line(),
            "/opt/scripts/extract.sh acme shoes bags"
        );
    }

    #[test]
    fn test_status_describe() {
        assert_eq!(
            ScriptStatus::Failed { code: 2 }.describe(),
            "exited with code 2"
        );
        assert_eq!(
            ScriptStatus::Killed {
                signal: "SIGKILL".to_string()
            }
            .describe(),
            "terminated by SIGKILL"
        );
        assert_eq!(ScriptStatus::TimedOut.describe(), "timed out");
    }

    #[test]
    fn test_failure_detail_prefers_stderr_tail() {
        let out = ScriptOutput {
            stdout: "progress 1\nprogress 2".to_string(),
            stderr: "warning\nfatal: bucket missing".to_string(),
            status: ScriptStatus::Failed { code: 1 },
        };
        let detail = out.failure_detail();
        assert!(detail.starts_with("exited with code 1"));
        assert!(detail.contains("fatal: bucket missing"));
    }

    #[test]
    fn test_failure_detail_without_output() {
        let out = ScriptOutput {
            stdout: String::new(),
            stderr: String::new(),
            status: ScriptStatus::TimedOut,
        };
        assert_eq!(out.failure_detail(), "timed out");
    }
}
