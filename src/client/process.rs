//! Subprocess invocation shared by the acquisition and transfer tools.

use crate::models::{RelayError, Result};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// Lines of stderr kept for error messages.
const STDERR_TAIL_LINES: usize = 5;

/// Result of a finished tool invocation.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    /// Last few non-empty stderr lines
    pub stderr_tail: String,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Human-readable failure description.
    pub fn describe_failure(&self) -> String {
        let code = self
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        if self.stderr_tail.is_empty() {
            format!("exit code {code}")
        } else {
            format!("exit code {code}: {}", self.stderr_tail)
        }
    }
}

/// Run `cmd` to completion, capturing its output.
///
/// No timeout is applied; a hung tool blocks the caller.
pub async fn run_tool(tool: &str, cmd: &mut Command) -> Result<ToolOutput> {
    let start = Instant::now();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(tool = tool, command = ?cmd.as_std(), "Running tool");

    let output = cmd.output().await.map_err(|e| RelayError::ToolSpawn {
        tool: tool.to_string(),
        source: e,
    })?;

    Ok(ToolOutput {
        status: output.status,
        stderr_tail: tail_lines(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL_LINES),
        duration: start.elapsed(),
    })
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    lines[lines.len().saturating_sub(n)..].join(" | ")
}
