//! Real command execution on a macOS host.
//!
//! Unelevated commands run under a hard deadline. The deadline is
//! authoritative: once it fires the child is killed and reaped and the call
//! fails with a timeout, even if the process happened to finish in the same
//! instant. Elevated commands go through the system authorization dialog
//! (one consent prompt per command) and therefore run without a deadline,
//! since a human may be looking at the prompt.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::unistd::Uid;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::core::error::EngineError;
use crate::core::executor::{CommandOutput, CommandRunner, command_line};
use crate::core::status::StatusBoard;

/// Characters that can ride through `sh` unquoted.
const SHELL_SAFE: &str = "/._-=:,+";

pub struct MacRunner {
    board: StatusBoard,
}

impl MacRunner {
    pub fn new(board: StatusBoard) -> Self {
        Self { board }
    }

    async fn spawn_with_deadline(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
        line: &str,
    ) -> Result<CommandOutput, EngineError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::CommandExecutionFailed(format!("{line}: {e}")))?;

        let mut stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Unknown(format!("{line}: stdout not captured")))?;
        let mut stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Unknown(format!("{line}: stderr not captured")))?;

        // Drain the pipes off to the side so a chatty child cannot deadlock
        // against a full pipe buffer while we wait on it.
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout_pipe.read_to_end(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr_pipe.read_to_end(&mut buf).await;
            buf
        });

        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| EngineError::CommandExecutionFailed(format!("{line}: {e}")))?
            }
            _ = tokio::time::sleep(timeout) => {
                // Kill and reap before failing so no zombie survives the
                // timeout path.
                let _ = child.start_kill();
                let _ = child.wait().await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                warn!(command = %line, timeout_ms = timeout.as_millis() as u64, "command exceeded its deadline");
                return Err(EngineError::CommandTimedOut(line.to_string()));
            }
        };

        let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: status.code(),
        })
    }

    /// Run to completion with no deadline. Elevated commands only.
    async fn output_unbounded(
        &self,
        program: &str,
        args: &[&str],
        line: &str,
    ) -> Result<CommandOutput, EngineError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::CommandExecutionFailed(format!("{line}: {e}")))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}

#[async_trait]
impl CommandRunner for MacRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, EngineError> {
        let line = command_line(program, args);
        self.board.log_command(&line).await;
        debug!(command = %line, "running");

        let out = match self.spawn_with_deadline(program, args, timeout, &line).await {
            Ok(out) => out,
            Err(e) => {
                self.board.log_error(e.to_string()).await;
                return Err(e);
            }
        };
        if out.success() {
            self.board.log_output(out.stdout.trim_end()).await;
        } else {
            self.board.log_error(failure_detail(&line, &out)).await;
        }
        Ok(out)
    }

    async fn run_elevated(
        &self,
        program: &str,
        args: &[&str],
    ) -> Result<CommandOutput, EngineError> {
        let line = command_line(program, args);
        self.board.log_command(format!("[elevated] {line}")).await;

        let result = if Uid::effective().is_root() {
            // Already root, nothing to prompt for.
            debug!(command = %line, "running elevated command directly as root");
            self.output_unbounded(program, args, &line).await
        } else {
            let shell_line = args
                .iter()
                .fold(shell_quote(program), |acc, a| {
                    format!("{acc} {}", shell_quote(a))
                });
            let script = format!(
                "do shell script \"{}\" with administrator privileges",
                applescript_escape(&shell_line)
            );
            debug!(command = %line, "requesting authorization via osascript");
            self.output_unbounded("osascript", &["-e", &script], &line)
                .await
        };
        let out = match result {
            Ok(out) => out,
            Err(e) => {
                self.board.log_error(e.to_string()).await;
                return Err(e);
            }
        };

        if !out.success() {
            let detail = failure_detail(&line, &out);
            self.board.log_error(&detail).await;
            return Err(EngineError::CommandExecutionFailed(detail));
        }

        self.board.log_output(out.stdout.trim_end()).await;
        Ok(out)
    }
}

fn failure_detail(line: &str, out: &CommandOutput) -> String {
    if out.stderr.trim().is_empty() {
        let status = out
            .exit_code
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        format!("{line} exited with status {status}")
    } else {
        format!("{line}: {}", out.stderr.trim())
    }
}

/// Quote one argument for inclusion in an `sh` command line.
fn shell_quote(arg: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || SHELL_SAFE.contains(c);
    if !arg.is_empty() && arg.chars().all(safe) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Escape a string for embedding in a double-quoted AppleScript literal.
fn applescript_escape(s: &str) -> String {
    s.replace('\\', r"\\").replace('"', "\\\"")
}
