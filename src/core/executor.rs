//! The command execution seam.
//!
//! Everything the engine knows about the outside world arrives through a
//! [`CommandRunner`]: drive classification, the SIP check, swap detection and
//! every privileged mutation. The production implementation shells out to the
//! OS (`adapters::macos`); tests and `--simulation` runs use a scripted
//! implementation (`adapters::simulated`). Both append `command` and
//! `output`/`error` entries to the audit feed around every invocation.

use std::time::Duration;

use async_trait::async_trait;

use crate::core::error::EngineError;

/// Budget for cheap queries (diskutil info, sysctl reads, ls).
pub const SHORT_TIMEOUT: Duration = Duration::from_secs(3);

/// Budget for the SIP status check.
pub const SIP_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// None when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external commands on behalf of the engine.
///
/// Contract:
/// - `run` returns `Ok` for any process that started and exited, regardless
///   of exit status; the status travels in [`CommandOutput`]. `Err` means the
///   process could not be observed to completion (spawn failure or timeout).
/// - `run_elevated` routes through the platform's interactive authorization
///   mechanism, one consent prompt per command. It has no deadline, since a
///   human may be reading the prompt, and a non-zero exit is a hard
///   [`EngineError::CommandExecutionFailed`].
/// - Neither retries. Retry and rollback policy belongs to the orchestrator.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, EngineError>;

    async fn run_elevated(&self, program: &str, args: &[&str])
    -> Result<CommandOutput, EngineError>;

    /// Run a command whose stdout is an Apple property list and parse it into
    /// a generic key-value tree. Any failure, command or parse, yields an
    /// empty dictionary: callers treat missing keys as "unknown", not fatal.
    async fn run_structured(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> plist::Dictionary {
        match self.run(program, args, timeout).await {
            Ok(out) if out.success() => parse_plist_dictionary(&out.stdout),
            _ => plist::Dictionary::new(),
        }
    }
}

/// Render a program and its arguments the way they appear in the audit feed.
pub fn command_line(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Parse XML plist text into a dictionary, or an empty one when the text is
/// not a well-formed plist dictionary.
pub fn parse_plist_dictionary(raw: &str) -> plist::Dictionary {
    plist::Value::from_reader_xml(raw.as_bytes())
        .ok()
        .and_then(plist::Value::into_dictionary)
        .unwrap_or_else(plist::Dictionary::new)
}
