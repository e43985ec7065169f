//! Scripted command execution.
//!
//! `--simulation` runs and the test suite both need an engine that behaves
//! like a real host without touching one. The scripted runner answers each
//! command from a set of rules keyed by a substring of the rendered command
//! line, records everything it was asked to run, and feeds the audit log
//! exactly like the real runner does.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::error::EngineError;
use crate::core::executor::{CommandOutput, CommandRunner, command_line};
use crate::core::status::StatusBoard;

/// One command the runner was asked to execute, in issue order.
#[derive(Debug, Clone)]
pub struct IssuedCommand {
    pub line: String,
    pub elevated: bool,
}

#[derive(Clone)]
enum Response {
    /// Exit zero with this stdout.
    Stdout(String),
    /// Exit non-zero. `run` reports this in the output; `run_elevated`
    /// turns it into a hard error.
    ExitWith { code: i32, stderr: String },
    /// The command never comes back within its deadline.
    TimesOut,
    /// Exit zero with this stdout, after sleeping first. Lets tests park an
    /// operation mid-flight.
    Delayed { delay_ms: u64, stdout: String },
}

struct Rule {
    needle: String,
    response: Response,
}

#[derive(Default)]
struct Script {
    one_shots: VecDeque<Rule>,
    rules: Vec<Rule>,
    issued: Vec<IssuedCommand>,
}

impl Script {
    /// Record the command and pick its response. One-shot rules are consumed
    /// in registration order before the persistent rules are consulted;
    /// a command nothing matches succeeds with empty output.
    fn respond(&mut self, line: &str, elevated: bool) -> Response {
        self.issued.push(IssuedCommand {
            line: line.to_string(),
            elevated,
        });

        if let Some(pos) = self
            .one_shots
            .iter()
            .position(|r| line.contains(&r.needle))
        {
            if let Some(rule) = self.one_shots.remove(pos) {
                return rule.response;
            }
        }
        self.rules
            .iter()
            .find(|r| line.contains(&r.needle))
            .map(|r| r.response.clone())
            .unwrap_or_else(|| Response::Stdout(String::new()))
    }
}

/// Control half of the scripted runner: registers rules and inspects what
/// the engine issued.
#[derive(Clone)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
}

impl ScriptHandle {
    /// Any command line containing `needle` succeeds with `stdout`.
    pub fn stub(&self, needle: &str, stdout: &str) {
        self.push(needle, Response::Stdout(stdout.to_string()));
    }

    /// Like [`stub`](Self::stub) but consumed by the first match only.
    pub fn stub_once(&self, needle: &str, stdout: &str) {
        self.script.lock().unwrap().one_shots.push_back(Rule {
            needle: needle.to_string(),
            response: Response::Stdout(stdout.to_string()),
        });
    }

    /// Any command line containing `needle` exits with `code`.
    pub fn fail(&self, needle: &str, code: i32, stderr: &str) {
        self.push(
            needle,
            Response::ExitWith {
                code,
                stderr: stderr.to_string(),
            },
        );
    }

    /// Any command line containing `needle` blows its deadline.
    pub fn time_out(&self, needle: &str) {
        self.push(needle, Response::TimesOut);
    }

    /// Any command line containing `needle` succeeds after `delay_ms`.
    pub fn delay(&self, needle: &str, delay_ms: u64, stdout: &str) {
        self.push(
            needle,
            Response::Delayed {
                delay_ms,
                stdout: stdout.to_string(),
            },
        );
    }

    /// Drop every rule. The issued-command record survives.
    pub fn clear_rules(&self) {
        let mut script = self.script.lock().unwrap();
        script.one_shots.clear();
        script.rules.clear();
    }

    pub fn issued(&self) -> Vec<IssuedCommand> {
        self.script.lock().unwrap().issued.clone()
    }

    pub fn issued_lines(&self) -> Vec<String> {
        self.script
            .lock()
            .unwrap()
            .issued
            .iter()
            .map(|c| c.line.clone())
            .collect()
    }

    /// Only the commands that went through the elevation path.
    pub fn elevated_lines(&self) -> Vec<String> {
        self.script
            .lock()
            .unwrap()
            .issued
            .iter()
            .filter(|c| c.elevated)
            .map(|c| c.line.clone())
            .collect()
    }

    fn push(&self, needle: &str, response: Response) {
        self.script.lock().unwrap().rules.push(Rule {
            needle: needle.to_string(),
            response,
        });
    }
}

pub struct ScriptedRunner {
    script: Arc<Mutex<Script>>,
    board: StatusBoard,
}

impl ScriptedRunner {
    pub fn new(board: StatusBoard) -> (Self, ScriptHandle) {
        let script = Arc::new(Mutex::new(Script::default()));
        (
            Self {
                script: script.clone(),
                board,
            },
            ScriptHandle { script },
        )
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        _timeout: Duration,
    ) -> Result<CommandOutput, EngineError> {
        let line = command_line(program, args);
        // Decide under the lock, then log and sleep outside it.
        let response = self.script.lock().unwrap().respond(&line, false);
        self.board.log_command(&line).await;

        match response {
            Response::Stdout(stdout) => {
                self.board.log_output(stdout.trim_end()).await;
                Ok(CommandOutput {
                    stdout,
                    stderr: String::new(),
                    exit_code: Some(0),
                })
            }
            Response::ExitWith { code, stderr } => {
                self.board.log_error(exit_detail(&line, code, &stderr)).await;
                Ok(CommandOutput {
                    stdout: String::new(),
                    stderr,
                    exit_code: Some(code),
                })
            }
            Response::TimesOut => {
                let err = EngineError::CommandTimedOut(line);
                self.board.log_error(err.to_string()).await;
                Err(err)
            }
            Response::Delayed { delay_ms, stdout } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                self.board.log_output(stdout.trim_end()).await;
                Ok(CommandOutput {
                    stdout,
                    stderr: String::new(),
                    exit_code: Some(0),
                })
            }
        }
    }

    async fn run_elevated(
        &self,
        program: &str,
        args: &[&str],
    ) -> Result<CommandOutput, EngineError> {
        let line = command_line(program, args);
        let response = self.script.lock().unwrap().respond(&line, true);
        self.board.log_command(format!("[elevated] {line}")).await;

        match response {
            Response::Stdout(stdout) => {
                self.board.log_output(stdout.trim_end()).await;
                Ok(CommandOutput {
                    stdout,
                    stderr: String::new(),
                    exit_code: Some(0),
                })
            }
            Response::ExitWith { code, stderr } => {
                let detail = exit_detail(&line, code, &stderr);
                self.board.log_error(&detail).await;
                Err(EngineError::CommandExecutionFailed(detail))
            }
            Response::TimesOut => {
                let err = EngineError::CommandTimedOut(line);
                self.board.log_error(err.to_string()).await;
                Err(err)
            }
            Response::Delayed { delay_ms, stdout } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                self.board.log_output(stdout.trim_end()).await;
                Ok(CommandOutput {
                    stdout,
                    stderr: String::new(),
                    exit_code: Some(0),
                })
            }
        }
    }
}

fn exit_detail(line: &str, code: i32, stderr: &str) -> String {
    if stderr.trim().is_empty() {
        format!("{line} exited with status {code}")
    } else {
        format!("{line} exited with status {code}: {}", stderr.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::SHORT_TIMEOUT;
    use crate::core::models::LogKind;

    fn runner() -> (ScriptedRunner, ScriptHandle, StatusBoard) {
        let board = StatusBoard::new();
        let (runner, script) = ScriptedRunner::new(board.clone());
        (runner, script, board)
    }

    #[tokio::test]
    async fn unmatched_command_succeeds_empty() {
        let (runner, script, _board) = runner();
        let out = runner.run("true", &[], SHORT_TIMEOUT).await.unwrap();
        assert!(out.success());
        assert!(out.stdout.is_empty());
        assert_eq!(script.issued_lines(), vec!["true".to_string()]);
    }

    #[tokio::test]
    async fn substring_rules_match_the_rendered_line() {
        let (runner, script, _board) = runner();
        script.stub("sysctl vm.swap_enabled", "vm.swap_enabled: 1\n");

        let query = runner
            .run("sysctl", &["vm.swap_enabled"], SHORT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(query.stdout, "vm.swap_enabled: 1\n");

        // The write has "-w" between program and name, so it must not hit
        // the query rule.
        let write = runner
            .run("sysctl", &["-w", "vm.swap_enabled=0"], SHORT_TIMEOUT)
            .await
            .unwrap();
        assert!(write.stdout.is_empty());

        assert_eq!(script.issued_lines().len(), 2);
    }

    #[tokio::test]
    async fn one_shots_are_consumed_in_order_then_fall_through() {
        let (runner, script, _board) = runner();
        script.stub_once("ls", "first\n");
        script.stub_once("ls", "second\n");
        script.stub("ls", "steady\n");

        for expected in ["first\n", "second\n", "steady\n", "steady\n"] {
            let out = runner.run("ls", &["-la", "/x"], SHORT_TIMEOUT).await.unwrap();
            assert_eq!(out.stdout, expected);
        }
    }

    #[tokio::test]
    async fn one_shot_for_a_different_command_is_not_consumed() {
        let (runner, script, _board) = runner();
        script.stub_once("ls", "listing\n");
        script.stub("csrutil", "disabled\n");

        let sip = runner.run("csrutil", &["status"], SHORT_TIMEOUT).await.unwrap();
        assert_eq!(sip.stdout, "disabled\n");

        let ls = runner.run("ls", &["-la", "/x"], SHORT_TIMEOUT).await.unwrap();
        assert_eq!(ls.stdout, "listing\n");
    }

    #[tokio::test]
    async fn failure_rule_is_a_plain_exit_for_run() {
        let (runner, script, _board) = runner();
        script.fail("ls", 1, "No such file or directory\n");

        let out = runner.run("ls", &["-la", "/x"], SHORT_TIMEOUT).await.unwrap();
        assert_eq!(out.exit_code, Some(1));
        assert!(!out.success());
    }

    #[tokio::test]
    async fn failure_rule_is_a_hard_error_when_elevated() {
        let (runner, script, _board) = runner();
        script.fail("rm", 1, "Operation not permitted\n");

        let err = runner.run_elevated("rm", &["-f", "/x"]).await.unwrap_err();
        assert!(matches!(err, EngineError::CommandExecutionFailed(_)));
    }

    #[tokio::test]
    async fn every_invocation_logs_a_command_entry_then_a_result_entry() {
        let (runner, script, board) = runner();
        script.fail("csrutil", 1, "");
        script.time_out("dd");

        runner.run("true", &[], SHORT_TIMEOUT).await.unwrap();
        runner.run("csrutil", &["status"], SHORT_TIMEOUT).await.unwrap();
        runner.run("dd", &["if=/dev/zero"], SHORT_TIMEOUT).await.unwrap_err();

        let snap = board.snapshot().await;
        let kinds: Vec<LogKind> = snap.log.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                LogKind::Command,
                LogKind::Output,
                LogKind::Command,
                LogKind::Error,
                LogKind::Command,
                LogKind::Error,
            ]
        );
        assert!(snap.log[3].message.contains("exited with status 1"));
        assert!(snap.log[5].message.contains("timed out"));
    }

    #[tokio::test]
    async fn elevated_commands_are_recorded_and_prefixed_in_the_log() {
        let (runner, script, board) = runner();
        runner.run_elevated("mkdir", &["-p", "/x/y"]).await.unwrap();

        assert_eq!(script.elevated_lines(), vec!["mkdir -p /x/y".to_string()]);
        let snap = board.snapshot().await;
        assert!(
            snap.log
                .iter()
                .any(|e| e.message == "[elevated] mkdir -p /x/y")
        );
    }

    #[tokio::test]
    async fn timeout_rule_maps_to_the_timeout_error() {
        let (runner, script, _board) = runner();
        script.time_out("dd");

        let err = runner.run_elevated("dd", &["if=/dev/zero"]).await.unwrap_err();
        assert!(matches!(err, EngineError::CommandTimedOut(_)));
    }
}
