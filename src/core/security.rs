//! System Integrity Protection gate.
//!
//! Relocation rewires a path under `/private/var`, which SIP protects; while
//! SIP is active every privileged step would fail halfway through. The gate
//! is therefore checked before anything mutates, and the engine assumes the
//! gate is closed until `csrutil` says otherwise.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::core::executor::{CommandRunner, SIP_CHECK_TIMEOUT};
use crate::core::models::SecurityState;
use crate::core::status::StatusBoard;

pub struct SecurityGate {
    runner: Arc<dyn CommandRunner>,
    board: StatusBoard,
}

impl SecurityGate {
    pub fn new(runner: Arc<dyn CommandRunner>, board: StatusBoard) -> Self {
        Self { runner, board }
    }

    /// Run `csrutil status` and record the result.
    ///
    /// The check is deliberately crude: a case-insensitive "disabled"
    /// anywhere in the output opens the gate. When the command cannot run or
    /// exits non-zero the previous state is kept and the failure lands in the
    /// audit feed.
    pub async fn check(&self) -> SecurityState {
        match self.runner.run("csrutil", &["status"], SIP_CHECK_TIMEOUT).await {
            Ok(out) if out.success() => {
                let disabled = out.stdout.to_lowercase().contains("disabled");
                let state = SecurityState {
                    sip_enabled: !disabled,
                    checked_at: Some(Utc::now()),
                };
                info!(sip_enabled = state.sip_enabled, "SIP status checked");
                self.board.record_security(state).await;
                state
            }
            Ok(out) => {
                warn!(exit_code = ?out.exit_code, "csrutil exited non-zero; keeping previous SIP state");
                self.board
                    .log_error("SIP check failed; keeping previous state")
                    .await;
                self.board.security().await
            }
            Err(e) => {
                warn!(error = %e, "csrutil did not run; keeping previous SIP state");
                self.board
                    .log_error(format!("SIP check failed ({e}); keeping previous state"))
                    .await;
                self.board.security().await
            }
        }
    }
}
