use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::executor::CommandRunner;
use crate::core::status::StatusBoard;

mod macos;
mod simulated;

pub use macos::MacRunner;
pub use simulated::{IssuedCommand, ScriptHandle, ScriptedRunner};

/// Pick the command runner for this process.
///
/// Simulation mode answers from a canned script instead of touching the
/// host: SIP reads as disabled, swap accounting as enabled, and no swap
/// file exists yet, so a full relocation can be walked end to end dry.
pub fn runner_for(config: &AppConfig, board: &StatusBoard) -> Arc<dyn CommandRunner> {
    if config.simulation {
        let (runner, script) = ScriptedRunner::new(board.clone());
        script.stub("csrutil", "System Integrity Protection status: disabled.\n");
        script.stub("sysctl vm.swap_enabled", "vm.swap_enabled: 1\n");
        script.fail("ls -la", 1, "No such file or directory\n");
        return Arc::new(runner);
    }

    Arc::new(MacRunner::new(board.clone()))
}
