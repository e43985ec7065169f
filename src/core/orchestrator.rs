//! The relocation state machine.
//!
//! A relocation walks a fixed sequence of phases and never runs two
//! privileged mutations concurrently, because ordering between "disable
//! accounting", "move the file" and "re-enable accounting" is safety
//! critical. From the moment the accounting phase begins, every failure
//! re-enables the paging flag (best effort, error logged and ignored)
//! before the original error is surfaced.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::core::error::EngineError;
use crate::core::executor::{CommandRunner, SHORT_TIMEOUT};
use crate::core::models::{RelocationPhase, RelocationRequest, Volume};
use crate::core::status::StatusBoard;
use crate::core::swap::{CANONICAL_SWAP_PATH, SwapLocation, SwapLocator};

/// `dd` count operand sizing a freshly materialized swap file (1024 1m blocks).
const NEW_SWAP_COUNT: &str = "count=1024";

pub struct Orchestrator {
    runner: Arc<dyn CommandRunner>,
    board: StatusBoard,
    locator: SwapLocator,
}

impl Orchestrator {
    pub fn new(runner: Arc<dyn CommandRunner>, board: StatusBoard, locator: SwapLocator) -> Self {
        Self {
            runner,
            board,
            locator,
        }
    }

    /// Run one relocation to completion.
    ///
    /// Precondition failures return before any privileged call is issued.
    /// The caller owns the busy flag and the terminal phase; this method
    /// only advances through the operational phases.
    pub async fn relocate(&self, request: &RelocationRequest) -> Result<(), EngineError> {
        let destination = request.destination.as_path();

        self.board
            .set_phase(RelocationPhase::ValidatingPreconditions)
            .await;
        self.board
            .log_info(format!(
                "Relocating swap file to {}",
                destination.display()
            ))
            .await;
        info!(destination = %destination.display(), "starting swap relocation");

        let security = self.board.security().await;
        if security.sip_enabled {
            warn!("SIP is enabled; refusing to relocate");
            return Err(EngineError::SipEnabled);
        }

        let volumes = self.board.volumes().await;
        let target = volumes
            .iter()
            .find(|v| v.matches_mount(destination))
            .cloned()
            .ok_or_else(|| EngineError::DriveNotFound(destination.display().to_string()))?;

        // Cached inventory already shows the swap file on the destination:
        // succeed without issuing a single privileged command.
        if self.board.swap_host().await.as_deref() == Some(target.mount_path.as_path()) {
            self.board
                .log_info(format!(
                    "Swap file already lives on {}; nothing to do",
                    target.name
                ))
                .await;
            return Ok(());
        }

        self.acquire_privileges().await?;

        self.board
            .set_phase(RelocationPhase::DisablingAccounting)
            .await;
        // Rollback anchor: from here through the file moves, a failure must
        // re-enable accounting before it propagates.
        if let Err(e) = self.disable_and_relocate(&target).await {
            self.rollback(&e).await;
            return Err(e);
        }

        self.board
            .set_phase(RelocationPhase::ReenablingAccounting)
            .await;
        // A failure past this point is reported as-is. The file moves have
        // already landed and are not undone.
        self.set_accounting(true).await?;

        self.board.log_info("Relocation finished").await;
        Ok(())
    }

    /// Probe for already-granted elevation, then prompt at most once.
    async fn acquire_privileges(&self) -> Result<(), EngineError> {
        self.board
            .set_phase(RelocationPhase::AcquiringPrivileges)
            .await;

        match self.runner.run("sudo", &["-n", "true"], SHORT_TIMEOUT).await {
            Ok(out) if out.success() => {
                debug!("elevation already granted; skipping prompt");
                return Ok(());
            }
            Ok(_) => debug!("no cached elevation; prompting"),
            Err(e) => debug!(error = %e, "privilege probe failed; prompting"),
        }

        self.board
            .log_info("Requesting administrator privileges")
            .await;
        if let Err(e) = self.runner.run_elevated("/usr/bin/true", &[]).await {
            warn!(error = %e, "administrator authorization was not granted");
            return Err(EngineError::InsufficientPermissions);
        }
        Ok(())
    }

    /// The rollback-guarded middle of the sequence: accounting off, then the
    /// file moves.
    async fn disable_and_relocate(&self, target: &Volume) -> Result<(), EngineError> {
        if self.accounting_enabled().await? {
            self.set_accounting(false).await?;
        } else {
            self.board
                .log_info("Swap accounting already disabled")
                .await;
        }

        self.board.set_phase(RelocationPhase::Relocating).await;

        // Not the cached location: the file may have moved since the last
        // refresh, and the copy source must be the real current path.
        let location = self.locator.detect(self.runner.as_ref()).await?;

        let volumes = self.board.volumes().await;
        let current_host = location
            .as_ref()
            .and_then(|loc| self.locator.host_volume(loc, &volumes));
        if current_host.is_some_and(|host| host.mount_path == target.mount_path) {
            self.board
                .log_info(format!(
                    "Swap file already lives on {}; skipping file moves",
                    target.name
                ))
                .await;
            return Ok(());
        }

        if target.is_system_volume {
            self.relocate_to_system(location.as_ref()).await
        } else {
            self.relocate_to_volume(target, location.as_ref()).await
        }
    }

    /// Move the swap file onto a non-system destination volume and point the
    /// canonical path at it. Each sub-step is one elevated command and the
    /// first failure aborts the remainder.
    async fn relocate_to_volume(
        &self,
        target: &Volume,
        location: Option<&SwapLocation>,
    ) -> Result<(), EngineError> {
        let target_path = self.locator.target_on(&target.mount_path);
        let target_str = target_path.display().to_string();
        let parent = target_path
            .parent()
            .map(|p| p.display().to_string())
            .ok_or_else(|| EngineError::Unknown(format!("no parent for {target_str}")))?;

        self.elevated("mkdir", &["-p", &parent]).await?;
        self.elevated("rm", &["-f", &target_str]).await?;

        match location {
            Some(loc) => {
                let real = loc.real_path();
                let real_str = real.display().to_string();
                self.elevated("cp", &[&real_str, &target_str]).await?;
                self.elevated("chmod", &["644", &target_str]).await?;
                self.elevated("rm", &["-f", &real_str]).await?;
                if real != Path::new(CANONICAL_SWAP_PATH) {
                    // Stale symlink left behind at the canonical path.
                    self.elevated("rm", &["-f", CANONICAL_SWAP_PATH]).await?;
                }
            }
            None => {
                info!(target = %target_str, "no existing swap file; materializing a fresh one");
                let of = format!("of={target_str}");
                self.elevated("dd", &["if=/dev/zero", &of, "bs=1m", NEW_SWAP_COUNT])
                    .await?;
                self.elevated("chmod", &["644", &target_str]).await?;
                self.elevated("rm", &["-f", CANONICAL_SWAP_PATH]).await?;
            }
        }

        self.elevated("ln", &["-s", &target_str, CANONICAL_SWAP_PATH])
            .await?;
        Ok(())
    }

    /// Bring the swap file home to the system volume.
    async fn relocate_to_system(
        &self,
        location: Option<&SwapLocation>,
    ) -> Result<(), EngineError> {
        match location {
            Some(SwapLocation::Linked(_)) => {
                // Drop the link and let the pager rebuild its default file.
                self.elevated("rm", &["-f", CANONICAL_SWAP_PATH]).await?;
                self.elevated("dynamic_pager", &["-F", CANONICAL_SWAP_PATH])
                    .await?;
            }
            Some(SwapLocation::File(_)) => {
                // A plain file at the canonical path is already home.
                self.board
                    .log_info("Swap file is already at the canonical path")
                    .await;
            }
            None => {
                let of = format!("of={CANONICAL_SWAP_PATH}");
                self.elevated("dd", &["if=/dev/zero", &of, "bs=1m", NEW_SWAP_COUNT])
                    .await?;
                self.elevated("chmod", &["644", CANONICAL_SWAP_PATH]).await?;
            }
        }
        Ok(())
    }

    /// Read the paging flag. Unparseable or failed output counts as enabled,
    /// so the disable step still runs.
    async fn accounting_enabled(&self) -> Result<bool, EngineError> {
        let out = self
            .runner
            .run("sysctl", &["vm.swap_enabled"], SHORT_TIMEOUT)
            .await?;
        if !out.success() {
            warn!(stderr = %out.stderr.trim(), "paging flag query failed; assuming enabled");
            self.board
                .log_warning("Could not read the paging flag; assuming it is enabled")
                .await;
            return Ok(true);
        }
        match parse_sysctl_flag(&out.stdout) {
            Some(value) => Ok(value != 0),
            None => {
                warn!(stdout = %out.stdout.trim(), "unparseable paging flag; assuming enabled");
                self.board
                    .log_warning("Could not parse the paging flag; assuming it is enabled")
                    .await;
                Ok(true)
            }
        }
    }

    async fn set_accounting(&self, enabled: bool) -> Result<(), EngineError> {
        let assignment = format!("vm.swap_enabled={}", if enabled { 1 } else { 0 });
        self.runner
            .run_elevated("sysctl", &["-w", &assignment])
            .await?;
        Ok(())
    }

    /// Best-effort re-enable of the paging flag. Its own failure is logged
    /// and dropped; the original error always wins.
    async fn rollback(&self, cause: &EngineError) {
        warn!(error = %cause, "relocation failed; re-enabling swap accounting");
        self.board
            .log_warning(format!("Re-enabling swap accounting after failure: {cause}"))
            .await;
        if let Err(e) = self.set_accounting(true).await {
            error!(error = %e, "rollback failed; swap accounting may still be off");
            self.board
                .log_error(format!("Failed to re-enable swap accounting: {e}"))
                .await;
        }
    }

    async fn elevated(&self, program: &str, args: &[&str]) -> Result<(), EngineError> {
        self.runner.run_elevated(program, args).await?;
        Ok(())
    }
}

/// Parse `sysctl` output of the form `vm.swap_enabled: 1`.
fn parse_sysctl_flag(stdout: &str) -> Option<i64> {
    stdout.trim().rsplit(':').next()?.trim().parse().ok()
}
