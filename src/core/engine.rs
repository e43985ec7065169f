//! Public entry points of the relocation engine.
//!
//! `SwapEngine` wires the discovery components and the orchestrator to one
//! shared status board and brackets every relocation with the busy flag, so
//! a second request while one is in flight is rejected instead of
//! interleaved.

use std::path::PathBuf;
use std::sync::Arc;

use crate::core::error::EngineError;
use crate::core::executor::CommandRunner;
use crate::core::inventory::DriveInventory;
use crate::core::models::{RelocationPhase, RelocationRequest, SecurityState, Volume};
use crate::core::orchestrator::Orchestrator;
use crate::core::security::SecurityGate;
use crate::core::status::{StatusBoard, StatusSnapshot};
use crate::core::swap::{CANONICAL_SWAP_PATH, SwapLocation, SwapLocator};

/// Where macOS mounts everything that is not the root volume.
pub const VOLUMES_DIR: &str = "/Volumes";

pub struct SwapEngine {
    board: StatusBoard,
    gate: SecurityGate,
    inventory: DriveInventory,
    orchestrator: Orchestrator,
    locator: SwapLocator,
    runner: Arc<dyn CommandRunner>,
}

impl SwapEngine {
    pub fn new(runner: Arc<dyn CommandRunner>, board: StatusBoard) -> Self {
        Self::with_volumes_dir(runner, board, VOLUMES_DIR)
    }

    /// Same engine against a different volumes directory. Tests point this
    /// at a temporary tree instead of the real mount table.
    pub fn with_volumes_dir(
        runner: Arc<dyn CommandRunner>,
        board: StatusBoard,
        volumes_dir: impl Into<PathBuf>,
    ) -> Self {
        let locator = SwapLocator::new(CANONICAL_SWAP_PATH);
        let gate = SecurityGate::new(runner.clone(), board.clone());
        let inventory = DriveInventory::new(
            runner.clone(),
            board.clone(),
            locator.clone(),
            volumes_dir,
        );
        let orchestrator = Orchestrator::new(runner.clone(), board.clone(), locator.clone());
        Self {
            board,
            gate,
            inventory,
            orchestrator,
            locator,
            runner,
        }
    }

    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    /// Full startup discovery: SIP state and volume inventory in parallel.
    /// The returned snapshot is fresh only once both have landed.
    pub async fn refresh_all(&self) -> Result<StatusSnapshot, EngineError> {
        let (_, volumes) = tokio::join!(self.gate.check(), self.inventory.refresh());
        volumes?;
        Ok(self.board.snapshot().await)
    }

    pub async fn refresh_drives(&self) -> Result<Vec<Volume>, EngineError> {
        self.inventory.refresh().await
    }

    pub async fn check_security(&self) -> SecurityState {
        self.gate.check().await
    }

    /// Where the swap file currently sits, read from the filesystem now.
    pub async fn detect_swap_location(&self) -> Result<Option<SwapLocation>, EngineError> {
        self.locator.detect(self.runner.as_ref()).await
    }

    /// Run one relocation. Exactly one may be in flight engine-wide; a
    /// concurrent call fails with [`EngineError::RelocationInProgress`].
    pub async fn relocate(&self, request: &RelocationRequest) -> Result<(), EngineError> {
        self.board.begin_operation().await?;
        self.board
            .record_selected_target(Some(request.destination.clone()))
            .await;

        let outcome = self.relocate_and_refresh(request).await;
        match &outcome {
            Ok(()) => {
                self.board.set_phase(RelocationPhase::Completed).await;
                self.board.finish_operation(None).await;
            }
            Err(e) => {
                // Every terminal failure lands in the feed exactly once,
                // whichever phase produced it.
                self.board.log_error(e.to_string()).await;
                self.board.set_phase(RelocationPhase::Failed).await;
                self.board.finish_operation(Some(e.to_string())).await;
            }
        }
        outcome
    }

    async fn relocate_and_refresh(&self, request: &RelocationRequest) -> Result<(), EngineError> {
        self.orchestrator.relocate(request).await?;
        // Ground truth before declaring completion, not cached state. A
        // refresh failure here does not undo a relocation that landed.
        if let Err(e) = self.inventory.refresh().await {
            self.board
                .log_warning(format!("Post-relocation refresh failed: {e}"))
                .await;
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        self.board.snapshot().await
    }

    pub async fn clear_log(&self) {
        self.board.clear_log().await
    }
}
