use std::sync::Arc;

use tokio_rusqlite::Connection;

use crate::adapters;
use crate::config::AppConfig;
use crate::core::{StatusBoard, SwapEngine};

/// Everything a relocation run needs in one place: the resolved
/// configuration, the attempt-history database and the status board the
/// engine reports into.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub db: Connection,
    pub board: StatusBoard,
}

impl AppContext {
    pub fn new(config: AppConfig, db: Connection) -> Self {
        Self {
            config: Arc::new(config),
            db,
            board: StatusBoard::new(),
        }
    }

    /// An engine wired to this context's board, runner choice and volumes
    /// directory.
    pub fn engine(&self) -> SwapEngine {
        let runner = adapters::runner_for(&self.config, &self.board);
        SwapEngine::with_volumes_dir(runner, self.board.clone(), self.config.volumes_dir.clone())
    }
}
