pub mod engine;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod models;
pub mod orchestrator;
pub mod security;
pub mod status;
pub mod swap;

pub use engine::SwapEngine;
pub use error::EngineError;
pub use executor::{CommandOutput, CommandRunner};
pub use inventory::DriveInventory;
pub use models::{LogEntry, LogKind, RelocationPhase, RelocationRequest, SecurityState, Volume};
pub use orchestrator::Orchestrator;
pub use security::SecurityGate;
pub use status::{StatusBoard, StatusSnapshot};
pub use swap::{SwapLocation, SwapLocator};
