//! Typed error definitions for the relocation engine.
//! A small set of well-known failure modes for better logs and tests.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("System Integrity Protection is enabled; relocation refused")]
    SipEnabled,

    #[error("administrator privileges were not granted")]
    InsufficientPermissions,

    #[error("command failed: {0}")]
    CommandExecutionFailed(String),

    #[error("drive not found in the latest inventory: {0}")]
    DriveNotFound(String),

    #[error("swap file location could not be determined")]
    NoSwapFileDetected,

    #[error("command timed out: {0}")]
    CommandTimedOut(String),

    #[error("another operation is already in flight")]
    RelocationInProgress,

    #[error("{0}")]
    Unknown(String),
}
