use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One mounted filesystem, rebuilt from scratch on every inventory refresh.
#[derive(Debug, Clone, Serialize)]
pub struct Volume {
    /// Device node when diskutil reports one, otherwise the mount path.
    pub id: String,
    pub name: String,
    pub mount_path: PathBuf,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub is_system_volume: bool,
    pub is_physical_external: bool,
    /// Set during the classification pass; at most one volume per refresh.
    pub hosts_swap_file: bool,
}

impl Volume {
    pub fn matches_mount(&self, mount: &Path) -> bool {
        self.mount_path == mount
    }
}

/// System Integrity Protection state as last observed.
///
/// Until the first successful check the gate is assumed closed:
/// relocation only proceeds on positive evidence that SIP is off.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SecurityState {
    pub sip_enabled: bool,
    pub checked_at: Option<DateTime<Utc>>,
}

impl Default for SecurityState {
    fn default() -> Self {
        Self {
            sip_enabled: true,
            checked_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Info,
    Warning,
    Error,
    Command,
    Output,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Command => "command",
            Self::Output => "output",
        }
    }
}

/// Append-only audit record. Ordering is insertion order, never rewritten.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub kind: LogKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// A caller's request to move the swap file onto the volume mounted at
/// `destination`. Valid only while that mount is present in the latest
/// inventory.
#[derive(Debug, Clone)]
pub struct RelocationRequest {
    pub destination: PathBuf,
}

impl RelocationRequest {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }
}

/// Where the relocation state machine currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelocationPhase {
    Idle,
    ValidatingPreconditions,
    AcquiringPrivileges,
    DisablingAccounting,
    Relocating,
    ReenablingAccounting,
    Completed,
    Failed,
}
