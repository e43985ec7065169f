//! The externally observed state of the engine.
//!
//! `StatusBoard` is the single shared resource: SIP state, volume list,
//! current swap host, busy flag, last error and the append-only audit feed
//! all live behind one lock and change only through the methods here. External
//! callers get read-only [`StatusSnapshot`] clones; nothing hands out a
//! mutable reference.
//!
//! The busy flag doubles as the engine-wide operation guard: `begin_operation`
//! rejects a second caller instead of interleaving two operations.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::core::error::EngineError;
use crate::core::models::{LogEntry, LogKind, RelocationPhase, SecurityState, Volume};

#[derive(Debug)]
struct StatusInner {
    security: SecurityState,
    volumes: Vec<Volume>,
    swap_host: Option<PathBuf>,
    selected_target: Option<PathBuf>,
    busy: bool,
    phase: RelocationPhase,
    last_error: Option<String>,
    log: Vec<LogEntry>,
}

impl Default for StatusInner {
    fn default() -> Self {
        Self {
            security: SecurityState::default(),
            volumes: Vec::new(),
            swap_host: None,
            selected_target: None,
            busy: false,
            phase: RelocationPhase::Idle,
            last_error: None,
            log: Vec::new(),
        }
    }
}

/// Read-only copy of the board at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub security: SecurityState,
    pub volumes: Vec<Volume>,
    pub swap_host: Option<PathBuf>,
    pub selected_target: Option<PathBuf>,
    pub busy: bool,
    pub phase: RelocationPhase,
    pub last_error: Option<String>,
    pub log: Vec<LogEntry>,
}

impl StatusSnapshot {
    /// Entries of one kind, in insertion order.
    pub fn log_of_kind(&self, kind: LogKind) -> Vec<&LogEntry> {
        self.log.iter().filter(|e| e.kind == kind).collect()
    }
}

#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<StatusInner>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.read().await;
        StatusSnapshot {
            security: inner.security,
            volumes: inner.volumes.clone(),
            swap_host: inner.swap_host.clone(),
            selected_target: inner.selected_target.clone(),
            busy: inner.busy,
            phase: inner.phase,
            last_error: inner.last_error.clone(),
            log: inner.log.clone(),
        }
    }

    /// Mark the board busy. Fails when another operation is already in
    /// flight; the check and the flip happen under one write lock.
    pub async fn begin_operation(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.write().await;
        if inner.busy {
            return Err(EngineError::RelocationInProgress);
        }
        inner.busy = true;
        inner.last_error = None;
        Ok(())
    }

    /// Clear the busy flag and record the operation's outcome.
    pub async fn finish_operation(&self, error: Option<String>) {
        let mut inner = self.inner.write().await;
        inner.busy = false;
        inner.last_error = error;
    }

    pub async fn record_security(&self, state: SecurityState) {
        self.inner.write().await.security = state;
    }

    pub async fn security(&self) -> SecurityState {
        self.inner.read().await.security
    }

    /// Replace the volume list wholesale; volumes are never patched in place.
    pub async fn record_volumes(&self, volumes: Vec<Volume>) {
        let mut inner = self.inner.write().await;
        inner.swap_host = volumes
            .iter()
            .find(|v| v.hosts_swap_file)
            .map(|v| v.mount_path.clone());
        inner.volumes = volumes;
    }

    pub async fn volumes(&self) -> Vec<Volume> {
        self.inner.read().await.volumes.clone()
    }

    pub async fn swap_host(&self) -> Option<PathBuf> {
        self.inner.read().await.swap_host.clone()
    }

    pub async fn record_selected_target(&self, target: Option<PathBuf>) {
        self.inner.write().await.selected_target = target;
    }

    pub async fn set_phase(&self, phase: RelocationPhase) {
        self.inner.write().await.phase = phase;
    }

    pub async fn phase(&self) -> RelocationPhase {
        self.inner.read().await.phase
    }

    pub async fn log(&self, kind: LogKind, message: impl Into<String>) {
        let entry = LogEntry {
            kind,
            message: message.into(),
            at: Utc::now(),
        };
        self.inner.write().await.log.push(entry);
    }

    pub async fn log_info(&self, message: impl Into<String>) {
        self.log(LogKind::Info, message).await;
    }

    pub async fn log_warning(&self, message: impl Into<String>) {
        self.log(LogKind::Warning, message).await;
    }

    pub async fn log_error(&self, message: impl Into<String>) {
        self.log(LogKind::Error, message).await;
    }

    pub async fn log_command(&self, message: impl Into<String>) {
        self.log(LogKind::Command, message).await;
    }

    pub async fn log_output(&self, message: impl Into<String>) {
        self.log(LogKind::Output, message).await;
    }

    /// Drop the audit feed. Only ever called at an explicit caller's request.
    pub async fn clear_log(&self) {
        self.inner.write().await.log.clear();
    }
}
