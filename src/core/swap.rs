//! Where the swap file lives, and where it would live on another volume.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use crate::core::error::EngineError;
use crate::core::executor::{CommandRunner, SHORT_TIMEOUT};
use crate::core::models::Volume;

/// Default canonical path of the system paging file.
pub const CANONICAL_SWAP_PATH: &str = "/private/var/vm/swapfile";

/// The current location of the swap file, as read from the canonical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapLocation {
    /// A regular file sits at the canonical path (the stock layout).
    File(PathBuf),
    /// The canonical path is a symbolic link; the payload is its target.
    Linked(PathBuf),
}

impl SwapLocation {
    /// The path holding the actual swap data.
    pub fn real_path(&self) -> &Path {
        match self {
            Self::File(p) | Self::Linked(p) => p,
        }
    }
}

/// Resolves the canonical swap path and computes per-volume target layout.
#[derive(Clone)]
pub struct SwapLocator {
    swap_path: PathBuf,
    link_re: Regex,
}

impl SwapLocator {
    pub fn new(swap_path: impl Into<PathBuf>) -> Self {
        Self {
            swap_path: swap_path.into(),
            // "lrwxr-xr-x ... /private/var/vm/swapfile -> /Volumes/X/..."
            link_re: Regex::new(r"->\s*(.+?)\s*$").unwrap(),
        }
    }

    /// Target path for the swap file on the volume mounted at `mount`:
    /// the canonical layout replicated under that mount point.
    pub fn target_on(&self, mount: &Path) -> PathBuf {
        let relative = self.swap_path.strip_prefix("/").unwrap_or(&self.swap_path);
        if mount == Path::new("/") {
            self.swap_path.clone()
        } else {
            mount.join(relative)
        }
    }

    /// Ask the filesystem (via `ls -la`) what sits at the canonical path.
    ///
    /// `Ok(None)` means nothing is there; callers treat that as a valid
    /// "unknown" state, not a failure. [`EngineError::NoSwapFileDetected`] is
    /// reserved for the one genuinely broken case: a symbolic link whose
    /// target cannot be read out of the listing.
    pub async fn detect(
        &self,
        runner: &dyn CommandRunner,
    ) -> Result<Option<SwapLocation>, EngineError> {
        let path = self.swap_path.display().to_string();
        let out = runner.run("ls", &["-la", &path], SHORT_TIMEOUT).await?;

        if !out.success() {
            debug!(path = %path, "no swap file at the canonical path");
            return Ok(None);
        }

        if out.stdout.contains("->") {
            match self.parse_link_target(&out.stdout) {
                Some(target) => Ok(Some(SwapLocation::Linked(target))),
                None => Err(EngineError::NoSwapFileDetected),
            }
        } else {
            Ok(Some(SwapLocation::File(self.swap_path.clone())))
        }
    }

    /// The volume hosting the given location: the system volume for a plain
    /// file, otherwise the volume whose mount path is the longest prefix of
    /// the link target.
    pub fn host_volume<'a>(
        &self,
        location: &SwapLocation,
        volumes: &'a [Volume],
    ) -> Option<&'a Volume> {
        match location {
            SwapLocation::File(_) => volumes.iter().find(|v| v.is_system_volume),
            SwapLocation::Linked(target) => volumes
                .iter()
                .filter(|v| target.starts_with(&v.mount_path))
                .max_by_key(|v| v.mount_path.as_os_str().len()),
        }
    }

    fn parse_link_target(&self, listing: &str) -> Option<PathBuf> {
        let line = listing.lines().find(|l| l.contains("->"))?;
        let captured = self.link_re.captures(line)?.get(1)?.as_str();
        if captured.is_empty() {
            None
        } else {
            Some(PathBuf::from(captured))
        }
    }
}
