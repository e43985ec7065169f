//! Volume discovery and classification.
//!
//! A refresh walks the standard volumes directory plus the root volume,
//! reads capacity from the filesystem, asks `diskutil` for classification
//! facts, and marks which volume currently hosts the swap file. Volumes are
//! rebuilt wholesale on every refresh; a volume whose metadata cannot be read
//! is skipped without failing the rest.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::sys::statvfs::statvfs;
use tracing::{debug, warn};

use crate::core::error::EngineError;
use crate::core::executor::{CommandRunner, SHORT_TIMEOUT};
use crate::core::models::Volume;
use crate::core::status::StatusBoard;
use crate::core::swap::SwapLocator;

/// Well-known display name of the macOS boot volume.
pub const SYSTEM_VOLUME_NAME: &str = "Macintosh HD";

/// Protocols diskutil reports for physically attached storage.
const PHYSICAL_PROTOCOLS: &[&str] = &["USB", "Thunderbolt", "SATA", "SAS", "FireWire", "External"];

/// Filesystem types that are network mounts or pseudo-filesystems. A match
/// here overrides every inclusion signal.
const VIRTUAL_FS_MARKERS: &[&str] = &["nfs", "smbfs", "afpfs", "webdav", "autofs", "devfs"];

#[derive(Clone)]
pub struct DriveInventory {
    runner: Arc<dyn CommandRunner>,
    board: StatusBoard,
    locator: SwapLocator,
    volumes_dir: PathBuf,
}

impl DriveInventory {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        board: StatusBoard,
        locator: SwapLocator,
        volumes_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            board,
            locator,
            volumes_dir: volumes_dir.into(),
        }
    }

    /// Rebuild the volume list and record it on the status board.
    ///
    /// Enumeration and swap-location detection issue independent commands, so
    /// they run concurrently and join before the marking pass. Swap detection
    /// failure is not a refresh failure; the host is simply left unknown.
    pub async fn refresh(&self) -> Result<Vec<Volume>, EngineError> {
        let mounts = self.list_mounts().await?;

        let (mut volumes, detection) = tokio::join!(
            self.build_volumes(mounts),
            self.locator.detect(self.runner.as_ref())
        );

        match detection {
            Ok(Some(location)) => {
                let host_mount = self
                    .locator
                    .host_volume(&location, &volumes)
                    .map(|v| v.mount_path.clone());
                match host_mount {
                    Some(mount) => {
                        for v in volumes.iter_mut() {
                            v.hosts_swap_file = v.mount_path == mount;
                        }
                    }
                    None => {
                        self.board
                            .log_warning(format!(
                                "swap file at {} is outside every known mount",
                                location.real_path().display()
                            ))
                            .await;
                    }
                }
            }
            Ok(None) => {
                debug!("no swap file detected; no volume marked as host");
            }
            Err(e) => {
                self.board
                    .log_warning(format!("swap location unknown: {e}"))
                    .await;
            }
        }

        self.board.record_volumes(volumes.clone()).await;
        Ok(volumes)
    }

    /// Mount points to inspect: the root volume as a distinguished entry,
    /// then everything under the volumes directory in sorted order.
    async fn list_mounts(&self) -> Result<Vec<PathBuf>, EngineError> {
        let unreadable = |e: std::io::Error| {
            EngineError::Unknown(format!(
                "cannot read volumes directory {}: {e}",
                self.volumes_dir.display()
            ))
        };

        let mut dir = tokio::fs::read_dir(&self.volumes_dir)
            .await
            .map_err(unreadable)?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(unreadable)? {
            let path = entry.path();
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            // "Macintosh HD" under /Volumes is typically a link back to /;
            // the root volume is already listed explicitly.
            if let Ok(real) = tokio::fs::canonicalize(&path).await {
                if real == Path::new("/") {
                    debug!(entry = %path.display(), "skipping alias of the root volume");
                    continue;
                }
            }
            entries.push(path);
        }
        entries.sort();

        let mut mounts = vec![PathBuf::from("/")];
        mounts.extend(entries);
        Ok(mounts)
    }

    async fn build_volumes(&self, mounts: Vec<PathBuf>) -> Vec<Volume> {
        let mut volumes = Vec::with_capacity(mounts.len());
        for mount in mounts {
            if let Some(volume) = self.build_volume(&mount).await {
                volumes.push(volume);
            }
        }
        volumes
    }

    /// Build one volume, or None when its metadata is unreadable.
    async fn build_volume(&self, mount: &Path) -> Option<Volume> {
        if let Err(e) = tokio::fs::metadata(mount).await {
            warn!(mount = %mount.display(), error = %e, "skipping volume with unreadable metadata");
            self.board
                .log_warning(format!("skipping {}: {e}", mount.display()))
                .await;
            return None;
        }

        let stats = match statvfs(mount) {
            Ok(s) => s,
            Err(e) => {
                warn!(mount = %mount.display(), error = %e, "skipping volume without filesystem stats");
                self.board
                    .log_warning(format!("skipping {}: {e}", mount.display()))
                    .await;
                return None;
            }
        };
        let fragment = stats.fragment_size() as u64;
        let total_bytes = stats.blocks() as u64 * fragment;
        let available_bytes = stats.blocks_available() as u64 * fragment;

        let mount_str = mount.display().to_string();
        let info = self
            .runner
            .run_structured("diskutil", &["info", "-plist", &mount_str], SHORT_TIMEOUT)
            .await;

        let name = plist_string(&info, "VolumeName")
            .map(str::to_string)
            .or_else(|| mount.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| SYSTEM_VOLUME_NAME.to_string());
        let id = plist_string(&info, "DeviceNode")
            .map(str::to_string)
            .unwrap_or_else(|| mount_str.clone());

        Some(Volume {
            is_system_volume: classify_system_boot(&info, mount, &name),
            is_physical_external: classify_physical_external(&info),
            id,
            name,
            mount_path: mount.to_path_buf(),
            total_bytes,
            available_bytes,
            hosts_swap_file: false,
        })
    }
}

/// A volume is the system boot volume when any one signal says so: diskutil's
/// boot flag, the root mount path, or the well-known system volume name.
pub fn classify_system_boot(info: &plist::Dictionary, mount: &Path, name: &str) -> bool {
    plist_bool(info, "BootFromThisVolume") == Some(true)
        || mount == Path::new("/")
        || name == SYSTEM_VOLUME_NAME
}

/// A volume is physically attached external storage when its device node is
/// in the block-device namespace and either its protocol is in the known
/// physical set or diskutil flags it removable/external, unless its
/// filesystem type marks it as a network or pseudo-filesystem, which always
/// wins.
pub fn classify_physical_external(info: &plist::Dictionary) -> bool {
    let in_block_namespace = plist_string(info, "DeviceNode")
        .map(|node| node.starts_with("/dev/disk"))
        .unwrap_or(false);
    if !in_block_namespace {
        return false;
    }

    let physical_protocol = plist_string(info, "Protocol")
        .map(|p| PHYSICAL_PROTOCOLS.iter().any(|known| p.eq_ignore_ascii_case(known)))
        .unwrap_or(false);
    let flagged_removable = plist_bool(info, "RemovableMedia") == Some(true)
        || plist_bool(info, "External") == Some(true);
    if !physical_protocol && !flagged_removable {
        return false;
    }

    // Exclusion is evaluated last and takes priority over the checks above.
    if let Some(fs_type) = plist_string(info, "FilesystemType") {
        if VIRTUAL_FS_MARKERS.iter().any(|m| fs_type.eq_ignore_ascii_case(m)) {
            return false;
        }
    }

    true
}

/// Look a key up at the top level, then inside the nested `VolumeInfo`
/// dictionary some diskutil versions use.
fn plist_lookup<'a>(info: &'a plist::Dictionary, key: &str) -> Option<&'a plist::Value> {
    info.get(key).or_else(|| {
        info.get("VolumeInfo")
            .and_then(|v| v.as_dictionary())
            .and_then(|nested| nested.get(key))
    })
}

fn plist_bool(info: &plist::Dictionary, key: &str) -> Option<bool> {
    plist_lookup(info, key).and_then(|v| v.as_boolean())
}

fn plist_string<'a>(info: &'a plist::Dictionary, key: &str) -> Option<&'a str> {
    plist_lookup(info, key).and_then(|v| v.as_string())
}
