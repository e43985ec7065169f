//! Volume discovery and classification against a scripted host.
//!
//! The volumes directory is a tempdir standing in for /Volumes, and every
//! diskutil answer is a canned plist, so these tests pin down exactly how
//! mount-table contents map to the volume list.

use std::path::Path;
use std::sync::Arc;

use swapshift::adapters::{ScriptHandle, ScriptedRunner};
use swapshift::core::{EngineError, StatusBoard, SwapEngine};
use tempfile::tempdir;

fn engine_in(volumes_dir: &Path) -> (SwapEngine, ScriptHandle, StatusBoard) {
    let board = StatusBoard::new();
    let (runner, script) = ScriptedRunner::new(board.clone());
    let engine = SwapEngine::with_volumes_dir(Arc::new(runner), board.clone(), volumes_dir);
    (engine, script, board)
}

/// diskutil-style plist with string values only.
fn disk_plist(pairs: &[(&str, &str)]) -> String {
    let mut body = String::new();
    for (k, v) in pairs {
        body.push_str(&format!("    <key>{k}</key>\n    <string>{v}</string>\n"));
    }
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<plist version=\"1.0\">\n<dict>\n{body}</dict>\n</plist>\n"
    )
}

fn boot_plist(name: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<plist version=\"1.0\">\n<dict>\n    <key>VolumeName</key>\n    <string>{name}</string>\n    <key>BootFromThisVolume</key>\n    <true/>\n</dict>\n</plist>\n"
    )
}

fn no_swap_file(script: &ScriptHandle) {
    script.fail("ls -la", 1, "No such file or directory\n");
}

#[tokio::test]
async fn test_root_is_listed_first_and_entries_are_sorted() {
    let vols = tempdir().unwrap();
    std::fs::create_dir(vols.path().join("T5")).unwrap();
    std::fs::create_dir(vols.path().join("Backup")).unwrap();

    let (engine, script, _board) = engine_in(vols.path());
    no_swap_file(&script);

    let volumes = engine.refresh_drives().await.unwrap();
    assert_eq!(volumes.len(), 3);
    assert_eq!(volumes[0].mount_path, Path::new("/"));
    assert_eq!(volumes[1].mount_path, vols.path().join("Backup"));
    assert_eq!(volumes[2].mount_path, vols.path().join("T5"));

    // No diskutil data at all, so only the fallbacks apply.
    assert!(volumes[0].is_system_volume);
    assert_eq!(volumes[0].name, "Macintosh HD");
    assert!(!volumes[1].is_system_volume);
    assert!(!volumes[1].is_physical_external);

    for v in &volumes {
        assert!(v.total_bytes >= v.available_bytes);
    }
}

#[tokio::test]
async fn test_classification_follows_diskutil_answers() {
    let vols = tempdir().unwrap();
    let t5 = vols.path().join("T5");
    std::fs::create_dir(&t5).unwrap();

    let (engine, script, _board) = engine_in(vols.path());
    no_swap_file(&script);
    // Specific mounts first: the root needle is a substring of every path.
    script.stub(
        &format!("diskutil info -plist {}", t5.display()),
        &disk_plist(&[
            ("VolumeName", "T5"),
            ("DeviceNode", "/dev/disk4s1"),
            ("Protocol", "USB"),
            ("FilesystemType", "apfs"),
        ]),
    );
    script.stub("diskutil info -plist /", &boot_plist("Macintosh HD"));

    let volumes = engine.refresh_drives().await.unwrap();
    let root = &volumes[0];
    let external = &volumes[1];

    assert!(root.is_system_volume);
    assert!(!root.is_physical_external);

    assert_eq!(external.name, "T5");
    assert_eq!(external.id, "/dev/disk4s1");
    assert!(external.is_physical_external);
    assert!(!external.is_system_volume);
}

#[tokio::test]
async fn test_virtual_filesystems_never_classify_external() {
    for fs in ["nfs", "smbfs", "autofs"] {
        let vols = tempdir().unwrap();
        let share = vols.path().join("Share");
        std::fs::create_dir(&share).unwrap();

        let (engine, script, _board) = engine_in(vols.path());
        no_swap_file(&script);
        // Every inclusion signal present; the filesystem type must still win.
        script.stub(
            &format!("diskutil info -plist {}", share.display()),
            &disk_plist(&[
                ("VolumeName", "Share"),
                ("DeviceNode", "/dev/disk9s1"),
                ("Protocol", "USB"),
                ("FilesystemType", fs),
            ]),
        );

        let volumes = engine.refresh_drives().await.unwrap();
        let share_vol = volumes
            .iter()
            .find(|v| v.name == "Share")
            .unwrap_or_else(|| panic!("share volume missing for {fs}"));
        assert!(
            !share_vol.is_physical_external,
            "{fs} must never be classified physical-external"
        );
    }
}

#[tokio::test]
async fn test_linked_swap_marks_the_hosting_volume() {
    let vols = tempdir().unwrap();
    let t5 = vols.path().join("T5");
    std::fs::create_dir(&t5).unwrap();

    let (engine, script, board) = engine_in(vols.path());
    let target = t5.join("private/var/vm/swapfile");
    script.stub(
        "ls -la",
        &format!(
            "lrwxr-xr-x  1 root  wheel  35 Aug 20 10:05 /private/var/vm/swapfile -> {}\n",
            target.display()
        ),
    );

    let volumes = engine.refresh_drives().await.unwrap();
    let hosts: Vec<_> = volumes.iter().filter(|v| v.hosts_swap_file).collect();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].mount_path, t5);

    assert_eq!(board.swap_host().await, Some(t5));
}

#[tokio::test]
async fn test_plain_swap_file_marks_the_system_volume() {
    let vols = tempdir().unwrap();
    std::fs::create_dir(vols.path().join("T5")).unwrap();

    let (engine, script, board) = engine_in(vols.path());
    script.stub(
        "ls -la",
        "-rw-------  1 root  wheel  1073741824 Aug 20 10:00 /private/var/vm/swapfile\n",
    );

    let volumes = engine.refresh_drives().await.unwrap();
    assert!(volumes[0].hosts_swap_file);
    assert!(volumes[1..].iter().all(|v| !v.hosts_swap_file));
    assert_eq!(board.swap_host().await, Some("/".into()));
}

#[tokio::test]
async fn test_unreadable_volumes_directory_aborts_the_refresh() {
    let vols = tempdir().unwrap();
    let missing = vols.path().join("not-there");

    let (engine, script, _board) = engine_in(&missing);
    no_swap_file(&script);

    let err = engine.refresh_drives().await.unwrap_err();
    assert!(matches!(err, EngineError::Unknown(_)));
}

#[tokio::test]
async fn test_broken_volume_entry_is_skipped_not_fatal() {
    let vols = tempdir().unwrap();
    std::fs::create_dir(vols.path().join("Good")).unwrap();
    std::os::unix::fs::symlink("/nonexistent/ghost", vols.path().join("Ghost")).unwrap();

    let (engine, script, board) = engine_in(vols.path());
    no_swap_file(&script);

    let volumes = engine.refresh_drives().await.unwrap();
    let names: Vec<_> = volumes.iter().map(|v| v.mount_path.clone()).collect();
    assert!(names.contains(&vols.path().join("Good")));
    assert!(!names.contains(&vols.path().join("Ghost")));

    let snap = board.snapshot().await;
    assert!(snap.log.iter().any(|e| e.message.contains("skipping")));
}

#[tokio::test]
async fn test_hidden_entries_and_root_aliases_are_ignored() {
    let vols = tempdir().unwrap();
    std::fs::create_dir(vols.path().join(".Trashes")).unwrap();
    std::os::unix::fs::symlink("/", vols.path().join("Macintosh HD")).unwrap();

    let (engine, script, _board) = engine_in(vols.path());
    no_swap_file(&script);

    let volumes = engine.refresh_drives().await.unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0].mount_path, Path::new("/"));
}
