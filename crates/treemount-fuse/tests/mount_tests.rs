//! Mounted-tree tests through the kernel.
//!
//! Run: `cargo nextest run -p treemount-fuse --features fuse-tests mount_tests`

#![cfg(all(unix, feature = "fuse-tests"))]

mod common;

use std::fs;
use std::io::Write;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::time::{Duration, Instant};

#[allow(unused_imports)]
use common::*;
use serde_json::json;

fn sample() -> serde_json::Value {
    json!({
        "name": "/",
        "kind": "directory",
        "children": [
            {"name": "a.txt", "kind": "literal", "data": "hello"},
            {"name": "sub", "kind": "d", "metadata": {"user.owner": "ops"}, "children": [
                {"name": "n.json", "kind": "literal", "data": {"k": [1, 2]}},
                {"name": "z", "kind": "literal", "data": null}
            ]}
        ]
    })
}

#[test]
fn test_listing_and_read() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::from_json(&sample()));

    let mut names = mount.list("/").unwrap();
    names.sort();
    assert_eq!(names, ["a.txt", "sub"]);

    assert_eq!(mount.read("a.txt").unwrap(), b"hello");
    assert_eq!(mount.read("sub/n.json").unwrap(), br#"{"k":[1,2]}"#);
    assert_eq!(mount.read("sub/z").unwrap(), b"null");
}

#[test]
fn test_stat_defaults() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::from_json(&sample()));

    let file = mount.metadata("a.txt").unwrap();
    assert!(file.is_file());
    assert_eq!(file.len(), 5);
    assert_eq!(file.permissions().mode() & 0o7777, 0o755);
    assert_eq!(file.nlink(), 1);

    let dir = mount.metadata("sub").unwrap();
    assert!(dir.is_dir());
    assert_eq!(dir.nlink(), 2);
    // SAFETY: getuid has no preconditions.
    assert_eq!(dir.uid(), unsafe { libc::getuid() });
}

#[test]
fn test_missing_entry_is_enoent() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::from_json(&sample()));

    let err = mount.read("nope").unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
}

#[test]
fn test_structure_is_immutable() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::from_json(&sample()));

    let err = fs::create_dir(mount.path("new")).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EPERM));

    let err = fs::File::create(mount.path("new.txt")).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EPERM));

    // Removal is acknowledged but the node stays.
    fs::remove_file(mount.path("a.txt")).unwrap();
    assert_eq!(mount.read("a.txt").unwrap(), b"hello");
}

#[test]
fn test_write_is_accepted() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::from_json(&sample()));

    let mut file = fs::OpenOptions::new()
        .write(true)
        .open(mount.path("a.txt"))
        .unwrap();
    file.write_all(b"xyz").unwrap();
}

#[cfg(target_os = "linux")]
#[test]
fn test_metadata_as_xattr() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::from_json(&sample()));

    assert_eq!(mount.xattr("sub", "user.owner").unwrap(), b"ops");
    let err = mount.xattr("sub", "user.none").unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENODATA));
}

#[test]
fn test_process_output_through_mount() {
    skip_if_no_fuse!();
    let scratch = tempfile::tempdir().unwrap();
    let spec = json!({
        "name": "/",
        "kind": "directory",
        "children": [{
            "name": "out",
            "kind": "process",
            "command": "printf 'line one\\nline two\\n'",
            "fifo-path": scratch.path().join("out.fifo"),
        }]
    });
    let mount = require_mount!(TestMount::from_json(&spec));

    // Size is unknown up front; direct I/O lets the read run past it.
    assert_eq!(mount.metadata("out").unwrap().len(), 0);
    assert_eq!(mount.read("out").unwrap(), b"line one\nline two\n");

    // release() arrives asynchronously after close(2).
    let fifo = scratch.path().join("out.fifo");
    let deadline = Instant::now() + Duration::from_secs(5);
    while fifo.exists() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(!fifo.exists());
}

#[test]
fn test_passthrough_through_mount() {
    skip_if_no_fuse!();
    let mut source = tempfile::NamedTempFile::new().unwrap();
    source.write_all(b"backing bytes").unwrap();
    source.flush().unwrap();

    let spec = json!({
        "name": "/",
        "kind": "directory",
        "children": [{"name": "f", "kind": "file", "source-path": source.path()}]
    });
    let mount = require_mount!(TestMount::from_json(&spec));

    assert_eq!(mount.metadata("f").unwrap().len(), 13);
    assert_eq!(mount.read("f").unwrap(), b"backing bytes");
}

#[cfg(target_os = "linux")]
#[test]
fn test_blocking_mount_returns_after_unmount() {
    use std::sync::Arc;
    use treemount_core::{BuildContext, Dispatcher, MonitorState, NodeSpec};
    use treemount_fuse::{MountConfig, TreeFS, mount_blocking};

    skip_if_no_fuse!();
    let temp = tempfile::tempdir().unwrap();
    let mount_path = temp.path().join("mnt");
    fs::create_dir(&mount_path).unwrap();

    let spec = NodeSpec::from_json_str(&sample().to_string()).unwrap();
    let ctx = BuildContext::default().with_monitor(Arc::new(MonitorState::new()));
    let dispatcher = Dispatcher::from_spec(&spec, &ctx).unwrap();
    let config = MountConfig::default().fsname("treemount-test");

    let target = mount_path.clone();
    let server = std::thread::spawn(move || {
        mount_blocking(TreeFS::new(dispatcher, config.clone()), &target, &config)
    });

    let parent_dev = fs::metadata(temp.path()).unwrap().dev();
    let deadline = Instant::now() + Duration::from_secs(5);
    while fs::metadata(&mount_path).map(|m| m.dev()).unwrap_or(parent_dev) == parent_dev {
        if Instant::now() > deadline || server.is_finished() {
            eprintln!("Skipping test: blocking mount did not come up");
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(fs::read(mount_path.join("a.txt")).unwrap(), b"hello");

    let status = std::process::Command::new("fusermount")
        .arg("-u")
        .arg(&mount_path)
        .status()
        .unwrap();
    assert!(status.success());
    server.join().unwrap().unwrap();
}
