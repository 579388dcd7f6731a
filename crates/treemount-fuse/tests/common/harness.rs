//! Test mount harness for FUSE integration tests.
//!
//! Provides `TestMount`, which builds a tree from a JSON spec, mounts it on
//! a temporary directory and unmounts it on drop.

// Not all tests use all TestMount methods
#![allow(dead_code)]

use std::ffi::CString;
use std::fs::{self, File, Metadata};
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use treemount_core::{BuildContext, Dispatcher, MonitorState, NodeSpec};
use treemount_fuse::{MountConfig, TreeFS, TreeMountHandle, spawn_mount};

/// A mounted tree for testing.
pub struct TestMount {
    /// Unmounts on drop.
    _handle: TreeMountHandle,
    /// Path where the tree is mounted.
    pub mount_path: PathBuf,
    /// Temporary mount point directory.
    _temp_mount: TempDir,
}

impl TestMount {
    /// Builds and mounts the tree described by `spec`.
    pub fn from_json(spec: &serde_json::Value) -> Result<Self, String> {
        let spec = NodeSpec::from_json_str(&spec.to_string())
            .map_err(|e| format!("Invalid spec: {e}"))?;

        let temp_mount = TempDir::new().map_err(|e| format!("Failed to create temp dir: {e}"))?;
        let mount_path = temp_mount.path().join("mnt");
        fs::create_dir(&mount_path).map_err(|e| format!("Failed to create mount point: {e}"))?;

        let ctx = BuildContext::default()
            .with_monitor(Arc::new(MonitorState::new()))
            .with_mount_point(&mount_path);
        let dispatcher =
            Dispatcher::from_spec(&spec, &ctx).map_err(|e| format!("Failed to build tree: {e}"))?;

        let config = MountConfig::default().fsname("treemount-test");
        let handle = spawn_mount(TreeFS::new(dispatcher, config.clone()), &mount_path, &config)
            .map_err(|e| format!("Failed to mount: {e}"))?;

        Ok(Self {
            _handle: handle,
            mount_path,
            _temp_mount: temp_mount,
        })
    }

    /// Build a full path from a relative path.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.mount_path.join(relative.trim_start_matches('/'))
    }

    /// Read a file's contents.
    pub fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let mut content = Vec::new();
        File::open(self.path(path))?.read_to_end(&mut content)?;
        Ok(content)
    }

    /// Get file metadata.
    pub fn metadata(&self, path: &str) -> io::Result<Metadata> {
        fs::metadata(self.path(path))
    }

    /// List directory entries (names only), in the order the kernel returns.
    pub fn list(&self, path: &str) -> io::Result<Vec<String>> {
        let entries = fs::read_dir(self.path(path))?;
        let names: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        Ok(names)
    }

    /// Read an extended attribute with the size-probe protocol.
    #[cfg(target_os = "linux")]
    pub fn xattr(&self, path: &str, name: &str) -> io::Result<Vec<u8>> {
        getxattr(&self.path(path), name)
    }
}

fn cstring(bytes: &[u8]) -> io::Result<CString> {
    CString::new(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// `getxattr(2)`: probe the size, then fetch the value.
#[cfg(target_os = "linux")]
pub fn getxattr(path: &Path, name: &str) -> io::Result<Vec<u8>> {
    let path = cstring(path.as_os_str().as_bytes())?;
    let name = cstring(name.as_bytes())?;

    // SAFETY: both strings are NUL-terminated; a null buffer with size 0 is a size probe.
    let len = unsafe { libc::getxattr(path.as_ptr(), name.as_ptr(), std::ptr::null_mut(), 0) };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }
    let mut buf = vec![0u8; len.unsigned_abs()];
    // SAFETY: buf is valid for buf.len() bytes.
    let len = unsafe {
        libc::getxattr(
            path.as_ptr(),
            name.as_ptr(),
            buf.as_mut_ptr().cast(),
            buf.len(),
        )
    };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }
    buf.truncate(len.unsigned_abs());
    Ok(buf)
}

/// Check if FUSE is available on this system.
pub fn fuse_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
            || Path::new("/Library/Filesystems/osxfuse.fs").exists()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        false
    }
}

/// Skip test if FUSE is not available.
#[macro_export]
macro_rules! skip_if_no_fuse {
    () => {
        if !$crate::common::harness::fuse_available() {
            eprintln!("Skipping test: FUSE not available on this system");
            return;
        }
    };
}

/// Skip test if mounting fails (common in CI environments).
#[macro_export]
macro_rules! require_mount {
    ($mount_result:expr) => {
        match $mount_result {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Skipping test: {}", e);
                return;
            }
        }
    };
}
