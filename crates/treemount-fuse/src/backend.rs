//! Mounting a [`TreeFS`] on a directory.
//!
//! [`mount_blocking`] serves the tree on the current thread until the kernel
//! unmounts it. [`spawn_mount`] serves it on a background session and
//! returns a [`TreeMountHandle`] that unmounts on drop.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use fuser::{BackgroundSession, MountOption};
use tracing::{debug, info, warn};

use crate::config::MountConfig;
use crate::filesystem::TreeFS;

/// Timeout for graceful session.join() before forcing unmount.
/// Thread may leak on timeout, but this is acceptable vs blocking forever.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long [`spawn_mount`] waits for the mount to become visible.
const MOUNT_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Translates a [`MountConfig`] into fuser mount options.
pub fn mount_options(config: &MountConfig) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName(config.fsname.clone()),
        MountOption::Subtype("treemount".to_string()),
    ];
    if config.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }
    if config.read_only {
        options.push(MountOption::RO);
    }
    options
}

/// Mounts `fs` at `mountpoint` and serves requests until it is unmounted.
pub fn mount_blocking(fs: TreeFS, mountpoint: &Path, config: &MountConfig) -> io::Result<()> {
    info!(mountpoint = %mountpoint.display(), "Mounting tree");
    fuser::mount2(fs, mountpoint, &mount_options(config))?;
    info!(mountpoint = %mountpoint.display(), "Tree unmounted");
    Ok(())
}

/// Mounts `fs` at `mountpoint` on a background session.
///
/// Returns once the mount is visible, so callers can use the mount point
/// immediately.
pub fn spawn_mount(
    fs: TreeFS,
    mountpoint: &Path,
    config: &MountConfig,
) -> io::Result<TreeMountHandle> {
    info!(mountpoint = %mountpoint.display(), "Mounting tree in background");
    let session = fuser::spawn_mount2(fs, mountpoint, &mount_options(config))?;
    let handle = TreeMountHandle {
        session: Some(session),
        mountpoint: mountpoint.to_path_buf(),
    };
    wait_for_mount(mountpoint, MOUNT_TIMEOUT)?;
    Ok(handle)
}

/// Polls until `mount_point` lives on a different device than its parent.
fn wait_for_mount(mount_point: &Path, timeout: Duration) -> io::Result<()> {
    use std::os::unix::fs::MetadataExt;

    let deadline = Instant::now() + timeout;
    let parent = mount_point.parent().unwrap_or(Path::new("/"));

    while Instant::now() < deadline {
        if let (Ok(path_meta), Ok(parent_meta)) =
            (std::fs::metadata(mount_point), std::fs::metadata(parent))
            && path_meta.dev() != parent_meta.dev()
        {
            debug!(
                "FUSE mount confirmed active at {} (dev {} != parent dev {})",
                mount_point.display(),
                path_meta.dev(),
                parent_meta.dev()
            );
            return Ok(());
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    Err(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("FUSE mount did not become ready within {timeout:?}"),
    ))
}

/// Handle to a mounted tree.
///
/// Wraps the fuser `BackgroundSession`. Dropping this handle triggers unmount.
pub struct TreeMountHandle {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
}

impl TreeMountHandle {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Unmounts and waits for the session to finish.
    pub fn unmount(mut self) {
        info!(mountpoint = %self.mountpoint.display(), "Unmounting tree");
        if let Some(session) = self.session.take() {
            // This may block if files are open
            session.join();
        }
        info!(mountpoint = %self.mountpoint.display(), "Unmount successful");
    }

    /// Lazy unmount through the system tool, used when join is stuck.
    fn force_unmount(&self) {
        #[cfg(target_os = "linux")]
        let result = std::process::Command::new("fusermount")
            .arg("-uz")
            .arg(&self.mountpoint)
            .output();
        #[cfg(not(target_os = "linux"))]
        let result = std::process::Command::new("umount")
            .arg("-f")
            .arg(&self.mountpoint)
            .output();

        if let Err(e) = result {
            warn!(error = %e, "Force unmount failed");
        }
    }
}

impl Drop for TreeMountHandle {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        debug!("Unmounting tree at {}", self.mountpoint.display());

        // Spawn thread for potentially blocking join() so we can timeout
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            session.join();
            let _ = tx.send(());
        });

        match rx.recv_timeout(JOIN_TIMEOUT) {
            Ok(()) => debug!("Graceful unmount completed for {}", self.mountpoint.display()),
            Err(_) => {
                warn!(
                    "session.join() timed out after {:?} for {}, forcing unmount",
                    JOIN_TIMEOUT,
                    self.mountpoint.display()
                );
                self.force_unmount();
            }
        }
    }
}
