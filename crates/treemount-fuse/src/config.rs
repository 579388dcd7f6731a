//! Mount configuration for the FUSE filesystem.

use std::time::Duration;

/// Default attribute TTL handed to the kernel.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

/// Default filesystem name shown in the mount table.
pub const DEFAULT_FSNAME: &str = "treemount";

/// Configuration options for the FUSE filesystem.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Time-to-live for attributes and entries cached by the kernel.
    ///
    /// Default: 1 second. Live nodes (monitor, streams) may report a new
    /// size after every open, so this stays short.
    pub attr_ttl: Duration,

    /// Filesystem name (`FSName` mount option).
    pub fsname: String,

    /// Allow users other than the mounting user to access the mount.
    pub allow_other: bool,

    /// Unmount automatically when the process exits.
    ///
    /// Default: true.
    pub auto_unmount: bool,

    /// Mount read-only (`RO` mount option).
    pub read_only: bool,

    /// Owner reported for nodes without an `st_uid` override.
    ///
    /// Default: the mounting process's uid.
    pub uid: u32,

    /// Group reported for nodes without an `st_gid` override.
    pub gid: u32,
}

impl Default for MountConfig {
    fn default() -> Self {
        // SAFETY: getuid/getgid are always successful and have no preconditions.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            attr_ttl: DEFAULT_TTL,
            fsname: DEFAULT_FSNAME.to_string(),
            allow_other: false,
            auto_unmount: true,
            read_only: false,
            uid,
            gid,
        }
    }
}

impl MountConfig {
    /// Sets the attribute TTL.
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    /// Sets the filesystem name.
    #[must_use]
    pub fn fsname(mut self, name: impl Into<String>) -> Self {
        self.fsname = name.into();
        self
    }

    /// Sets whether other users may access the mount.
    #[must_use]
    pub fn allow_other(mut self, allow: bool) -> Self {
        self.allow_other = allow;
        self
    }

    /// Sets whether the mount is removed when the process exits.
    #[must_use]
    pub fn auto_unmount(mut self, auto: bool) -> Self {
        self.auto_unmount = auto;
        self
    }

    /// Sets read-only mounting.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Sets the default owner.
    #[must_use]
    pub fn owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }
}
