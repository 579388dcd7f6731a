//! Stat information reported for nodes.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};

/// File-type bits for a directory.
pub const S_IFDIR: u32 = 0o040_000;

/// File-type bits for a regular file.
pub const S_IFREG: u32 = 0o100_000;

/// Mask selecting the file-type bits of a mode.
pub const S_IFMT: u32 = 0o170_000;

/// Permission bits given to every node (rwxr-xr-x).
pub const DEFAULT_PERM: u32 = 0o755;

/// Nominal size reported for directories.
pub const DIRECTORY_SIZE: u64 = 1024;

/// Stat attributes of one node.
///
/// `uid`/`gid` are `None` unless metadata pins them; the kernel binding
/// substitutes the mount owner in that case.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatInfo {
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl StatInfo {
    /// Computed defaults for a directory, timestamped now.
    pub fn directory() -> Self {
        Self::now(S_IFDIR | DEFAULT_PERM, 2, DIRECTORY_SIZE)
    }

    /// Computed defaults for a leaf of the given size, timestamped now.
    pub fn file(size: u64) -> Self {
        Self::now(S_IFREG | DEFAULT_PERM, 1, size)
    }

    fn now(mode: u32, nlink: u32, size: u64) -> Self {
        let t = SystemTime::now();
        Self {
            mode,
            nlink,
            size,
            uid: None,
            gid: None,
            atime: t,
            mtime: t,
            ctime: t,
        }
    }

    /// Returns true if the mode describes a directory.
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Permission bits of the mode.
    pub fn perm(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Overrides computed values with `st_*` entries from node metadata.
    ///
    /// Explicit metadata always wins. Entries that are not numbers, and keys
    /// outside the `st_*` set, are left for the extended-attribute view.
    #[must_use]
    pub fn merge_metadata(mut self, metadata: &Map<String, Value>) -> Self {
        for (key, value) in metadata {
            match key.as_str() {
                "st_mode" => set_u32(&mut self.mode, value),
                "st_nlink" => set_u32(&mut self.nlink, value),
                "st_size" => {
                    if let Some(v) = value.as_u64() {
                        self.size = v;
                    }
                }
                "st_uid" => self.uid = as_u32(value).or(self.uid),
                "st_gid" => self.gid = as_u32(value).or(self.gid),
                "st_atime" => set_time(&mut self.atime, value),
                "st_mtime" => set_time(&mut self.mtime, value),
                "st_ctime" => set_time(&mut self.ctime, value),
                _ => {}
            }
        }
        self
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|v| u32::try_from(v).ok())
}

fn set_u32(slot: &mut u32, value: &Value) {
    if let Some(v) = as_u32(value) {
        *slot = v;
    }
}

fn set_time(slot: &mut SystemTime, value: &Value) {
    if let Some(secs) = value.as_f64()
        && secs.is_finite()
        && secs >= 0.0
    {
        *slot = UNIX_EPOCH + Duration::from_secs_f64(secs);
    }
}

/// Filesystem statistics (the tree reports all zeros).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatFs {
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub block_size: u32,
    pub name_max: u32,
    pub fragment_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_directory_defaults() {
        let st = StatInfo::directory();
        assert!(st.is_dir());
        assert_eq!(st.nlink, 2);
        assert_eq!(st.size, DIRECTORY_SIZE);
        assert_eq!(st.perm(), 0o755);
    }

    #[test]
    fn test_file_defaults() {
        let st = StatInfo::file(2);
        assert!(!st.is_dir());
        assert_eq!(st.mode, S_IFREG | 0o755);
        assert_eq!(st.nlink, 1);
        assert_eq!(st.size, 2);
    }

    #[test]
    fn test_metadata_wins() {
        let st = StatInfo::file(2).merge_metadata(&meta(json!({
            "st_size": 1024,
            "st_uid": 1000,
            "st_mtime": 86400.5,
            "st_mode": S_IFREG | 0o444,
        })));
        assert_eq!(st.size, 1024);
        assert_eq!(st.uid, Some(1000));
        assert_eq!(st.gid, None);
        assert_eq!(st.perm(), 0o444);
        assert_eq!(
            st.mtime,
            UNIX_EPOCH + Duration::from_secs_f64(86400.5)
        );
    }

    #[test]
    fn test_non_numeric_metadata_ignored() {
        let st = StatInfo::file(7).merge_metadata(&meta(json!({
            "st_size": "big",
            "st_atime": -3,
            "user.comment": "kept for xattrs",
        })));
        assert_eq!(st.size, 7);
    }
}
