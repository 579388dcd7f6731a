//! Path-based filesystem operations over a built tree.
//!
//! [`Dispatcher`] owns the root node. Each operation resolves its path and
//! forwards to the node contract with the same arguments. Operations that
//! create or remove a directory entry resolve the *parent* and pass the
//! final path segment.

use std::path::Path;
use std::time::SystemTime;

use tracing::trace;

use crate::builder::{BuildContext, build_with};
use crate::error::{NodeResult, SchemaError};
use crate::node::Node;
use crate::spec::NodeSpec;
use crate::stat::{StatFs, StatInfo};

/// Splits `path` into its parent path and final segment.
///
/// Trailing slashes are ignored; the root splits into `/` and an empty name.
fn split_parent(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
        None if trimmed.is_empty() => ("/", ""),
        None => ("/", trimmed),
    }
}

/// Filesystem entry points for one tree.
#[derive(Debug)]
pub struct Dispatcher {
    root: Node,
}

impl Dispatcher {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    /// Builds a tree from `spec` and takes ownership of it.
    pub fn from_spec(spec: &NodeSpec, ctx: &BuildContext) -> Result<Self, SchemaError> {
        Ok(Self::new(build_with(spec, ctx)?))
    }

    /// Reads a spec document from disk and builds its tree.
    pub fn load(path: &Path, ctx: &BuildContext) -> Result<Self, SchemaError> {
        let spec = NodeSpec::from_path(path)?;
        Self::from_spec(&spec, ctx)
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn resolve(&self, path: &str) -> NodeResult<&Node> {
        self.root.resolve(path)
    }

    fn node_mut(&mut self, path: &str) -> NodeResult<&mut Node> {
        self.root.resolve_mut(path)
    }

    /// Every path of the tree, in pre-order.
    pub fn traverse(&self) -> Vec<String> {
        self.root.traverse()
    }

    pub fn getattr(&self, path: &str, fh: Option<u64>) -> NodeResult<StatInfo> {
        trace!(path, "getattr");
        self.resolve(path)?.attributes(fh)
    }

    pub fn readdir(&self, path: &str) -> NodeResult<Vec<String>> {
        trace!(path, "readdir");
        self.resolve(path)?.list()
    }

    pub fn open(&mut self, path: &str, flags: i32) -> NodeResult<u64> {
        trace!(path, flags, "open");
        self.node_mut(path)?.open(flags)
    }

    pub fn read(&mut self, path: &str, size: usize, offset: u64, fh: u64) -> NodeResult<Vec<u8>> {
        self.node_mut(path)?.read(size, offset, fh)
    }

    pub fn write(&mut self, path: &str, buf: &[u8], offset: u64, fh: u64) -> NodeResult<usize> {
        self.node_mut(path)?.write(buf, offset, fh)
    }

    pub fn release(&mut self, path: &str, fh: u64) -> NodeResult<()> {
        trace!(path, fh, "release");
        self.node_mut(path)?.close(fh)
    }

    pub fn truncate(&mut self, path: &str, length: u64) -> NodeResult<()> {
        self.node_mut(path)?.truncate(length)
    }

    pub fn flush(&mut self, path: &str, fh: u64) -> NodeResult<()> {
        self.node_mut(path)?.flush(fh)
    }

    pub fn fsync(&mut self, path: &str, datasync: bool, fh: u64) -> NodeResult<()> {
        self.node_mut(path)?.fsync(datasync, fh)
    }

    pub fn access(&self, path: &str, mask: i32) -> NodeResult<()> {
        self.resolve(path)?.access(mask)
    }

    pub fn chmod(&mut self, path: &str, mode: u32) -> NodeResult<()> {
        self.node_mut(path)?.chmod(mode)
    }

    pub fn chown(&mut self, path: &str, uid: Option<u32>, gid: Option<u32>) -> NodeResult<()> {
        self.node_mut(path)?.chown(uid, gid)
    }

    pub fn utimens(
        &mut self,
        path: &str,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> NodeResult<()> {
        self.node_mut(path)?.utimens(atime, mtime)
    }

    pub fn statfs(&self, path: &str) -> NodeResult<StatFs> {
        self.resolve(path)?.statfs()
    }

    pub fn getxattr(&self, path: &str, name: &str) -> NodeResult<Vec<u8>> {
        self.resolve(path)?.get_xattr(name)
    }

    pub fn setxattr(&mut self, path: &str, name: &str, value: &[u8]) -> NodeResult<()> {
        self.node_mut(path)?.set_xattr(name, value)
    }

    pub fn listxattr(&self, path: &str) -> NodeResult<Vec<String>> {
        self.resolve(path)?.list_xattr()
    }

    pub fn removexattr(&mut self, path: &str, name: &str) -> NodeResult<()> {
        self.node_mut(path)?.remove_xattr(name)
    }

    // Entry operations resolve the parent directory.

    pub fn create(&mut self, path: &str, mode: u32) -> NodeResult<()> {
        let (parent, name) = split_parent(path);
        self.node_mut(parent)?.create(name, mode)
    }

    pub fn mknod(&mut self, path: &str, mode: u32, rdev: u32) -> NodeResult<()> {
        let (parent, name) = split_parent(path);
        self.node_mut(parent)?.mknod(name, mode, rdev)
    }

    pub fn mkdir(&mut self, path: &str, mode: u32) -> NodeResult<()> {
        let (parent, name) = split_parent(path);
        self.node_mut(parent)?.mkdir(name, mode)
    }

    pub fn unlink(&mut self, path: &str) -> NodeResult<()> {
        let (parent, name) = split_parent(path);
        self.node_mut(parent)?.unlink(name)
    }

    pub fn rmdir(&mut self, path: &str) -> NodeResult<()> {
        let (parent, name) = split_parent(path);
        self.node_mut(parent)?.rmdir(name)
    }

    pub fn link(&mut self, target: &str, new_path: &str) -> NodeResult<()> {
        let (parent, name) = split_parent(new_path);
        self.node_mut(parent)?.link(target, name)
    }

    pub fn rename(&mut self, old_path: &str, new_path: &str) -> NodeResult<()> {
        self.node_mut(old_path)?.rename(new_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MonitorState;
    use serde_json::json;
    use std::sync::Arc;

    fn dispatcher() -> Dispatcher {
        let spec = NodeSpec::directory(
            "/",
            vec![
                NodeSpec::literal("a.txt", json!("hi")),
                NodeSpec::directory(
                    "child_dir",
                    vec![NodeSpec::literal("x.json", json!({"k": [1, 2]}))],
                ),
            ],
        );
        let ctx = BuildContext::default().with_monitor(Arc::new(MonitorState::new()));
        Dispatcher::from_spec(&spec, &ctx).unwrap()
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("/a"), ("/", "a"));
        assert_eq!(split_parent("/a/b"), ("/a", "b"));
        assert_eq!(split_parent("/a/b/"), ("/a", "b"));
        assert_eq!(split_parent("a"), ("/", "a"));
        assert_eq!(split_parent("/"), ("/", ""));
    }

    #[test]
    fn test_read_cycle() {
        let mut d = dispatcher();
        assert_eq!(d.getattr("/a.txt", None).unwrap().size, 2);
        let fh = d.open("/a.txt", libc::O_RDONLY).unwrap();
        assert_eq!(d.read("/a.txt", 4096, 0, fh).unwrap(), b"hi");
        d.release("/a.txt", fh).unwrap();
    }

    #[test]
    fn test_readdir() {
        let d = dispatcher();
        assert_eq!(d.readdir("/").unwrap(), vec![".", "..", "a.txt", "child_dir"]);
        assert_eq!(d.readdir("/child_dir").unwrap(), vec![".", "..", "x.json"]);
        assert_eq!(d.readdir("/a.txt").unwrap_err().to_errno(), libc::ENOTDIR);
    }

    #[test]
    fn test_missing_path_is_enoent_everywhere() {
        let mut d = dispatcher();
        assert_eq!(d.getattr("/nope", None).unwrap_err().to_errno(), libc::ENOENT);
        assert_eq!(d.open("/nope", 0).unwrap_err().to_errno(), libc::ENOENT);
        assert_eq!(d.getxattr("/nope", "k").unwrap_err().to_errno(), libc::ENOENT);
        assert_eq!(d.mkdir("/nope/new", 0o755).unwrap_err().to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_entry_ops_resolve_parent() {
        let mut d = dispatcher();
        d.mkdir("/child_dir/new", 0o755).unwrap();
        d.create("/new.txt", 0o644).unwrap();
        d.mknod("/child_dir/fifo", 0o644, 0).unwrap();
        d.unlink("/a.txt").unwrap();
        d.rmdir("/child_dir").unwrap();
        d.link("/a.txt", "/child_dir/a2").unwrap();
        d.rename("/a.txt", "/b.txt").unwrap();
        // Nothing materialized or disappeared.
        assert!(d.resolve("/child_dir/new").is_err());
        assert!(d.resolve("/a.txt").is_ok());
        assert_eq!(d.traverse().len(), 4);
    }

    #[test]
    fn test_xattr_forwarding() {
        let mut d = dispatcher();
        d.setxattr("/child_dir", "user.tag", b"v1").unwrap();
        assert_eq!(d.getxattr("/child_dir", "user.tag").unwrap(), b"v1");
        assert_eq!(d.listxattr("/child_dir").unwrap(), vec!["user.tag"]);
        d.removexattr("/child_dir", "user.tag").unwrap();
        assert!(d.listxattr("/child_dir").unwrap().is_empty());
    }

    #[test]
    fn test_statfs_and_noops() {
        let mut d = dispatcher();
        assert_eq!(d.statfs("/").unwrap(), StatFs::default());
        let fh = d.open("/a.txt", 0).unwrap();
        assert_eq!(d.write("/a.txt", b"zzz", 0, fh).unwrap(), 3);
        d.truncate("/a.txt", 0).unwrap();
        d.flush("/a.txt", fh).unwrap();
        d.fsync("/a.txt", false, fh).unwrap();
        d.chmod("/a.txt", 0o600).unwrap();
        d.chown("/a.txt", Some(1), Some(1)).unwrap();
        d.utimens("/a.txt", None, None).unwrap();
        d.access("/a.txt", libc::R_OK).unwrap();
        assert_eq!(d.read("/a.txt", 10, 0, fh).unwrap(), b"hi");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spec.json");
        std::fs::write(
            &path,
            r#"{"name": "/", "kind": "directory",
                "children": [{"name": "a.txt", "kind": "literal", "data": "hi"}]}"#,
        )
        .unwrap();
        let ctx = BuildContext::default().with_monitor(Arc::new(MonitorState::new()));
        let d = Dispatcher::load(&path, &ctx).unwrap();
        assert_eq!(d.traverse(), vec!["/", "/a.txt"]);
    }
}
