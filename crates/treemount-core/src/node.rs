//! Tree nodes and the uniform per-node operation contract.
//!
//! A [`Node`] is either a directory holding ordered, uniquely named children
//! or a leaf holding one [`StreamBackend`]. Every node answers the same set of
//! filesystem operations; directories and leaves differ only in what those
//! operations do.
//!
//! # Handles
//!
//! A leaf has at most one open handle. Tokens come from a process-wide
//! counter that starts at 1, so a token identifies exactly one open of one
//! node. Opening a leaf that is already open releases the previous resource
//! first; the earlier token becomes stale and reads through it fail with
//! [`NodeError::StaleHandle`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::error::{NodeError, NodeResult, SchemaError};
use crate::stat::{StatFs, StatInfo};
use crate::stream::StreamBackend;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn next_handle() -> u64 {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

/// Splits a path into lookup segments, skipping empty and `.` segments.
pub(crate) fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".")
}

/// Leaf state: the backend and its current handle.
#[derive(Debug)]
struct Leaf {
    backend: Box<dyn StreamBackend>,
    handle: Option<u64>,
}

#[derive(Debug)]
enum Content {
    Directory(IndexMap<String, Node>),
    Leaf(Leaf),
}

/// One element of the tree.
#[derive(Debug)]
pub struct Node {
    name: String,
    kind: &'static str,
    metadata: Map<String, Value>,
    content: Content,
}

impl Node {
    /// Creates an empty directory.
    pub fn directory(name: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            kind: "directory",
            metadata,
            content: Content::Directory(IndexMap::new()),
        }
    }

    /// Creates a leaf served by `backend`.
    pub fn leaf(
        name: impl Into<String>,
        kind: &'static str,
        metadata: Map<String, Value>,
        backend: Box<dyn StreamBackend>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            metadata,
            content: Content::Leaf(Leaf {
                backend,
                handle: None,
            }),
        }
    }

    /// Appends a child, keeping insertion order. Sibling names are unique.
    pub fn add_child(&mut self, child: Node) -> Result<(), SchemaError> {
        let Content::Directory(children) = &mut self.content else {
            return Err(SchemaError::RootNotDirectory {
                kind: self.kind.to_string(),
            });
        };
        if children.contains_key(&child.name) {
            return Err(SchemaError::DuplicateChild {
                parent: self.name.clone(),
                name: child.name,
            });
        }
        children.insert(child.name.clone(), child);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical kind tag (`"directory"`, `"literal"`, ...).
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.content, Content::Directory(_))
    }

    /// Children in listing order; empty for leaves.
    pub fn children(&self) -> impl Iterator<Item = &Node> {
        let children = match &self.content {
            Content::Directory(children) => Some(children.values()),
            Content::Leaf(_) => None,
        };
        children.into_iter().flatten()
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        match &self.content {
            Content::Directory(children) => children.get(name),
            Content::Leaf(_) => None,
        }
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        match &mut self.content {
            Content::Directory(children) => children.get_mut(name),
            Content::Leaf(_) => None,
        }
    }

    /// Returns true while a leaf holds an open handle.
    pub fn is_open(&self) -> bool {
        matches!(&self.content, Content::Leaf(leaf) if leaf.handle.is_some())
    }

    /// Returns false for leaves whose reported size may not bound their reads.
    pub fn size_is_exact(&self) -> bool {
        match &self.content {
            Content::Directory(_) => true,
            Content::Leaf(leaf) => leaf.backend.size_is_exact(),
        }
    }

    // ---- resolution ----

    /// Finds the node at `path`, relative to this node.
    ///
    /// Leading, trailing and repeated slashes and `.` segments are ignored,
    /// so `""`, `"/"` and `"."` all name this node.
    pub fn resolve(&self, path: &str) -> NodeResult<&Node> {
        let mut node = self;
        for segment in segments(path) {
            node = node
                .child(segment)
                .ok_or_else(|| NodeError::not_found(path))?;
        }
        Ok(node)
    }

    /// Mutable variant of [`resolve`](Self::resolve).
    pub fn resolve_mut(&mut self, path: &str) -> NodeResult<&mut Node> {
        let mut node = self;
        for segment in segments(path) {
            node = node
                .child_mut(segment)
                .ok_or_else(|| NodeError::not_found(path))?;
        }
        Ok(node)
    }

    /// Every node of the subtree in pre-order, paired with its absolute path
    /// (this node is `/`).
    pub fn walk(&self) -> Vec<(String, &Node)> {
        let mut out = Vec::new();
        self.walk_into(String::from("/"), &mut out);
        out
    }

    fn walk_into<'a>(&'a self, path: String, out: &mut Vec<(String, &'a Node)>) {
        out.push((path.clone(), self));
        for child in self.children() {
            let child_path = if path == "/" {
                format!("/{}", child.name)
            } else {
                format!("{path}/{}", child.name)
            };
            child.walk_into(child_path, out);
        }
    }

    /// Absolute paths of every node of the subtree, in pre-order.
    pub fn traverse(&self) -> Vec<String> {
        self.walk().into_iter().map(|(path, _)| path).collect()
    }

    // ---- attributes ----

    /// Stat info: computed defaults overridden by `st_*` metadata.
    pub fn attributes(&self, _handle: Option<u64>) -> NodeResult<StatInfo> {
        let computed = match &self.content {
            Content::Directory(_) => StatInfo::directory(),
            Content::Leaf(leaf) => StatInfo::file(leaf.backend.size()),
        };
        Ok(computed.merge_metadata(&self.metadata))
    }

    /// Directory listing: `.`, `..`, then children in insertion order.
    pub fn list(&self) -> NodeResult<Vec<String>> {
        match &self.content {
            Content::Directory(children) => {
                let mut names = Vec::with_capacity(children.len() + 2);
                names.push(".".to_string());
                names.push("..".to_string());
                names.extend(children.keys().cloned());
                Ok(names)
            }
            Content::Leaf(_) => Err(NodeError::NotADirectory {
                name: self.name.clone(),
            }),
        }
    }

    pub fn statfs(&self) -> NodeResult<StatFs> {
        Ok(StatFs::default())
    }

    // ---- handle lifecycle ----

    /// Opens the node and returns its handle token (0 for directories).
    pub fn open(&mut self, flags: i32) -> NodeResult<u64> {
        let Content::Leaf(leaf) = &mut self.content else {
            return Ok(0);
        };
        if let Some(previous) = leaf.handle.take() {
            warn!(
                node = %self.name,
                handle = previous,
                "node already open; releasing previous handle"
            );
            if let Err(e) = leaf.backend.close() {
                warn!(node = %self.name, error = %e, "release of previous handle failed");
            }
        }
        leaf.backend.open(flags)?;
        let handle = next_handle();
        leaf.handle = Some(handle);
        debug!(node = %self.name, kind = self.kind, handle, "opened");
        Ok(handle)
    }

    /// Reads up to `length` bytes through `handle`.
    pub fn read(&mut self, length: usize, offset: u64, handle: u64) -> NodeResult<Vec<u8>> {
        let Content::Leaf(leaf) = &mut self.content else {
            return Ok(Vec::new());
        };
        match leaf.handle {
            None => Err(NodeError::NotOpen {
                name: self.name.clone(),
            }),
            Some(current) if current != handle => Err(NodeError::StaleHandle {
                name: self.name.clone(),
                handle,
            }),
            Some(_) => {
                trace!(node = %self.name, length, offset, handle, "read");
                leaf.backend.read(length, offset)
            }
        }
    }

    /// Accepts and discards `buf`; the tree is read-only in content.
    pub fn write(&mut self, buf: &[u8], offset: u64, handle: u64) -> NodeResult<usize> {
        trace!(node = %self.name, len = buf.len(), offset, handle, "write discarded");
        Ok(buf.len())
    }

    /// Releases `handle`. Tokens that are not current are ignored.
    pub fn close(&mut self, handle: u64) -> NodeResult<()> {
        let Content::Leaf(leaf) = &mut self.content else {
            return Ok(());
        };
        if leaf.handle != Some(handle) {
            trace!(node = %self.name, handle, "close of stale handle ignored");
            return Ok(());
        }
        leaf.handle = None;
        debug!(node = %self.name, handle, "closed");
        leaf.backend.close()
    }

    // ---- permissive no-ops ----

    pub fn truncate(&mut self, length: u64) -> NodeResult<()> {
        trace!(node = %self.name, length, "truncate ignored");
        Ok(())
    }

    pub fn flush(&mut self, handle: u64) -> NodeResult<()> {
        trace!(node = %self.name, handle, "flush");
        Ok(())
    }

    pub fn fsync(&mut self, datasync: bool, handle: u64) -> NodeResult<()> {
        trace!(node = %self.name, datasync, handle, "fsync");
        Ok(())
    }

    pub fn access(&self, mask: i32) -> NodeResult<()> {
        trace!(node = %self.name, mask, "access");
        Ok(())
    }

    pub fn chmod(&mut self, mode: u32) -> NodeResult<()> {
        trace!(node = %self.name, mode, "chmod ignored");
        Ok(())
    }

    pub fn chown(&mut self, uid: Option<u32>, gid: Option<u32>) -> NodeResult<()> {
        trace!(node = %self.name, ?uid, ?gid, "chown ignored");
        Ok(())
    }

    pub fn utimens(
        &mut self,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> NodeResult<()> {
        trace!(node = %self.name, ?atime, ?mtime, "utimens ignored");
        Ok(())
    }

    /// Entry creation is accepted but nothing materializes.
    pub fn create(&mut self, name: &str, mode: u32) -> NodeResult<()> {
        trace!(parent = %self.name, name, mode, "create ignored");
        Ok(())
    }

    pub fn mknod(&mut self, name: &str, mode: u32, rdev: u32) -> NodeResult<()> {
        trace!(parent = %self.name, name, mode, rdev, "mknod ignored");
        Ok(())
    }

    pub fn mkdir(&mut self, name: &str, mode: u32) -> NodeResult<()> {
        trace!(parent = %self.name, name, mode, "mkdir ignored");
        Ok(())
    }

    pub fn unlink(&mut self, name: &str) -> NodeResult<()> {
        trace!(parent = %self.name, name, "unlink ignored");
        Ok(())
    }

    pub fn rmdir(&mut self, name: &str) -> NodeResult<()> {
        trace!(parent = %self.name, name, "rmdir ignored");
        Ok(())
    }

    pub fn link(&mut self, target: &str, name: &str) -> NodeResult<()> {
        trace!(parent = %self.name, target, name, "link ignored");
        Ok(())
    }

    pub fn rename(&mut self, new_path: &str) -> NodeResult<()> {
        trace!(node = %self.name, new_path, "rename ignored");
        Ok(())
    }

    // ---- extended attributes ----

    /// Metadata entry `name`: strings raw, other values as compact JSON.
    pub fn get_xattr(&self, name: &str) -> NodeResult<Vec<u8>> {
        let value = self
            .metadata
            .get(name)
            .ok_or_else(|| NodeError::NoAttribute {
                name: name.to_string(),
            })?;
        match value {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            other => Ok(serde_json::to_vec(other).map_err(std::io::Error::from)?),
        }
    }

    /// Inserts or overwrites a metadata entry. UTF-8 values are stored as
    /// strings, anything else as an array of bytes.
    pub fn set_xattr(&mut self, name: &str, value: &[u8]) -> NodeResult<()> {
        let value = match std::str::from_utf8(value) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::Array(value.iter().map(|b| Value::from(*b)).collect()),
        };
        debug!(node = %self.name, attr = name, "xattr set");
        self.metadata.insert(name.to_string(), value);
        Ok(())
    }

    /// Metadata keys.
    pub fn list_xattr(&self) -> NodeResult<Vec<String>> {
        Ok(self.metadata.keys().cloned().collect())
    }

    pub fn remove_xattr(&mut self, name: &str) -> NodeResult<()> {
        self.metadata
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| NodeError::NoAttribute {
                name: name.to_string(),
            })
    }
}
