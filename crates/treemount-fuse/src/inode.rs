//! Inode management for the FUSE filesystem.
//!
//! The kernel addresses nodes by inode number while the tree is addressed by
//! path. This table maps between the two and tracks the kernel's `nlookup`
//! reference count so entries can be evicted on `forget()`.
//!
//! The tree never changes shape after it is built, so an inode's path is
//! fixed for its lifetime.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::one::Ref;

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// An entry in the inode table.
#[derive(Debug)]
pub struct InodeEntry {
    /// Absolute path of the node within the tree.
    pub path: String,
    /// Lookup count for proper `forget()` handling.
    nlookup: AtomicU64,
}

impl InodeEntry {
    /// Creates an entry with the given initial lookup count.
    fn new(path: String, nlookup: u64) -> Self {
        Self {
            path,
            nlookup: AtomicU64::new(nlookup),
        }
    }

    /// Increments the lookup count and returns the new value.
    pub fn inc_nlookup(&self) -> u64 {
        self.nlookup.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrements the lookup count by `count` and returns the new value.
    /// Returns `None` if the count would go negative.
    pub fn dec_nlookup(&self, count: u64) -> Option<u64> {
        let old = self.nlookup.fetch_sub(count, Ordering::AcqRel);
        if old < count {
            self.nlookup.fetch_add(count, Ordering::Relaxed);
            None
        } else {
            Some(old - count)
        }
    }

    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::Relaxed)
    }
}

/// Thread-safe bidirectional map between inodes and tree paths.
#[derive(Debug)]
pub struct InodeTable {
    by_inode: DashMap<u64, InodeEntry>,
    by_path: DashMap<String, u64>,
    next_inode: AtomicU64,
}

impl InodeTable {
    /// Creates a table with the root directory pre-allocated.
    pub fn new() -> Self {
        let table = Self {
            by_inode: DashMap::new(),
            by_path: DashMap::new(),
            next_inode: AtomicU64::new(ROOT_INODE + 1),
        };
        table
            .by_inode
            .insert(ROOT_INODE, InodeEntry::new("/".to_string(), 1));
        table.by_path.insert("/".to_string(), ROOT_INODE);
        table
    }

    fn get_or_insert_with_count(&self, path: &str, initial: u64, increment: bool) -> u64 {
        if let Some(inode) = self.by_path.get(path).map(|r| *r) {
            if increment && let Some(entry) = self.by_inode.get(&inode) {
                entry.inc_nlookup();
            }
            return inode;
        }
        *self.by_path.entry(path.to_string()).or_insert_with(|| {
            let inode = self.next_inode.fetch_add(1, Ordering::Relaxed);
            self.by_inode
                .insert(inode, InodeEntry::new(path.to_string(), initial));
            inode
        })
    }

    /// Returns the inode for `path`, allocating one if needed, and counts a
    /// kernel lookup on it.
    pub fn get_or_insert(&self, path: &str) -> u64 {
        self.get_or_insert_with_count(path, 1, true)
    }

    /// Returns the inode for `path` without touching its lookup count.
    ///
    /// Entries returned from `readdir()` must not affect nlookup.
    pub fn get_or_insert_no_lookup_inc(&self, path: &str) -> u64 {
        self.get_or_insert_with_count(path, 0, false)
    }

    /// Looks up an entry by inode number.
    pub fn get(&self, inode: u64) -> Option<Ref<'_, u64, InodeEntry>> {
        self.by_inode.get(&inode)
    }

    /// Path of `inode`, if known.
    pub fn path(&self, inode: u64) -> Option<String> {
        self.by_inode.get(&inode).map(|e| e.path.clone())
    }

    /// Looks up an inode by path.
    pub fn get_inode(&self, path: &str) -> Option<u64> {
        self.by_path.get(path).map(|r| *r)
    }

    /// Decrements the lookup count for an inode.
    /// Returns `true` if the count reached zero and the inode was evicted.
    pub fn forget(&self, inode: u64, nlookup: u64) -> bool {
        if inode == ROOT_INODE {
            return false;
        }
        let remaining = self.by_inode.get(&inode).and_then(|e| e.dec_nlookup(nlookup));
        if remaining != Some(0) {
            return false;
        }
        match self.by_inode.remove(&inode) {
            Some((_, entry)) => {
                self.by_path.remove_if(&entry.path, |_, ino| *ino == inode);
                true
            }
            None => false,
        }
    }

    /// Returns the number of inodes currently in the table.
    pub fn len(&self) -> usize {
        self.by_inode.len()
    }

    /// Returns true if the table only contains the root inode.
    pub fn is_empty(&self) -> bool {
        self.by_inode.len() <= 1
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Joins a parent path and a child name.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Parent of an absolute path; the root is its own parent.
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}
