//! FUSE filesystem implementation for declarative trees.
//!
//! This module implements the fuser `Filesystem` trait on top of a
//! [`Dispatcher`]. The kernel speaks inodes, the tree speaks paths; the
//! [`InodeTable`] translates between them.
//!
//! # FUSE Operation Summary
//!
//! | Operation | Behavior |
//! |-----------|----------|
//! | init/destroy | Logs mount lifecycle |
//! | lookup | Resolves the child path, increments nlookup via `get_or_insert` |
//! | forget/batch_forget | Decrements nlookup, evicts at 0 (root never) |
//! | getattr | Node stat with mount owner substituted for unset uid/gid |
//! | setattr | Forwards chmod/chown/truncate/utimens (all no-ops), replies current attrs |
//! | open/release | Node handle tokens; `FOPEN_DIRECT_IO` when size is not exact |
//! | read/write | Forwarded; write discards and reports the full length |
//! | flush/fsync | Forwarded no-ops |
//! | opendir/releasedir | Handle 0, nothing to release |
//! | readdir | Uses `get_or_insert_no_lookup_inc` |
//! | mkdir/mknod/create/link | Forwarded, then EPERM (no node materializes) |
//! | unlink/rmdir/rename | Forwarded, success |
//! | access | Always granted |
//! | statfs | All zeros |
//! | getxattr/listxattr | Node metadata, size-probe protocol |
//! | setxattr/removexattr | Node metadata |

use std::ffi::OsStr;
use std::time::SystemTime;

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr,
    Request, TimeOrNow,
};
use libc::c_int;
use tracing::{debug, info, trace};
use treemount_core::{Dispatcher, StatInfo};

use crate::config::MountConfig;
use crate::error::{FuseError, FuseResult};
use crate::inode::{InodeTable, ROOT_INODE, child_path, parent_path};

/// Block size reported in attributes.
const BLOCK_SIZE: u32 = 4096;

/// Outcome of an xattr request under the size-probe protocol.
#[derive(Debug, PartialEq, Eq)]
pub enum XattrReply {
    /// The caller asked for the size only (`size == 0`).
    Size(u32),
    /// The value fits the caller's buffer.
    Data(Vec<u8>),
}

/// Applies the xattr size-probe protocol to `data`.
///
/// A zero `size` asks for the length; a buffer too small for `data` is
/// ERANGE.
pub fn xattr_reply(data: Vec<u8>, size: u32) -> Result<XattrReply, c_int> {
    let len = u32::try_from(data.len()).map_err(|_| libc::E2BIG)?;
    if size == 0 {
        Ok(XattrReply::Size(len))
    } else if len > size {
        Err(libc::ERANGE)
    } else {
        Ok(XattrReply::Data(data))
    }
}

/// Encodes attribute names as the NUL-separated list `listxattr` expects.
pub fn encode_xattr_names(names: &[String]) -> Vec<u8> {
    let mut out = Vec::with_capacity(names.iter().map(|n| n.len() + 1).sum());
    for name in names {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    out
}

fn time_or_now(t: TimeOrNow) -> SystemTime {
    match t {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

fn name_str(name: &OsStr) -> FuseResult<&str> {
    name.to_str()
        .ok_or_else(|| FuseError::InvalidName(name.to_string_lossy().into_owned()))
}

/// One entry of a directory listing as handed to the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: u64,
    pub kind: FileType,
    pub name: String,
}

/// FUSE filesystem serving one built tree.
pub struct TreeFS {
    dispatcher: Dispatcher,
    inodes: InodeTable,
    config: MountConfig,
}

impl TreeFS {
    /// Creates a filesystem over `dispatcher`.
    pub fn new(dispatcher: Dispatcher, config: MountConfig) -> Self {
        Self {
            dispatcher,
            inodes: InodeTable::new(),
            config,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    fn path_of(&self, ino: u64) -> FuseResult<String> {
        self.inodes.path(ino).ok_or(FuseError::InvalidInode(ino))
    }

    /// Converts node stat info into a kernel attribute record.
    ///
    /// Unset ownership falls back to the mount owner.
    pub fn make_attr(&self, ino: u64, stat: &StatInfo) -> FileAttr {
        let kind = if stat.is_dir() {
            FileType::Directory
        } else {
            FileType::RegularFile
        };
        // Permission bits fit in 12 bits.
        #[allow(clippy::cast_possible_truncation)]
        let perm = stat.perm() as u16;
        FileAttr {
            ino,
            size: stat.size,
            blocks: stat.size.div_ceil(u64::from(BLOCK_SIZE)),
            atime: stat.atime,
            mtime: stat.mtime,
            ctime: stat.ctime,
            crtime: stat.ctime,
            kind,
            perm,
            nlink: stat.nlink,
            uid: stat.uid.unwrap_or(self.config.uid),
            gid: stat.gid.unwrap_or(self.config.gid),
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    /// Attributes of an inode the kernel already knows.
    pub fn attr_of(&self, ino: u64, fh: Option<u64>) -> FuseResult<FileAttr> {
        let path = self.path_of(ino)?;
        let stat = self.dispatcher.getattr(&path, fh)?;
        Ok(self.make_attr(ino, &stat))
    }

    /// Resolves `name` under `parent`, counting a kernel lookup on success.
    pub fn lookup_child(&self, parent: u64, name: &str) -> FuseResult<FileAttr> {
        let path = child_path(&self.path_of(parent)?, name);
        let stat = self.dispatcher.getattr(&path, None)?;
        let ino = self.inodes.get_or_insert(&path);
        Ok(self.make_attr(ino, &stat))
    }

    /// Listing of a directory inode including `.` and `..`.
    pub fn list_dir(&self, ino: u64) -> FuseResult<Vec<DirEntry>> {
        let path = self.path_of(ino)?;
        let names = self.dispatcher.readdir(&path)?;
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let entry = match name.as_str() {
                "." => DirEntry {
                    inode: ino,
                    kind: FileType::Directory,
                    name,
                },
                ".." => DirEntry {
                    inode: if ino == ROOT_INODE {
                        ROOT_INODE
                    } else {
                        self.inodes.get_or_insert_no_lookup_inc(parent_path(&path))
                    },
                    kind: FileType::Directory,
                    name,
                },
                _ => {
                    let child = child_path(&path, &name);
                    let kind = if self.dispatcher.resolve(&child)?.is_dir() {
                        FileType::Directory
                    } else {
                        FileType::RegularFile
                    };
                    DirEntry {
                        inode: self.inodes.get_or_insert_no_lookup_inc(&child),
                        kind,
                        name,
                    }
                }
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Opens the node behind `ino`, returning its handle and `FOPEN_*` flags.
    pub fn open_node(&mut self, ino: u64, flags: i32) -> FuseResult<(u64, u32)> {
        let path = self.path_of(ino)?;
        let direct_io = !self.dispatcher.resolve(&path)?.size_is_exact();
        let fh = self.dispatcher.open(&path, flags)?;
        let open_flags = if direct_io {
            fuser::consts::FOPEN_DIRECT_IO
        } else {
            0
        };
        debug!(path = %path, fh, direct_io, "opened");
        Ok((fh, open_flags))
    }

    pub fn read_node(&mut self, ino: u64, fh: u64, offset: i64, size: u32) -> FuseResult<Vec<u8>> {
        let path = self.path_of(ino)?;
        let offset = u64::try_from(offset)
            .map_err(|_| FuseError::Io(std::io::Error::from_raw_os_error(libc::EINVAL)))?;
        Ok(self.dispatcher.read(&path, size as usize, offset, fh)?)
    }

    pub fn release_node(&mut self, ino: u64, fh: u64) -> FuseResult<()> {
        let path = self.path_of(ino)?;
        self.dispatcher.release(&path, fh)?;
        Ok(())
    }

    /// Forwards the setattr fields and returns the resulting attributes.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_setattr(
        &mut self,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
        fh: Option<u64>,
    ) -> FuseResult<FileAttr> {
        let path = self.path_of(ino)?;
        if let Some(mode) = mode {
            self.dispatcher.chmod(&path, mode)?;
        }
        if uid.is_some() || gid.is_some() {
            self.dispatcher.chown(&path, uid, gid)?;
        }
        if let Some(size) = size {
            self.dispatcher.truncate(&path, size)?;
        }
        if atime.is_some() || mtime.is_some() {
            self.dispatcher.utimens(&path, atime, mtime)?;
        }
        self.attr_of(ino, fh)
    }

    /// Path of `name` under the directory inode `parent`.
    fn entry_path(&self, parent: u64, name: &OsStr) -> FuseResult<String> {
        Ok(child_path(&self.path_of(parent)?, name_str(name)?))
    }

    pub fn get_xattr(&self, ino: u64, name: &OsStr) -> FuseResult<Vec<u8>> {
        let path = self.path_of(ino)?;
        Ok(self.dispatcher.getxattr(&path, name_str(name)?)?)
    }

    pub fn list_xattr(&self, ino: u64) -> FuseResult<Vec<u8>> {
        let path = self.path_of(ino)?;
        Ok(encode_xattr_names(&self.dispatcher.listxattr(&path)?))
    }

    fn reply_xattr(result: FuseResult<Vec<u8>>, size: u32, reply: ReplyXattr) {
        match result.map_err(|e| e.to_errno()).and_then(|data| xattr_reply(data, size)) {
            Ok(XattrReply::Size(len)) => reply.size(len),
            Ok(XattrReply::Data(data)) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn reply_empty(result: FuseResult<()>, reply: ReplyEmpty) {
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}

impl Filesystem for TreeFS {
    fn init(&mut self, _req: &Request<'_>, config: &mut KernelConfig) -> Result<(), c_int> {
        info!(nodes = self.dispatcher.traverse().len(), "FUSE filesystem initialized");
        // Enable async reads for concurrent readers
        config.add_capabilities(fuser::consts::FUSE_ASYNC_READ).ok();
        Ok(())
    }

    fn destroy(&mut self) {
        info!("FUSE filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent = parent, name = name, "lookup");

        match self.lookup_child(parent, name) {
            Ok(attr) => reply.entry(&self.config.attr_ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(inode = ino, nlookup = nlookup, "forget");
        self.inodes.forget(ino, nlookup);
    }

    fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        trace!(count = nodes.len(), "batch_forget");
        for node in nodes {
            self.inodes.forget(node.nodeid, node.nlookup);
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        trace!(inode = ino, "getattr");
        match self.attr_of(ino, fh) {
            Ok(attr) => reply.attr(&self.config.attr_ttl, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        trace!(inode = ino, ?mode, ?uid, ?gid, ?size, "setattr");
        let atime = atime.map(time_or_now);
        let mtime = mtime.map(time_or_now);
        match self.apply_setattr(ino, mode, uid, gid, size, atime, mtime, fh) {
            Ok(attr) => reply.attr(&self.config.attr_ttl, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, flags = flags, "open");
        match self.open_node(ino, flags) {
            Ok((fh, open_flags)) => reply.opened(fh, open_flags),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(inode = ino, fh = fh, offset = offset, size = size, "read");
        match self.read_node(ino, fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(inode = ino, fh = fh, offset = offset, size = data.len(), "write");
        let result = self.path_of(ino).and_then(|path| {
            let offset = u64::try_from(offset).unwrap_or_default();
            Ok(self.dispatcher.write(&path, data, offset, fh)?)
        });
        match result {
            // Kernel write requests are bounded by max_write, well below u32::MAX
            #[allow(clippy::cast_possible_truncation)]
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, fh = fh, "release");
        Self::reply_empty(self.release_node(ino, fh), reply);
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        trace!(inode = ino, fh = fh, "flush");
        let result = self
            .path_of(ino)
            .and_then(|path| Ok(self.dispatcher.flush(&path, fh)?));
        Self::reply_empty(result, reply);
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        trace!(inode = ino, fh = fh, datasync = datasync, "fsync");
        let result = self
            .path_of(ino)
            .and_then(|path| Ok(self.dispatcher.fsync(&path, datasync, fh)?));
        Self::reply_empty(result, reply);
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, "opendir");
        let result = self.path_of(ino).and_then(|path| {
            if !self.dispatcher.resolve(&path)?.is_dir() {
                return Err(FuseError::Io(std::io::Error::from_raw_os_error(
                    libc::ENOTDIR,
                )));
            }
            Ok(self.dispatcher.open(&path, flags)?)
        });
        match result {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(inode = ino, offset = offset, "readdir");
        let entries = match self.list_dir(ino) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        let skip = usize::try_from(offset).unwrap_or_default();
        for (i, entry) in entries.iter().enumerate().skip(skip) {
            // Offsets are entry indices; a listing never approaches i64::MAX
            #[allow(clippy::cast_possible_wrap)]
            let next_offset = (i + 1) as i64;
            // buffer.add returns true if buffer is full
            if reply.add(entry.inode, next_offset, entry.kind, &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        trace!(inode = ino, mask = mask, "access");
        let result = self
            .path_of(ino)
            .and_then(|path| Ok(self.dispatcher.access(&path, mask)?));
        Self::reply_empty(result, reply);
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let path = self.inodes.path(ino).unwrap_or_else(|| "/".to_string());
        match self.dispatcher.statfs(&path) {
            Ok(st) => reply.statfs(
                st.blocks,
                st.blocks_free,
                st.blocks_available,
                st.files,
                st.files_free,
                st.block_size,
                st.name_max,
                st.fragment_size,
            ),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent = parent, name = ?name, "mknod");
        let result = self
            .entry_path(parent, name)
            .and_then(|path| Ok(self.dispatcher.mknod(&path, mode, rdev)?));
        match result {
            // No node materializes, so there is no entry to return
            Ok(()) => reply.error(libc::EPERM),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent = parent, name = ?name, "mkdir");
        let result = self
            .entry_path(parent, name)
            .and_then(|path| Ok(self.dispatcher.mkdir(&path, mode)?));
        match result {
            Ok(()) => reply.error(libc::EPERM),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        trace!(parent = parent, name = ?name, "create");
        let result = self
            .entry_path(parent, name)
            .and_then(|path| Ok(self.dispatcher.create(&path, mode)?));
        match result {
            Ok(()) => reply.error(libc::EPERM),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        trace!(inode = ino, newparent = newparent, newname = ?newname, "link");
        let result = self.path_of(ino).and_then(|target| {
            let new_path = self.entry_path(newparent, newname)?;
            Ok(self.dispatcher.link(&target, &new_path)?)
        });
        match result {
            Ok(()) => reply.error(libc::EPERM),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent = parent, name = ?name, "unlink");
        let result = self
            .entry_path(parent, name)
            .and_then(|path| Ok(self.dispatcher.unlink(&path)?));
        Self::reply_empty(result, reply);
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent = parent, name = ?name, "rmdir");
        let result = self
            .entry_path(parent, name)
            .and_then(|path| Ok(self.dispatcher.rmdir(&path)?));
        Self::reply_empty(result, reply);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        trace!(parent = parent, name = ?name, newparent = newparent, newname = ?newname, "rename");
        let result = self.entry_path(parent, name).and_then(|old_path| {
            let new_path = self.entry_path(newparent, newname)?;
            Ok(self.dispatcher.rename(&old_path, &new_path)?)
        });
        Self::reply_empty(result, reply);
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        trace!(inode = ino, name = ?name, size = size, "getxattr");
        Self::reply_xattr(self.get_xattr(ino, name), size, reply);
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, name = ?name, len = value.len(), "setxattr");
        let result = self.path_of(ino).and_then(|path| {
            let name = name_str(name)?;
            Ok(self.dispatcher.setxattr(&path, name, value)?)
        });
        Self::reply_empty(result, reply);
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        trace!(inode = ino, size = size, "listxattr");
        Self::reply_xattr(self.list_xattr(ino), size, reply);
    }

    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(inode = ino, name = ?name, "removexattr");
        let result = self.path_of(ino).and_then(|path| {
            let name = name_str(name)?;
            Ok(self.dispatcher.removexattr(&path, name)?)
        });
        Self::reply_empty(result, reply);
    }
}
