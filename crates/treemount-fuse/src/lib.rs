//! FUSE filesystem for declarative JSON trees.
//!
//! This crate mounts a tree built by `treemount-core` through the kernel's
//! FUSE interface. Inodes are mapped to tree paths and every callback is
//! forwarded to the tree's [`Dispatcher`](treemount_core::Dispatcher).
//!
//! # Usage
//!
//! ```ignore
//! use treemount_core::{BuildContext, Dispatcher};
//! use treemount_fuse::{MountConfig, TreeFS, spawn_mount};
//!
//! let dispatcher = Dispatcher::load(spec_path, &BuildContext::default())?;
//! let config = MountConfig::default();
//! let handle = spawn_mount(TreeFS::new(dispatcher, config.clone()), mountpoint, &config)?;
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod inode;

pub use backend::{TreeMountHandle, mount_blocking, mount_options, spawn_mount};
pub use config::MountConfig;
pub use error::{FuseError, FuseResult, ToErrno};
pub use filesystem::TreeFS;
pub use inode::{InodeEntry, InodeTable, ROOT_INODE};
