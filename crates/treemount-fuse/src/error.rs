//! Error handling and mapping for the FUSE filesystem.
//!
//! Tree operations already carry their POSIX code through
//! [`NodeError::to_errno`]; this module adds the adapter's own failures
//! (unknown inodes, names that are not UTF-8) and a common [`ToErrno`] trait.

use std::io;

use thiserror::Error;
use treemount_core::NodeError;
use treemount_core::error::io_error_to_errno;

/// FUSE-specific errors that can occur during filesystem operations.
#[derive(Debug, Error)]
pub enum FuseError {
    /// Tree operation error (boxed to reduce enum size).
    #[error("Tree operation failed: {0}")]
    Node(Box<NodeError>),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The kernel referenced an inode the table does not know.
    #[error("Invalid inode: {0}")]
    InvalidInode(u64),

    /// A name passed by the kernel is not valid UTF-8.
    #[error("Invalid name: {0}")]
    InvalidName(String),
}

impl FuseError {
    /// Converts this error to a libc error code for FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            FuseError::Node(e) => e.to_errno(),
            FuseError::Io(e) => io_error_to_errno(e),
            FuseError::InvalidInode(_) => libc::ENOENT,
            FuseError::InvalidName(_) => libc::EINVAL,
        }
    }
}

impl From<NodeError> for FuseError {
    fn from(e: NodeError) -> Self {
        FuseError::Node(Box::new(e))
    }
}

/// Result type for FUSE operations.
pub type FuseResult<T> = Result<T, FuseError>;

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    /// Converts this error to a libc error code.
    fn to_errno(&self) -> i32;
}

impl ToErrno for NodeError {
    fn to_errno(&self) -> i32 {
        NodeError::to_errno(self)
    }
}

impl ToErrno for FuseError {
    fn to_errno(&self) -> i32 {
        FuseError::to_errno(self)
    }
}

impl ToErrno for io::Error {
    fn to_errno(&self) -> i32 {
        io_error_to_errno(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_errors() {
        assert_eq!(FuseError::InvalidInode(42).to_errno(), libc::ENOENT);
        assert_eq!(
            FuseError::InvalidName("\u{fffd}".to_string()).to_errno(),
            libc::EINVAL
        );
    }

    #[test]
    fn test_node_errors_pass_through() {
        let e: FuseError = NodeError::NotADirectory { name: "a".into() }.into();
        assert_eq!(e.to_errno(), libc::ENOTDIR);

        let e: FuseError = NodeError::NoAttribute {
            name: "user.x".into(),
        }
        .into();
        assert_eq!(e.to_errno(), libc::ENODATA);
    }

    #[test]
    fn test_io_error_mapping() {
        let e = io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(ToErrno::to_errno(&e), libc::EACCES);

        let e = io::Error::other("custom error");
        assert_eq!(ToErrno::to_errno(&e), libc::EIO);

        let e: FuseError = io::Error::from_raw_os_error(libc::ENOSPC).into();
        assert_eq!(e.to_errno(), libc::ENOSPC);
    }

    #[test]
    fn test_fuse_error_display() {
        assert!(FuseError::InvalidInode(42).to_string().contains("42"));
        let e: FuseError = NodeError::NotFound {
            path: "/some/path".into(),
        }
        .into();
        assert!(e.to_string().contains("/some/path"));
    }
}
