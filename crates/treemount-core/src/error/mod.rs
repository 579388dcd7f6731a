//! Error types for the tree engine.
//!
//! Two families exist:
//!
//! - [`SchemaError`] is raised while turning a spec document into a tree. It is
//!   fatal: a mount never starts from a malformed document.
//! - [`NodeError`] is raised by path resolution and by the per-node operation
//!   contract. Every variant maps to exactly one POSIX errno through
//!   [`NodeError::to_errno`], which is what the kernel binding hands back.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while validating or loading a spec document.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The `kind` tag is not registered.
    #[error("node '{name}' has unknown kind '{kind}'")]
    UnknownKind { name: String, kind: String },

    /// A field required by the node's kind is absent.
    #[error("node '{name}' of kind '{kind}' is missing required field '{field}'")]
    MissingField {
        name: String,
        kind: &'static str,
        field: &'static str,
    },

    /// Two siblings share a name.
    #[error("directory '{parent}' contains more than one child named '{name}'")]
    DuplicateChild { parent: String, name: String },

    /// A node name cannot be used as a path segment.
    #[error("invalid node name '{name}'")]
    InvalidName { name: String },

    /// The top of the document is not a directory.
    #[error("root node must be a directory, found kind '{kind}'")]
    RootNotDirectory { kind: String },

    /// The document is not valid JSON or does not fit the schema.
    #[error("malformed spec document: {0}")]
    Json(#[from] serde_json::Error),

    /// The document could not be read.
    #[error("failed to read spec document {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors raised by path resolution and node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// No node exists at the requested path.
    #[error("no such node: {path}")]
    NotFound { path: String },

    /// The requested extended attribute is not in the node's metadata.
    #[error("no such attribute: {name}")]
    NoAttribute { name: String },

    /// A directory-only operation reached a leaf.
    #[error("not a directory: {name}")]
    NotADirectory { name: String },

    /// A leaf was read without an open handle.
    #[error("node '{name}' has no open handle")]
    NotOpen { name: String },

    /// A read presented a handle that is no longer the node's current one.
    #[error("handle {handle} is not open on node '{name}'")]
    StaleHandle { name: String, handle: u64 },

    /// Local file or pipe I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The HTTP client failed before a response was available.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {uri}")]
    HttpStatus { status: u16, uri: String },

    /// The backing command could not be started.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// One or more steps of a resource teardown failed.
    #[error("teardown step '{step}' failed: {source}")]
    Teardown {
        step: &'static str,
        #[source]
        source: io::Error,
    },

    /// The tree could not be built.
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl NodeError {
    /// Converts this error to the POSIX errno reported to the kernel.
    pub fn to_errno(&self) -> i32 {
        match self {
            NodeError::NotFound { .. } => libc::ENOENT,
            NodeError::NoAttribute { .. } => libc::ENODATA,
            NodeError::NotADirectory { .. } => libc::ENOTDIR,
            NodeError::NotOpen { .. } | NodeError::StaleHandle { .. } => libc::EBADF,
            NodeError::Io(e)
            | NodeError::Spawn { source: e, .. }
            | NodeError::Teardown { source: e, .. } => io_error_to_errno(e),
            NodeError::Http(e) => http_error_to_errno(e),
            NodeError::HttpStatus { status, .. } => http_status_to_errno(*status),
            NodeError::Schema(_) => libc::EINVAL,
        }
    }

    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        NodeError::NotFound { path: path.into() }
    }
}

/// Result type for node operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Maps an I/O error to its raw OS errno, falling back to `EIO`.
pub fn io_error_to_errno(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}

fn http_error_to_errno(e: &reqwest::Error) -> i32 {
    if e.is_timeout() {
        libc::ETIMEDOUT
    } else if e.is_connect() {
        libc::ECONNREFUSED
    } else if let Some(status) = e.status() {
        http_status_to_errno(status.as_u16())
    } else {
        libc::EIO
    }
}

fn http_status_to_errno(status: u16) -> i32 {
    match status {
        404 | 410 => libc::ENOENT,
        401 | 403 => libc::EACCES,
        _ => libc::EIO,
    }
}
