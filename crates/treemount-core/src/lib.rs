//! Virtual filesystem engine for declarative JSON trees.
//!
//! A spec document describes a tree of named nodes. Directories hold
//! children; leaves take their bytes from one of several backends:
//!
//! - `literal`: a JSON value embedded in the document
//! - `file`: a file on the local filesystem
//! - `uri`: an HTTP resource, streamed on demand
//! - `process`: the stdout of a shell command, relayed through a named pipe
//! - `monitor`: a live JSON snapshot of the engine's own resource usage
//!
//! No backend resource is acquired until a leaf is opened, and each is
//! released when its handle is closed.
//!
//! # Usage
//!
//! ```no_run
//! use treemount_core::{BuildContext, Dispatcher};
//!
//! let mut fs = Dispatcher::load("tree.json".as_ref(), &BuildContext::default())?;
//! let fh = fs.open("/reads/sample.fastq", libc::O_RDONLY)?;
//! let head = fs.read("/reads/sample.fastq", 4096, 0, fh)?;
//! fs.release("/reads/sample.fastq", fh)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod builder;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod monitor;
pub mod node;
pub mod spec;
pub mod stat;
pub mod stream;

pub use builder::{BuildContext, build, build_with};
pub use config::TreeConfig;
pub use dispatch::Dispatcher;
pub use error::{NodeError, NodeResult, SchemaError};
pub use monitor::{MonitorSnapshot, MonitorState};
pub use node::Node;
pub use spec::NodeSpec;
pub use stat::{StatFs, StatInfo};
pub use stream::StreamBackend;
