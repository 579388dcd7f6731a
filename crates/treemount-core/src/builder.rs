//! Spec document → node tree.
//!
//! The `kind` tag of every spec node is looked up in a static registry that
//! maps tags to constructors. Directories recurse into their children in
//! document order. Nothing is opened at build time: backends only record
//! what they need to acquire their resource on the first `open`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::TreeConfig;
use crate::error::SchemaError;
use crate::monitor::{MonitorSource, MonitorState};
use crate::node::Node;
use crate::spec::NodeSpec;
use crate::stream::{LiteralStream, Passthrough, ProcessStream, StaticValue, UriStream};

/// Shared inputs for building one tree.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub config: TreeConfig,
    pub monitor: Arc<MonitorState>,
    /// Where the tree will be mounted; only used in diagnostics.
    pub mount_point: Option<PathBuf>,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new(TreeConfig::default())
    }
}

impl BuildContext {
    /// Context using the process-wide monitor state.
    pub fn new(config: TreeConfig) -> Self {
        Self {
            config,
            monitor: MonitorState::global(),
            mount_point: None,
        }
    }

    /// Replaces the monitor state (tests use an isolated instance).
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<MonitorState>) -> Self {
        self.monitor = monitor;
        self
    }

    #[must_use]
    pub fn with_mount_point(mut self, mount_point: impl Into<PathBuf>) -> Self {
        self.mount_point = Some(mount_point.into());
        self
    }
}

type Constructor = fn(&NodeSpec, &str, &BuildContext) -> Result<Node, SchemaError>;

static REGISTRY: &[(&str, Constructor)] = &[
    ("directory", build_directory),
    ("d", build_directory),
    ("literal", build_literal),
    ("file", build_file),
    ("uri", build_uri),
    ("process", build_process),
    ("monitor", build_monitor),
];

fn constructor(kind: &str) -> Option<Constructor> {
    REGISTRY
        .iter()
        .find(|(tag, _)| *tag == kind)
        .map(|(_, ctor)| *ctor)
}

fn is_directory_kind(kind: &str) -> bool {
    matches!(kind, "directory" | "d")
}

/// Registered kind tags, aliases included.
pub fn kinds() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(tag, _)| *tag)
}

/// Builds a tree with default configuration and the process-wide monitor.
pub fn build(spec: &NodeSpec, mount_point: Option<&Path>) -> Result<Node, SchemaError> {
    let mut ctx = BuildContext::default();
    ctx.mount_point = mount_point.map(Path::to_path_buf);
    build_with(spec, &ctx)
}

/// Builds a tree. The root must be a directory; its name becomes `/`.
pub fn build_with(spec: &NodeSpec, ctx: &BuildContext) -> Result<Node, SchemaError> {
    let ctor = constructor(&spec.kind).ok_or_else(|| SchemaError::UnknownKind {
        name: spec.name.clone(),
        kind: spec.kind.clone(),
    })?;
    if !is_directory_kind(&spec.kind) {
        return Err(SchemaError::RootNotDirectory {
            kind: spec.kind.clone(),
        });
    }
    let root = ctor(spec, "/", ctx)?;
    info!(
        mount_point = ?ctx.mount_point,
        nodes = root.walk().len(),
        "tree built"
    );
    Ok(root)
}

fn build_node(spec: &NodeSpec, path: &str, ctx: &BuildContext) -> Result<Node, SchemaError> {
    validate_name(&spec.name)?;
    let ctor = constructor(&spec.kind).ok_or_else(|| SchemaError::UnknownKind {
        name: spec.name.clone(),
        kind: spec.kind.clone(),
    })?;
    debug!(path, kind = %spec.kind, "building node");
    ctor(spec, path, ctx)
}

fn validate_name(name: &str) -> Result<(), SchemaError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(SchemaError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn build_directory(spec: &NodeSpec, path: &str, ctx: &BuildContext) -> Result<Node, SchemaError> {
    let name = if path == "/" { "/" } else { spec.name.as_str() };
    let mut dir = Node::directory(name, spec.metadata.clone());
    for child in &spec.children {
        let node = build_node(child, &child_path(path, &child.name), ctx)?;
        dir.add_child(node)?;
    }
    Ok(dir)
}

fn missing(spec: &NodeSpec, kind: &'static str, field: &'static str) -> SchemaError {
    SchemaError::MissingField {
        name: spec.name.clone(),
        kind,
        field,
    }
}

fn build_literal(spec: &NodeSpec, path: &str, ctx: &BuildContext) -> Result<Node, SchemaError> {
    let data = spec
        .data
        .clone()
        .ok_or_else(|| missing(spec, "literal", "data"))?;
    let backend = LiteralStream::new(path, Box::new(StaticValue(data)), Arc::clone(&ctx.monitor));
    Ok(Node::leaf(&spec.name, "literal", spec.metadata.clone(), Box::new(backend)))
}

fn build_file(spec: &NodeSpec, _path: &str, _ctx: &BuildContext) -> Result<Node, SchemaError> {
    let source = spec
        .source_path
        .as_ref()
        .ok_or_else(|| missing(spec, "file", "source-path"))?;
    let backend = Passthrough::new(source);
    Ok(Node::leaf(&spec.name, "file", spec.metadata.clone(), Box::new(backend)))
}

fn build_uri(spec: &NodeSpec, _path: &str, ctx: &BuildContext) -> Result<Node, SchemaError> {
    let uri = spec
        .source_uri
        .as_ref()
        .ok_or_else(|| missing(spec, "uri", "source-uri"))?;
    let backend = UriStream::new(uri, &ctx.config, Arc::clone(&ctx.monitor));
    Ok(Node::leaf(&spec.name, "uri", spec.metadata.clone(), Box::new(backend)))
}

fn build_process(spec: &NodeSpec, _path: &str, ctx: &BuildContext) -> Result<Node, SchemaError> {
    let command = spec
        .command
        .as_ref()
        .ok_or_else(|| missing(spec, "process", "command"))?;
    let fifo_path = spec
        .fifo_path
        .as_ref()
        .ok_or_else(|| missing(spec, "process", "fifo-path"))?;
    let backend = ProcessStream::new(command, fifo_path, &ctx.config, Arc::clone(&ctx.monitor));
    Ok(Node::leaf(&spec.name, "process", spec.metadata.clone(), Box::new(backend)))
}

fn build_monitor(spec: &NodeSpec, path: &str, ctx: &BuildContext) -> Result<Node, SchemaError> {
    if let Some(dir) = &spec.cache_dir {
        ctx.monitor.register_cache_dir(dir);
    }
    let source = MonitorSource::new(Arc::clone(&ctx.monitor));
    let backend = LiteralStream::new(path, Box::new(source), Arc::clone(&ctx.monitor));
    Ok(Node::leaf(&spec.name, "monitor", spec.metadata.clone(), Box::new(backend)))
}
