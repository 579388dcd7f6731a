//! The declarative spec document.
//!
//! A spec is a recursive JSON record. Only `name` and `kind` are always
//! required; the remaining payload fields are checked per kind by the
//! [builder](crate::builder), so a malformed document is reported with the
//! node name and the missing field rather than a generic parse error.
//!
//! ```
//! use treemount_core::spec::NodeSpec;
//!
//! let spec = NodeSpec::from_json_str(r#"{
//!     "name": "/",
//!     "kind": "directory",
//!     "children": [{"name": "a.txt", "kind": "literal", "data": "hi"}]
//! }"#).unwrap();
//! assert_eq!(spec.children.len(), 1);
//! ```

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::SchemaError;

/// One node of a spec document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeSpec {
    /// Path segment of the node (`"/"` for the root).
    pub name: String,

    /// Backend tag, resolved through the builder's registry.
    pub kind: String,

    /// Attributes merged into stat info and exposed as extended attributes.
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Children of a directory, in listing order.
    #[serde(default)]
    pub children: Vec<NodeSpec>,

    /// Value served by a literal node.
    #[serde(default, deserialize_with = "present")]
    pub data: Option<Value>,

    /// URL streamed by a uri node.
    pub source_uri: Option<String>,

    /// Local file wrapped by a file node.
    pub source_path: Option<PathBuf>,

    /// Shell command run by a process node.
    pub command: Option<String>,

    /// Named pipe created by a process node.
    pub fifo_path: Option<PathBuf>,

    /// Directory whose size a monitor node reports.
    pub cache_dir: Option<PathBuf>,
}

// `"data": null` is a valid literal payload, distinct from an absent field.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl NodeSpec {
    /// Parses a spec document from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parses a spec document from a reader.
    pub fn from_reader(reader: impl Read) -> Result<Self, SchemaError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Reads and parses a spec document from a file.
    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        let file = File::open(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(file))
    }

    /// Creates a directory spec.
    pub fn directory(name: impl Into<String>, children: Vec<NodeSpec>) -> Self {
        Self {
            name: name.into(),
            kind: "directory".into(),
            children,
            ..Self::default()
        }
    }

    /// Creates a literal spec.
    pub fn literal(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            kind: "literal".into(),
            data: Some(data),
            ..Self::default()
        }
    }

    /// Creates a file spec.
    pub fn file(name: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: "file".into(),
            source_path: Some(source_path.into()),
            ..Self::default()
        }
    }

    /// Creates a uri spec.
    pub fn uri(name: impl Into<String>, source_uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: "uri".into(),
            source_uri: Some(source_uri.into()),
            ..Self::default()
        }
    }

    /// Creates a process spec.
    pub fn process(
        name: impl Into<String>,
        command: impl Into<String>,
        fifo_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: "process".into(),
            command: Some(command.into()),
            fifo_path: Some(fifo_path.into()),
            ..Self::default()
        }
    }

    /// Creates a monitor spec.
    pub fn monitor(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: "monitor".into(),
            ..Self::default()
        }
    }

    /// Attaches metadata entries.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}
