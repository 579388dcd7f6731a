//! Literal-data backend: serves an in-memory JSON value as bytes.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

use super::StreamBackend;
use crate::error::NodeResult;
use crate::monitor::{BufferGuard, MonitorState};

/// Produces the value a literal node serves.
pub trait ValueSource: fmt::Debug + Send {
    /// Current value. Called once per open.
    fn value(&self) -> Value;

    /// Returns true when the value may change between opens.
    fn is_live(&self) -> bool {
        false
    }
}

/// A fixed value taken from the spec document.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticValue(pub Value);

impl ValueSource for StaticValue {
    fn value(&self) -> Value {
        self.0.clone()
    }
}

/// Canonical text encoding of a literal value.
///
/// Strings are emitted as their raw UTF-8 text so that `"data": "hi"` reads
/// back as `hi`; every other value is emitted as compact JSON.
pub fn encode_value(value: &Value) -> NodeResult<Vec<u8>> {
    match value {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        other => Ok(serde_json::to_vec(other).map_err(std::io::Error::from)?),
    }
}

/// Leaf serving a serialized [`ValueSource`].
pub struct LiteralStream {
    label: String,
    source: Box<dyn ValueSource>,
    monitor: Arc<MonitorState>,
    buffer: Option<Vec<u8>>,
    guard: Option<BufferGuard>,
    size: u64,
}

impl LiteralStream {
    /// Creates a literal backend. The size is computed up front from the
    /// source's current value.
    pub fn new(
        label: impl Into<String>,
        source: Box<dyn ValueSource>,
        monitor: Arc<MonitorState>,
    ) -> Self {
        let size = encode_value(&source.value()).map_or(0, |b| b.len() as u64);
        Self {
            label: label.into(),
            source,
            monitor,
            buffer: None,
            guard: None,
            size,
        }
    }
}

impl fmt::Debug for LiteralStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiteralStream")
            .field("label", &self.label)
            .field("source", &self.source)
            .field("open", &self.buffer.is_some())
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl StreamBackend for LiteralStream {
    fn open(&mut self, _flags: i32) -> NodeResult<()> {
        let bytes = encode_value(&self.source.value())?;
        self.size = bytes.len() as u64;
        debug!(label = %self.label, size = self.size, "literal buffer serialized");
        self.guard = Some(self.monitor.track_buffer(self.label.clone(), self.size));
        self.buffer = Some(bytes);
        Ok(())
    }

    fn read(&mut self, length: usize, offset: u64) -> NodeResult<Vec<u8>> {
        let Some(buffer) = self.buffer.as_ref() else {
            return Ok(Vec::new());
        };
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(buffer.len());
        let end = start.saturating_add(length).min(buffer.len());
        trace!(label = %self.label, start, end, "literal read");
        if let Some(guard) = &self.guard {
            guard.consumed_up_to(end as u64);
        }
        Ok(buffer[start..end].to_vec())
    }

    fn close(&mut self) -> NodeResult<()> {
        self.buffer = None;
        self.guard = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.buffer.is_some()
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn size_is_exact(&self) -> bool {
        !self.source.is_live()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn literal(value: Value) -> LiteralStream {
        LiteralStream::new(
            "/t",
            Box::new(StaticValue(value)),
            Arc::new(MonitorState::new()),
        )
    }

    fn read_all(stream: &mut LiteralStream) -> Vec<u8> {
        stream.open(0).unwrap();
        let out = stream.read(usize::MAX, 0).unwrap();
        stream.close().unwrap();
        out
    }

    #[test]
    fn test_string_is_raw_text() {
        let mut s = literal(json!("hi"));
        assert_eq!(s.size(), 2);
        assert_eq!(read_all(&mut s), b"hi");
    }

    #[test]
    fn test_structured_value_is_compact_json() {
        let value = json!(["some JSONable stuff", 123, {"key": "value"}]);
        let mut s = literal(value.clone());
        let bytes = read_all(&mut s);
        assert_eq!(bytes, serde_json::to_vec(&value).unwrap());
        assert_eq!(s.size(), bytes.len() as u64);
    }

    #[test]
    fn test_repeated_cycles_are_identical() {
        let mut s = literal(json!({"a": [1, 2, 3], "b": null}));
        let first = read_all(&mut s);
        let second = read_all(&mut s);
        assert_eq!(first, second);
    }

    #[test]
    fn test_read_past_end_is_empty() {
        let mut s = literal(json!("abc"));
        s.open(0).unwrap();
        assert!(s.read(10, 3).unwrap().is_empty());
        assert!(s.read(10, 1000).unwrap().is_empty());
        assert_eq!(s.read(10, u64::MAX).unwrap(), b"");
    }

    #[test]
    fn test_close_releases_buffer_and_registration() {
        let monitor = Arc::new(MonitorState::new());
        let mut s = LiteralStream::new("/t", Box::new(StaticValue(json!(1))), Arc::clone(&monitor));
        s.open(0).unwrap();
        assert!(s.is_open());
        assert_eq!(monitor.buffer_count(), 1);
        s.close().unwrap();
        assert!(!s.is_open());
        assert_eq!(monitor.buffer_count(), 0);
    }

    proptest! {
        #[test]
        fn prop_prefix_plus_suffix_is_whole(text in ".{0,200}", split in 0usize..256) {
            let mut s = literal(Value::String(text.clone()));
            s.open(0).unwrap();
            let full = s.read(usize::MAX, 0).unwrap();
            let n = split.min(full.len());
            let mut joined = s.read(n, 0).unwrap();
            joined.extend(s.read(usize::MAX, n as u64).unwrap());
            prop_assert_eq!(&joined, &full);
            prop_assert_eq!(full, text.into_bytes());
        }
    }
}
