//! Passthrough backend: exposes a local file read-only.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::StreamBackend;
use crate::error::NodeResult;

/// Leaf wrapping a file on the local filesystem.
#[derive(Debug)]
pub struct Passthrough {
    path: PathBuf,
    file: Option<File>,
}

impl Passthrough {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    /// Path of the wrapped file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StreamBackend for Passthrough {
    fn open(&mut self, _flags: i32) -> NodeResult<()> {
        let file = File::open(&self.path)?;
        debug!(path = %self.path.display(), "passthrough opened");
        self.file = Some(file);
        Ok(())
    }

    fn read(&mut self, length: usize, offset: u64) -> NodeResult<Vec<u8>> {
        let Some(file) = self.file.as_mut() else {
            return Ok(Vec::new());
        };
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(length.min(1 << 20));
        file.take(length as u64).read_to_end(&mut buf)?;
        trace!(path = %self.path.display(), offset, n = buf.len(), "passthrough read");
        Ok(buf)
    }

    fn close(&mut self) -> NodeResult<()> {
        self.file = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn size(&self) -> u64 {
        // Missing or unreadable files report 0; the open surfaces the error.
        fs::metadata(&self.path).map_or(0, |m| m.len())
    }
}
