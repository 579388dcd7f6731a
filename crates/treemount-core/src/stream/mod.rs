//! Leaf backends.
//!
//! Every leaf node owns one [`StreamBackend`]. The node handles token
//! bookkeeping; the backend only acquires, reads and releases its resource:
//!
//! | Backend | Resource held while open | Reads |
//! |---------|--------------------------|-------|
//! | [`LiteralStream`] | serialized byte buffer | random access |
//! | [`Passthrough`] | local file descriptor | random access |
//! | [`UriStream`] | HTTP response body | sequential, offset ignored |
//! | [`ProcessStream`] | child process + FIFO read end | sequential, offset ignored |

pub mod literal;
pub mod passthrough;
pub mod process;
pub mod uri;

use std::fmt;
use std::io::{self, Read};

use tracing::debug;

use crate::error::NodeResult;

pub use literal::{LiteralStream, StaticValue, ValueSource};
pub use passthrough::Passthrough;
pub use process::ProcessStream;
pub use uri::UriStream;

/// Backend behavior of a leaf node.
pub trait StreamBackend: fmt::Debug + Send {
    /// Acquires the backing resource.
    fn open(&mut self, flags: i32) -> NodeResult<()>;

    /// Reads up to `length` bytes.
    ///
    /// Random-access backends honor `offset`; sequential backends return the
    /// next bytes of their stream regardless of it.
    fn read(&mut self, length: usize, offset: u64) -> NodeResult<Vec<u8>>;

    /// Releases the backing resource. Closing a closed backend is a no-op.
    fn close(&mut self) -> NodeResult<()>;

    /// Returns true while a resource is held.
    fn is_open(&self) -> bool;

    /// Size to report in stat info (a placeholder when not known up front).
    fn size(&self) -> u64;

    /// Returns false when [`size`](Self::size) may not match what a read
    /// returns, so callers must not clamp reads to it.
    fn size_is_exact(&self) -> bool {
        true
    }
}

/// Forward-only cursor over a byte stream.
///
/// Tracks how many bytes have been handed out so that non-sequential read
/// requests can be logged; they are still served from the cursor.
pub struct SequentialReader<R> {
    inner: R,
    position: u64,
}

impl<R: Read> SequentialReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }

    /// Bytes consumed from the stream so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Reads the next `length` bytes, blocking until they arrive or the
    /// stream ends. Returns fewer bytes only at end of stream.
    pub fn read_next(&mut self, length: usize, offset: u64) -> io::Result<Vec<u8>> {
        if offset != self.position {
            debug!(
                requested = offset,
                position = self.position,
                "non-sequential read on stream; serving from cursor"
            );
        }
        let mut buf = Vec::with_capacity(length.min(1 << 20));
        (&mut self.inner).take(length as u64).read_to_end(&mut buf)?;
        self.position += buf.len() as u64;
        Ok(buf)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R> fmt::Debug for SequentialReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequentialReader")
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_sequential_reads_concatenate() {
        let mut reader = SequentialReader::new(Cursor::new(b"hello world".to_vec()));
        let mut out = reader.read_next(4, 0).unwrap();
        out.extend(reader.read_next(4, 4).unwrap());
        out.extend(reader.read_next(100, 8).unwrap());
        assert_eq!(out, b"hello world");
        assert_eq!(reader.position(), 11);
        assert!(reader.read_next(4, 11).unwrap().is_empty());
    }

    #[test]
    fn test_offset_is_ignored() {
        let mut reader = SequentialReader::new(Cursor::new(b"abcdef".to_vec()));
        assert_eq!(reader.read_next(2, 4).unwrap(), b"ab");
        assert_eq!(reader.read_next(2, 0).unwrap(), b"cd");
    }
}
