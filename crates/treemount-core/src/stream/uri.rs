//! URI-stream backend: streams an HTTP response body.
//!
//! The body is consumed front to back. Reads ignore the requested offset and
//! return the next bytes of the response, so consumers must read
//! sequentially; seeking is not supported.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use tracing::{debug, trace};

use super::{SequentialReader, StreamBackend};
use crate::config::TreeConfig;
use crate::error::{NodeError, NodeResult};
use crate::monitor::{MonitorState, TransferGuard};

struct OpenBody {
    reader: SequentialReader<Response>,
    transfer: TransferGuard,
}

/// Leaf streaming a remote resource.
pub struct UriStream {
    uri: String,
    http_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    monitor: Arc<MonitorState>,
    client: Option<Client>,
    body: Option<OpenBody>,
    content_length: Option<u64>,
}

impl UriStream {
    pub fn new(uri: impl Into<String>, config: &TreeConfig, monitor: Arc<MonitorState>) -> Self {
        Self {
            uri: uri.into(),
            http_timeout: config.http_timeout,
            connect_timeout: config.connect_timeout,
            monitor,
            client: None,
            body: None,
            content_length: None,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    fn client(&mut self) -> NodeResult<Client> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        // The blocking client defaults to a 30 s timeout; pass ours explicitly.
        let client = Client::builder()
            .timeout(self.http_timeout)
            .connect_timeout(self.connect_timeout)
            .build()?;
        self.client = Some(client.clone());
        Ok(client)
    }
}

impl fmt::Debug for UriStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UriStream")
            .field("uri", &self.uri)
            .field("open", &self.body.is_some())
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl StreamBackend for UriStream {
    fn open(&mut self, _flags: i32) -> NodeResult<()> {
        let uri = self.uri.clone();
        let response = self.client()?.get(&uri).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(NodeError::HttpStatus {
                status: status.as_u16(),
                uri,
            });
        }
        self.content_length = response.content_length();
        debug!(uri = %uri, content_length = ?self.content_length, "uri stream opened");
        self.body = Some(OpenBody {
            reader: SequentialReader::new(response),
            transfer: self.monitor.track_transfer(uri),
        });
        Ok(())
    }

    fn read(&mut self, length: usize, offset: u64) -> NodeResult<Vec<u8>> {
        let Some(body) = self.body.as_mut() else {
            return Ok(Vec::new());
        };
        let buf = body.reader.read_next(length, offset)?;
        body.transfer.record(buf.len() as u64);
        trace!(uri = %self.uri, n = buf.len(), position = body.reader.position(), "uri read");
        Ok(buf)
    }

    fn close(&mut self) -> NodeResult<()> {
        if self.body.take().is_some() {
            debug!(uri = %self.uri, "uri stream closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.body.is_some()
    }

    fn size(&self) -> u64 {
        self.content_length.unwrap_or(0)
    }

    fn size_is_exact(&self) -> bool {
        false
    }
}
