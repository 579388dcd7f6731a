//! Process-wide operational metrics and the monitor node's value source.
//!
//! [`MonitorState::global`] returns the single shared instance; every monitor
//! node of every tree in the process observes it. Backends register their
//! live resources with it while a handle is open:
//!
//! - URI and process streams register a *transfer* ([`TransferGuard`]) and
//!   add to its byte count on every read.
//! - Literal nodes register their serialized *buffer* ([`BufferGuard`]) and
//!   advance its consumed mark as reads progress.
//! - Monitor nodes register a *cache directory* whose recursive size is
//!   reported.
//!
//! Guards unregister on drop, so a resource leaves the snapshot exactly when
//! the handle that owns it is closed.
//!
//! All ratios in a [`MonitorSnapshot`] are `None` when their denominator is
//! zero (no tracked items, or items of size zero). They are never computed by
//! dividing by an empty total.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::stream::literal::ValueSource;

static GLOBAL: OnceLock<Arc<MonitorState>> = OnceLock::new();

#[derive(Debug)]
struct TransferEntry {
    source: String,
    started: Instant,
    bytes: Arc<AtomicU64>,
}

#[derive(Debug)]
struct BufferEntry {
    label: String,
    size: u64,
    consumed: Arc<AtomicU64>,
}

/// Shared counters behind every monitor node.
#[derive(Debug)]
pub struct MonitorState {
    started: Instant,
    next_id: AtomicU64,
    transfers: RwLock<BTreeMap<u64, TransferEntry>>,
    buffers: RwLock<BTreeMap<u64, BufferEntry>>,
    cache_dirs: RwLock<Vec<PathBuf>>,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorState {
    /// Creates an independent state. Production code uses [`global`](Self::global).
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            next_id: AtomicU64::new(1),
            transfers: RwLock::new(BTreeMap::new()),
            buffers: RwLock::new(BTreeMap::new()),
            cache_dirs: RwLock::new(Vec::new()),
        }
    }

    /// Returns the process-wide instance, initializing it on first use.
    ///
    /// The start timestamp is taken at that first call and never reset,
    /// however many trees are built afterwards.
    pub fn global() -> Arc<MonitorState> {
        Arc::clone(GLOBAL.get_or_init(|| {
            debug!("initializing process-wide monitor state");
            Arc::new(MonitorState::new())
        }))
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Starts tracking a network (or pipe) transfer.
    pub fn track_transfer(self: &Arc<Self>, source: impl Into<String>) -> TransferGuard {
        let id = self.allocate_id();
        let bytes = Arc::new(AtomicU64::new(0));
        let source = source.into();
        trace!(id, source = %source, "tracking transfer");
        self.transfers.write().insert(
            id,
            TransferEntry {
                source,
                started: Instant::now(),
                bytes: Arc::clone(&bytes),
            },
        );
        TransferGuard {
            state: Arc::clone(self),
            id,
            bytes,
        }
    }

    /// Starts tracking an in-memory buffer of `size` bytes.
    pub fn track_buffer(self: &Arc<Self>, label: impl Into<String>, size: u64) -> BufferGuard {
        let id = self.allocate_id();
        let consumed = Arc::new(AtomicU64::new(0));
        self.buffers.write().insert(
            id,
            BufferEntry {
                label: label.into(),
                size,
                consumed: Arc::clone(&consumed),
            },
        );
        BufferGuard {
            state: Arc::clone(self),
            id,
            consumed,
        }
    }

    /// Adds a cache directory to the report. Registering a path twice is a no-op.
    pub fn register_cache_dir(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut dirs = self.cache_dirs.write();
        if !dirs.contains(&path) {
            debug!(path = %path.display(), "registering cache directory");
            dirs.push(path);
        }
    }

    /// Number of transfers currently tracked.
    pub fn transfer_count(&self) -> usize {
        self.transfers.read().len()
    }

    /// Number of buffers currently tracked.
    pub fn buffer_count(&self) -> usize {
        self.buffers.read().len()
    }

    /// Computes a point-in-time snapshot of all tracked resources.
    pub fn snapshot(&self) -> MonitorSnapshot {
        let transfers: Vec<(u64, String, u64, f64)> = self
            .transfers
            .read()
            .iter()
            .map(|(id, t)| {
                (
                    *id,
                    t.source.clone(),
                    t.bytes.load(Ordering::Relaxed),
                    t.started.elapsed().as_secs_f64(),
                )
            })
            .collect();
        let network_total: u64 = transfers.iter().map(|t| t.2).sum();
        let transfers = transfers
            .into_iter()
            .map(|(id, source, bytes, elapsed_secs)| TransferSnapshot {
                id,
                source,
                bytes,
                elapsed_secs,
                bytes_per_sec: ratio(bytes as f64, elapsed_secs),
                share: ratio(bytes as f64, network_total as f64),
            })
            .collect::<Vec<_>>();

        let items = self
            .buffers
            .read()
            .iter()
            .map(|(id, b)| {
                let consumed = b.consumed.load(Ordering::Relaxed).min(b.size);
                BufferSnapshot {
                    id: *id,
                    label: b.label.clone(),
                    size: b.size,
                    consumed,
                    utilization: ratio(consumed as f64, b.size as f64),
                }
            })
            .collect::<Vec<_>>();
        let buffer_total: u64 = items.iter().map(|b| b.size).sum();
        let buffer_consumed: u64 = items.iter().map(|b| b.consumed).sum();

        let cache = self
            .cache_dirs
            .read()
            .iter()
            .map(|path| CacheSnapshot {
                path: path.clone(),
                bytes: directory_size(path),
            })
            .collect();

        MonitorSnapshot {
            status: "ok",
            uptime_secs: self.started.elapsed().as_secs_f64(),
            network: NetworkSnapshot {
                active: transfers.len(),
                total_bytes: network_total,
                transfers,
            },
            buffers: BufferSummary {
                active: items.len(),
                total_bytes: buffer_total,
                utilization: ratio(buffer_consumed as f64, buffer_total as f64),
                items,
            },
            cache,
        }
    }
}

/// `numerator / denominator`, or `None` when the denominator is not positive.
pub fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    (denominator > 0.0).then(|| numerator / denominator)
}

/// Recursive size of regular files under `path`; unreadable entries are skipped.
pub fn directory_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// Registration of one transfer; unregisters on drop.
#[derive(Debug)]
pub struct TransferGuard {
    state: Arc<MonitorState>,
    id: u64,
    bytes: Arc<AtomicU64>,
}

impl TransferGuard {
    /// Adds `n` transferred bytes.
    pub fn record(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        trace!(id = self.id, "transfer finished");
        self.state.transfers.write().remove(&self.id);
    }
}

/// Registration of one buffer; unregisters on drop.
#[derive(Debug)]
pub struct BufferGuard {
    state: Arc<MonitorState>,
    id: u64,
    consumed: Arc<AtomicU64>,
}

impl BufferGuard {
    /// Raises the consumed mark to `position` (it never moves backwards).
    pub fn consumed_up_to(&self, position: u64) {
        self.consumed.fetch_max(position, Ordering::Relaxed);
    }
}

impl Drop for BufferGuard {
    fn drop(&mut self) {
        self.state.buffers.write().remove(&self.id);
    }
}

/// Snapshot served by monitor nodes.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub status: &'static str,
    pub uptime_secs: f64,
    pub network: NetworkSnapshot,
    pub buffers: BufferSummary,
    pub cache: Vec<CacheSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkSnapshot {
    pub active: usize,
    pub total_bytes: u64,
    pub transfers: Vec<TransferSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferSnapshot {
    pub id: u64,
    pub source: String,
    pub bytes: u64,
    pub elapsed_secs: f64,
    pub bytes_per_sec: Option<f64>,
    /// Fraction of all tracked bytes moved by this transfer.
    pub share: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BufferSummary {
    pub active: usize,
    pub total_bytes: u64,
    /// Consumed bytes over buffered bytes across all buffers.
    pub utilization: Option<f64>,
    pub items: Vec<BufferSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BufferSnapshot {
    pub id: u64,
    pub label: String,
    pub size: u64,
    pub consumed: u64,
    pub utilization: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Value source that recomputes the monitor snapshot on every open.
#[derive(Debug, Clone)]
pub struct MonitorSource {
    state: Arc<MonitorState>,
}

impl MonitorSource {
    pub fn new(state: Arc<MonitorState>) -> Self {
        Self { state }
    }
}

impl ValueSource for MonitorSource {
    fn value(&self) -> Value {
        serde_json::to_value(self.state.snapshot()).unwrap_or(Value::Null)
    }

    fn is_live(&self) -> bool {
        true
    }
}
