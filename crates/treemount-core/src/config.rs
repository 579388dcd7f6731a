//! Backend configuration for a built tree.
//!
//! These knobs are shared by every node of one tree and handed to the
//! backends at build time. Defaults keep the legacy behavior: HTTP reads
//! have no timeout and process nodes run through `/bin/sh`.

use std::path::PathBuf;
use std::time::Duration;

/// Default grace period between SIGTERM and SIGKILL when closing a process node.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Default permission bits for FIFOs created by process nodes.
pub const DEFAULT_FIFO_MODE: u32 = 0o600;

/// Configuration for the stream backends of a tree.
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// Total timeout for an HTTP request, including body streaming.
    ///
    /// Default: none (reads block until the server delivers).
    pub http_timeout: Option<Duration>,

    /// Timeout for establishing an HTTP connection.
    ///
    /// Default: none.
    pub connect_timeout: Option<Duration>,

    /// Shell used to interpret process-node commands (`<shell> -c <command>`).
    pub shell: PathBuf,

    /// How long a terminated child may take to exit before it is killed.
    pub kill_grace: Duration,

    /// Permission bits for FIFOs created by process nodes.
    pub fifo_mode: u32,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            http_timeout: None,
            connect_timeout: None,
            shell: PathBuf::from("/bin/sh"),
            kill_grace: DEFAULT_KILL_GRACE,
            fifo_mode: DEFAULT_FIFO_MODE,
        }
    }
}

impl TreeConfig {
    /// Sets the total HTTP timeout.
    #[must_use]
    pub fn http_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Sets the HTTP connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the shell used for process nodes.
    #[must_use]
    pub fn shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Sets the SIGTERM → SIGKILL grace period.
    #[must_use]
    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Sets the FIFO permission bits.
    #[must_use]
    pub fn fifo_mode(mut self, mode: u32) -> Self {
        self.fifo_mode = mode;
        self
    }
}
