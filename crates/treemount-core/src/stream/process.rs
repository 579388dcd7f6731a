//! Process-stream backend: serves a command's stdout through a named pipe.
//!
//! A process node is a composition of two resources:
//!
//! - a [`Fifo`]: the named pipe at `fifo-path` plus the read end held by
//!   this process;
//! - the child `sh -c <command>`, spawned in its own process group with its
//!   stdout connected to the pipe's write end.
//!
//! Open acquires them in that order and tears down whatever was acquired if
//! a later step fails. Close runs three independent release steps (terminate
//! the child's group, drop the read end, remove the pipe) and reports the
//! first failure only after all of them ran.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::sys::stat::Mode;
use nix::unistd::{Pid, mkfifo};
use tracing::{debug, trace, warn};

use super::{SequentialReader, StreamBackend};
use crate::config::TreeConfig;
use crate::error::{NodeError, NodeResult};
use crate::monitor::{MonitorState, TransferGuard};

const WAIT_POLL: Duration = Duration::from_millis(10);

/// A named pipe owned by one open process node.
///
/// The pipe file is removed on drop unless [`remove`](Self::remove) already
/// did so.
#[derive(Debug)]
pub struct Fifo {
    path: PathBuf,
    reader: Option<SequentialReader<File>>,
    removed: bool,
}

impl Fifo {
    /// Creates the pipe at `path`.
    ///
    /// A pipe left behind at that path is replaced. Any other kind of file
    /// there fails with `EEXIST` and is left untouched.
    pub fn create(path: &Path, mode: u32) -> io::Result<Self> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_fifo() => {
                debug!(path = %path.display(), "replacing stale fifo");
                fs::remove_file(path)?;
            }
            Ok(_) => return Err(io::Error::from_raw_os_error(libc::EEXIST)),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        mkfifo(path, Mode::from_bits_truncate(mode as libc::mode_t))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: None,
            removed: false,
        })
    }

    /// Opens both ends of the pipe, keeps the read end and returns the write
    /// end for the producer.
    ///
    /// Opening one end of a FIFO blocks until the other end is opened. A
    /// non-blocking read end is opened first so the write end can be opened
    /// without a rendezvous; a blocking read end then replaces it.
    pub fn open_ends(&mut self) -> io::Result<File> {
        let probe = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)?;
        let writer = OpenOptions::new().write(true).open(&self.path)?;
        let reader = File::open(&self.path)?;
        drop(probe);
        self.reader = Some(SequentialReader::new(reader));
        Ok(writer)
    }

    /// Reads the next bytes written to the pipe, blocking until `length`
    /// bytes arrive or every writer has closed.
    pub fn read(&mut self, length: usize, offset: u64) -> io::Result<Vec<u8>> {
        match self.reader.as_mut() {
            Some(reader) => reader.read_next(length, offset),
            None => Ok(Vec::new()),
        }
    }

    /// Closes the read end.
    pub fn close_reader(&mut self) {
        self.reader = None;
    }

    /// Removes the pipe file. A pipe already gone is not an error.
    pub fn remove(&mut self) -> io::Result<()> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Fifo {
    fn drop(&mut self) {
        self.close_reader();
        if let Err(e) = self.remove() {
            warn!(path = %self.path.display(), error = %e, "failed to remove fifo");
        }
    }
}

#[derive(Debug)]
struct Running {
    child: Child,
    fifo: Fifo,
    transfer: TransferGuard,
}

/// Leaf serving the output of a shell command.
#[derive(Debug)]
pub struct ProcessStream {
    command: String,
    fifo_path: PathBuf,
    shell: PathBuf,
    kill_grace: Duration,
    fifo_mode: u32,
    monitor: Arc<MonitorState>,
    running: Option<Running>,
}

impl ProcessStream {
    pub fn new(
        command: impl Into<String>,
        fifo_path: impl Into<PathBuf>,
        config: &TreeConfig,
        monitor: Arc<MonitorState>,
    ) -> Self {
        Self {
            command: command.into(),
            fifo_path: fifo_path.into(),
            shell: config.shell.clone(),
            kill_grace: config.kill_grace,
            fifo_mode: config.fifo_mode,
            monitor,
            running: None,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn fifo_path(&self) -> &Path {
        &self.fifo_path
    }

    /// Pid of the running child, if open.
    pub fn pid(&self) -> Option<u32> {
        self.running.as_ref().map(|r| r.child.id())
    }

    fn spawn(&self, stdout: File) -> NodeResult<Child> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .process_group(0);
        // `cmd` owns the parent's copy of the write end; it is closed when
        // `cmd` drops here, leaving the child as the only writer.
        cmd.spawn().map_err(|source| NodeError::Spawn {
            command: self.command.clone(),
            source,
        })
    }

    fn teardown(&mut self) -> NodeResult<()> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };
        let mut first: Option<NodeError> = None;

        if let Err(source) = terminate(&mut running.child, self.kill_grace) {
            warn!(command = %self.command, error = %source, "failed to terminate child");
            first.get_or_insert(NodeError::Teardown {
                step: "terminate child",
                source,
            });
        }

        running.fifo.close_reader();

        if let Err(source) = running.fifo.remove() {
            warn!(path = %self.fifo_path.display(), error = %source, "failed to remove fifo");
            first.get_or_insert(NodeError::Teardown {
                step: "remove fifo",
                source,
            });
        }

        debug!(command = %self.command, "process stream closed");
        first.map_or(Ok(()), Err)
    }
}

/// Signals the child's process group with SIGTERM, waits up to `grace`,
/// then escalates to SIGKILL and reaps the child.
///
/// A group that no longer exists (`ESRCH`) counts as already terminated.
fn terminate(child: &mut Child, grace: Duration) -> io::Result<()> {
    let pgid = Pid::from_raw(i32::try_from(child.id()).map_err(io::Error::other)?);
    signal_group(pgid, Signal::SIGTERM)?;

    let deadline = Instant::now() + grace;
    loop {
        if let Some(status) = child.try_wait()? {
            trace!(pid = child.id(), ?status, "child exited");
            // Grandchildren may outlive the shell; they share its group.
            signal_group(pgid, Signal::SIGKILL)?;
            return Ok(());
        }
        if Instant::now() >= deadline {
            break;
        }
        thread::sleep(WAIT_POLL);
    }

    debug!(pid = child.id(), "child ignored SIGTERM; sending SIGKILL");
    signal_group(pgid, Signal::SIGKILL)?;
    child.wait()?;
    Ok(())
}

fn signal_group(pgid: Pid, signal: Signal) -> io::Result<()> {
    match killpg(pgid, signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl StreamBackend for ProcessStream {
    fn open(&mut self, _flags: i32) -> NodeResult<()> {
        // The pipe path is shared; a previous child must be gone first.
        self.teardown()?;
        let mut fifo = Fifo::create(&self.fifo_path, self.fifo_mode)?;
        let writer = fifo.open_ends()?;
        // On failure `fifo` drops, closing the read end and removing the pipe.
        let child = self.spawn(writer)?;
        debug!(
            command = %self.command,
            pid = child.id(),
            fifo = %self.fifo_path.display(),
            "process stream opened"
        );
        self.running = Some(Running {
            child,
            fifo,
            transfer: self.monitor.track_transfer(format!("process:{}", self.command)),
        });
        Ok(())
    }

    fn read(&mut self, length: usize, offset: u64) -> NodeResult<Vec<u8>> {
        let Some(running) = self.running.as_mut() else {
            return Ok(Vec::new());
        };
        let buf = running.fifo.read(length, offset)?;
        running.transfer.record(buf.len() as u64);
        Ok(buf)
    }

    fn close(&mut self) -> NodeResult<()> {
        self.teardown()
    }

    fn is_open(&self) -> bool {
        self.running.is_some()
    }

    fn size(&self) -> u64 {
        0
    }

    fn size_is_exact(&self) -> bool {
        false
    }
}

impl Drop for ProcessStream {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(command = %self.command, error = %e, "teardown on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::kill;

    fn stream(dir: &tempfile::TempDir, command: &str) -> ProcessStream {
        ProcessStream::new(
            command,
            dir.path().join("out.fifo"),
            &TreeConfig::default().kill_grace(Duration::from_millis(500)),
            Arc::new(MonitorState::new()),
        )
    }

    fn read_to_end(s: &mut ProcessStream) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let chunk = s.read(7, out.len() as u64).unwrap();
            if chunk.is_empty() {
                return out;
            }
            out.extend(chunk);
        }
    }

    fn is_alive(pid: u32) -> bool {
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[test]
    fn test_streams_command_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = stream(&dir, "printf 'line one\\nline two\\n'");
        s.open(0).unwrap();
        assert!(s.fifo_path().exists());
        assert_eq!(read_to_end(&mut s), b"line one\nline two\n");
        s.close().unwrap();
        assert!(!s.fifo_path().exists());
        assert!(!s.is_open());
    }

    #[test]
    fn test_forced_termination_of_infinite_producer() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = stream(&dir, "yes");
        s.open(0).unwrap();
        assert_eq!(s.read(4, 0).unwrap(), b"y\ny\n");
        let pid = s.pid().unwrap();

        s.close().unwrap();
        assert!(!dir.path().join("out.fifo").exists());
        assert!(!is_alive(pid));
    }

    #[test]
    fn test_sigterm_ignored_escalates_to_sigkill() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = ProcessStream::new(
            "trap '' TERM; while :; do echo x; done",
            dir.path().join("out.fifo"),
            &TreeConfig::default().kill_grace(Duration::from_millis(100)),
            Arc::new(MonitorState::new()),
        );
        s.open(0).unwrap();
        assert_eq!(s.read(2, 0).unwrap(), b"x\n");
        let pid = s.pid().unwrap();
        s.close().unwrap();
        assert!(!is_alive(pid));
    }

    #[test]
    fn test_drop_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = stream(&dir, "yes");
        s.open(0).unwrap();
        let pid = s.pid().unwrap();
        drop(s);
        assert!(!dir.path().join("out.fifo").exists());
        assert!(!is_alive(pid));
    }

    #[test]
    fn test_offset_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = stream(&dir, "printf abcdef");
        s.open(0).unwrap();
        assert_eq!(s.read(2, 4).unwrap(), b"ab");
        assert_eq!(s.read(2, 0).unwrap(), b"cd");
        s.close().unwrap();
    }

    #[test]
    fn test_stale_fifo_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        mkfifo(&dir.path().join("out.fifo"), Mode::from_bits_truncate(0o600)).unwrap();
        let mut s = stream(&dir, "printf ok");
        s.open(0).unwrap();
        assert_eq!(read_to_end(&mut s), b"ok");
        s.close().unwrap();
    }

    #[test]
    fn test_regular_file_at_fifo_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fifo");
        fs::write(&path, b"keep me").unwrap();
        let mut s = stream(&dir, "printf ok");
        let err = s.open(0).unwrap_err();
        assert_eq!(err.to_errno(), libc::EEXIST);
        assert_eq!(fs::read(&path).unwrap(), b"keep me");
    }

    #[test]
    fn test_spawn_failure_releases_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = ProcessStream::new(
            "true",
            dir.path().join("out.fifo"),
            &TreeConfig::default().shell("/nonexistent/shell"),
            Arc::new(MonitorState::new()),
        );
        let err = s.open(0).unwrap_err();
        assert!(matches!(err, NodeError::Spawn { .. }));
        assert!(!s.is_open());
        assert!(!dir.path().join("out.fifo").exists());
    }

    #[test]
    fn test_transfer_tracked_while_open() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = Arc::new(MonitorState::new());
        let mut s = ProcessStream::new(
            "printf 12345",
            dir.path().join("out.fifo"),
            &TreeConfig::default(),
            Arc::clone(&monitor),
        );
        s.open(0).unwrap();
        s.read(3, 0).unwrap();
        assert_eq!(monitor.snapshot().network.transfers[0].bytes, 3);
        s.close().unwrap();
        assert_eq!(monitor.transfer_count(), 0);
    }

    #[test]
    fn test_close_when_closed_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = stream(&dir, "true");
        s.close().unwrap();
        assert_eq!(s.size(), 0);
        assert!(!s.size_is_exact());
    }
}
