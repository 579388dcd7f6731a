//! treemount - Mount a declarative JSON tree as a FUSE filesystem.
//!
//! Usage: treemount <SPEC> [MOUNTPOINT]
//!
//! The mount point falls back to the `MOUNT` environment variable, then
//! `/data`.

use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use treemount_core::{BuildContext, Dispatcher, TreeConfig};
use treemount_fuse::{MountConfig, TreeFS, spawn_mount};

#[derive(Parser)]
#[command(name = "treemount")]
#[command(about = "Mount a declarative JSON tree as a FUSE filesystem")]
#[command(version)]
struct Cli {
    /// Path to the JSON spec document
    spec: PathBuf,

    /// Mountpoint for the filesystem
    #[arg(env = "MOUNT", default_value = "/data")]
    mount: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Mount as read-only
    #[arg(long)]
    read_only: bool,

    /// Kernel attribute cache TTL in milliseconds
    #[arg(long, default_value_t = 1000)]
    ttl_ms: u64,

    /// Overall timeout for uri requests in seconds (default: none)
    #[arg(long)]
    http_timeout_secs: Option<u64>,

    /// Grace period between SIGTERM and SIGKILL for process nodes
    #[arg(long, default_value_t = 2000)]
    kill_grace_ms: u64,

    /// Print every path of the built tree and exit
    #[arg(long)]
    traverse: bool,
}

impl Cli {
    fn tree_config(&self) -> TreeConfig {
        TreeConfig::default()
            .http_timeout(self.http_timeout_secs.map(Duration::from_secs))
            .kill_grace(Duration::from_millis(self.kill_grace_ms))
    }

    fn mount_config(&self) -> MountConfig {
        MountConfig::default()
            .attr_ttl(Duration::from_millis(self.ttl_ms))
            .allow_other(self.allow_other)
            .read_only(self.read_only)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    if !cli.spec.exists() {
        anyhow::bail!("Spec document does not exist: {}", cli.spec.display());
    }

    let ctx = BuildContext::new(cli.tree_config()).with_mount_point(&cli.mount);
    let dispatcher = Dispatcher::load(&cli.spec, &ctx)
        .with_context(|| format!("Failed to build tree from {}", cli.spec.display()))?;

    if cli.traverse {
        for path in dispatcher.traverse() {
            println!("{path}");
        }
        return Ok(());
    }

    if !cli.mount.exists() {
        anyhow::bail!("Mountpoint does not exist: {}", cli.mount.display());
    }

    mount_and_wait(&cli, dispatcher)
}

/// Mount the filesystem and wait for Ctrl+C.
fn mount_and_wait(cli: &Cli, dispatcher: Dispatcher) -> Result<()> {
    let config = cli.mount_config();
    let fs = TreeFS::new(dispatcher, config.clone());

    // Set up channel for signal handling
    let (tx, rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("Failed to set signal handler")?;

    info!(spec = %cli.spec.display(), "Mounting filesystem (press Ctrl+C to unmount)");

    let handle = spawn_mount(fs, &cli.mount, &config)
        .with_context(|| format!("Failed to mount filesystem at {}", cli.mount.display()))?;

    info!("Filesystem mounted at {}", cli.mount.display());

    match rx.recv() {
        Ok(()) => info!("Received interrupt signal, unmounting..."),
        Err(_) => warn!("Signal channel closed unexpectedly"),
    }

    handle.unmount();
    Ok(())
}
