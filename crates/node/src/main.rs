//! Ledger Node
//!
//! Main entry point for the ledger node.
//! Supports leader mode (produces blocks) and follower mode (replicates the
//! leader's chain). Both serve the peer JSON-RPC interface and persist the
//! chain to disk.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ed25519_dalek::SigningKey;
use generator::{generate, LocalSigner};
use ledger_core::{LedgerEngine, PersistentLedger};
use rpc_server::{
    BlockFeed, Follower, HttpRpcServer, RpcContext, SigningService, SubmissionGateway,
};
use std::{path::PathBuf, sync::Arc};
use tokio::{signal, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::NodeConfig;

/// Node mode
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Leader mode - produces and commits blocks
    Leader,
    /// Follower mode - replicates blocks from the leader
    Follower,
}

/// Ledger node
#[derive(Parser, Debug)]
#[command(name = "ledger-node")]
#[command(about = "Leader-driven block production and replication", long_about = None)]
struct Args {
    /// Node mode (leader or follower)
    #[arg(long, value_enum, default_value = "leader")]
    mode: Mode,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP RPC bind address
    #[arg(long)]
    rpc_addr: Option<String>,

    /// Data directory for the ledger
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Block period in milliseconds
    #[arg(long)]
    block_period_ms: Option<u64>,

    /// Do not produce blocks on ticks with no pending transactions
    #[arg(long)]
    skip_empty_blocks: bool,

    /// Leader RPC URL (follower mode)
    #[arg(long)]
    leader_url: Option<String>,

    /// Upper bound on one getBlocks long poll in milliseconds
    #[arg(long)]
    feed_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn node_config(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };

        if let Some(rpc_addr) = &self.rpc_addr {
            config.rpc_addr = rpc_addr.clone();
        }
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(block_period_ms) = self.block_period_ms {
            config.block_period_ms = block_period_ms;
        }
        if self.skip_empty_blocks {
            config.skip_empty_blocks = true;
        }
        if let Some(leader_url) = &self.leader_url {
            config.leader_url = Some(leader_url.clone());
        }
        if let Some(feed_timeout_ms) = self.feed_timeout_ms {
            config.feed_timeout_ms = Some(feed_timeout_ms);
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.node_config()?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_os_signals(shutdown.clone()));

    match args.mode {
        Mode::Leader => run_leader(config, shutdown).await,
        Mode::Follower => run_follower(config, shutdown).await,
    }
}

/// Run in leader mode - produce blocks until shutdown or a fatal error
async fn run_leader(config: NodeConfig, shutdown: CancellationToken) -> Result<()> {
    tracing::info!("Starting ledger node - LEADER MODE");
    tracing::info!("  HTTP RPC: {}", config.rpc_addr);
    tracing::info!("  Block period: {}ms", config.block_period_ms);
    tracing::info!("  Data directory: {:?}", config.data_dir);

    let ledger = open_ledger(&config)?;

    let local = match config.local_signer()? {
        Some(signer) => Some(signer),
        None if config.remote_signers.is_empty() => {
            tracing::warn!("No signing key configured, using an ephemeral key");
            Some(LocalSigner::new(SigningKey::generate(&mut rand::rngs::OsRng)))
        }
        None => None,
    };
    let signer = config.quorum_signer(local)?;
    tracing::info!(
        "  Signers: {} (quorum {})",
        signer.signer_count(),
        signer.quorum()
    );

    let http_server = spawn_rpc(&config, ledger.clone(), shutdown.clone())?;

    let result = generate(
        config.generator_config(),
        ledger.clone(),
        Arc::new(signer),
        shutdown.clone(),
    )
    .await;

    // Demoted or failed; stop serving either way
    shutdown.cancel();
    stop_rpc(http_server).await;

    match result {
        Ok(()) => {
            tracing::info!(height = ledger.height().await?, "Leader stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Block generator failed");
            Err(e).context("block generator failed")
        }
    }
}

/// Run in follower mode - replicate the leader's chain
async fn run_follower(config: NodeConfig, shutdown: CancellationToken) -> Result<()> {
    let leader_url = config
        .leader_url
        .clone()
        .context("follower mode needs leader_url")?;

    tracing::info!("Starting ledger node - FOLLOWER MODE");
    tracing::info!("  HTTP RPC: {}", config.rpc_addr);
    tracing::info!("  Leader: {}", leader_url);
    tracing::info!("  Data directory: {:?}", config.data_dir);

    let ledger = open_ledger(&config)?;
    let http_server = spawn_rpc(&config, ledger.clone(), shutdown.clone())?;

    let result = Follower::new(leader_url, ledger).run(shutdown.clone()).await;

    shutdown.cancel();
    stop_rpc(http_server).await;

    result.context("follower failed")
}

fn open_ledger(config: &NodeConfig) -> Result<Arc<PersistentLedger>> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {:?}", config.data_dir))?;
    let ledger = PersistentLedger::open(&config.data_dir, config.snapshot_interval)
        .with_context(|| format!("opening ledger at {:?}", config.data_dir))?;
    Ok(Arc::new(ledger))
}

/// Start the HTTP RPC server. Its own key, if configured, answers signBlock.
fn spawn_rpc(
    config: &NodeConfig,
    ledger: Arc<PersistentLedger>,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>> {
    let mut feed = BlockFeed::new(ledger.clone());
    if let Some(timeout) = config.feed_timeout() {
        feed = feed.with_max_wait(timeout);
    }

    let context = Arc::new(RpcContext {
        gateway: SubmissionGateway::new(ledger),
        feed,
        block_signer: config.local_signer()?.map(SigningService::new),
        shutdown: shutdown.clone(),
    });

    let addr = config.rpc_addr.clone();
    Ok(tokio::spawn(async move {
        let server = HttpRpcServer::new(context);
        if let Err(e) = server.run(&addr, shutdown.clone()).await {
            tracing::error!("HTTP RPC server error: {}", e);
            shutdown.cancel();
        }
    }))
}

async fn stop_rpc(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        tracing::warn!("HTTP RPC server task failed: {}", e);
    }
}

#[cfg(unix)]
async fn watch_os_signals(shutdown: CancellationToken) {
    use signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(reason = %e, "failed to install signal handlers");
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("SIGTERM received, shutting down"),
        _ = sigint.recv() => tracing::info!("SIGINT received, shutting down"),
        _ = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}

#[cfg(not(unix))]
async fn watch_os_signals(shutdown: CancellationToken) {
    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Ctrl+C received, shutting down"),
            Err(e) => {
                tracing::warn!(reason = %e, "ctrl+c watcher failed");
                return;
            }
        },
        _ = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "ledger-node",
            "--mode",
            "follower",
            "--leader-url",
            "http://leader:8899",
            "--block-period-ms",
            "500",
            "--skip-empty-blocks",
        ]);
        assert!(matches!(args.mode, Mode::Follower));

        let config = args.node_config().unwrap();
        assert_eq!(config.leader_url.as_deref(), Some("http://leader:8899"));
        assert_eq!(config.block_period_ms, 500);
        assert!(config.skip_empty_blocks);
        assert_eq!(config.rpc_addr, "127.0.0.1:8899");
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = Args::parse_from(["ledger-node", "--block-period-ms", "0"]);
        assert!(args.node_config().is_err());
    }

    #[tokio::test]
    async fn test_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            data_dir: dir.path().join("ledger"),
            ..Default::default()
        };

        {
            let ledger = open_ledger(&config).unwrap();
            let (_, snapshot) = ledger.recover().await.unwrap();
            let block = ledger_core::Block::next(&snapshot, vec![], 1);
            let next = ledger.apply_block(&snapshot, &block).await.unwrap();
            ledger.commit_block(&block, &next).await.unwrap();
        }

        let ledger = open_ledger(&config).unwrap();
        assert_eq!(ledger.height().await.unwrap(), 1);
    }
}
