//! Node Configuration

use anyhow::{anyhow, ensure, Context, Result};
use ed25519_dalek::VerifyingKey;
use generator::{
    GeneratorConfig, JsonRpcSignerClient, LocalSigner, QuorumSigner, RemoteSigner,
    BLOCK_PERIOD_MS, MAX_TXS_PER_BLOCK,
};
use ledger_core::DEFAULT_SNAPSHOT_INTERVAL;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

/// A node allowed to co-sign blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSignerConfig {
    /// JSON-RPC endpoint serving signBlock
    pub url: String,
    /// Base58 ed25519 public key
    pub public_key: String,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP RPC bind address
    pub rpc_addr: String,
    /// Ledger storage directory
    pub data_dir: PathBuf,
    /// Block period in milliseconds
    pub block_period_ms: u64,
    pub max_txs_per_block: usize,
    /// Heights between stored snapshots
    pub snapshot_interval: u64,
    pub skip_empty_blocks: bool,
    /// Base58 ed25519 seed (32 bytes)
    pub signing_key: Option<String>,
    pub remote_signers: Vec<RemoteSignerConfig>,
    /// Signatures required per block. Defaults to every configured signer.
    pub quorum: Option<usize>,
    pub signer_timeout_ms: u64,
    /// Leader RPC endpoint (follower mode)
    pub leader_url: Option<String>,
    /// Upper bound on one getBlocks long poll
    pub feed_timeout_ms: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_addr: "127.0.0.1:8899".to_string(),
            data_dir: PathBuf::from("./data"),
            block_period_ms: BLOCK_PERIOD_MS,
            max_txs_per_block: MAX_TXS_PER_BLOCK,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            skip_empty_blocks: false,
            signing_key: None,
            remote_signers: Vec::new(),
            quorum: None,
            signer_timeout_ms: 5_000,
            leader_url: None,
            feed_timeout_ms: Some(30_000),
        }
    }
}

impl NodeConfig {
    /// Load a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Reject settings the node cannot run with
    pub fn validate(&self) -> Result<()> {
        ensure!(self.block_period_ms > 0, "block_period_ms must be positive");
        ensure!(self.max_txs_per_block > 0, "max_txs_per_block must be positive");
        ensure!(self.snapshot_interval > 0, "snapshot_interval must be positive");
        if self.signing_key.is_some() {
            self.local_signer()?;
        }
        let signers = self.remote_signers()?.len() + usize::from(self.signing_key.is_some());
        if let Some(quorum) = self.quorum {
            ensure!(quorum >= 1, "quorum must be at least 1");
            ensure!(
                quorum <= signers,
                "quorum {} exceeds the {} configured signers",
                quorum,
                signers
            );
        }
        Ok(())
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            period: Duration::from_millis(self.block_period_ms),
            max_txs_per_block: self.max_txs_per_block,
            skip_empty_blocks: self.skip_empty_blocks,
        }
    }

    pub fn feed_timeout(&self) -> Option<Duration> {
        self.feed_timeout_ms.map(Duration::from_millis)
    }

    /// The configured signing key, if any
    pub fn local_signer(&self) -> Result<Option<LocalSigner>> {
        let Some(encoded) = &self.signing_key else {
            return Ok(None);
        };
        let seed = decode_key(encoded).context("invalid signing_key")?;
        Ok(Some(LocalSigner::from_seed(&seed)))
    }

    pub fn remote_signers(&self) -> Result<Vec<RemoteSigner>> {
        self.remote_signers
            .iter()
            .map(|remote| {
                let bytes = decode_key(&remote.public_key)
                    .with_context(|| format!("invalid public_key for signer {}", remote.url))?;
                let public_key = VerifyingKey::from_bytes(&bytes)
                    .with_context(|| format!("invalid public_key for signer {}", remote.url))?;
                Ok(RemoteSigner {
                    url: remote.url.clone(),
                    public_key,
                })
            })
            .collect()
    }

    /// Block signer for leader mode. `local` replaces the configured key.
    pub fn quorum_signer(&self, local: Option<LocalSigner>) -> Result<QuorumSigner> {
        let remotes = self.remote_signers()?;
        let signers = remotes.len() + usize::from(local.is_some());
        ensure!(signers > 0, "leader has no signing key and no remote signers");

        let quorum = self.quorum.unwrap_or(signers);
        ensure!(quorum >= 1, "quorum must be at least 1");
        ensure!(
            quorum <= signers,
            "quorum {} exceeds the {} configured signers",
            quorum,
            signers
        );

        let client = JsonRpcSignerClient::new(Duration::from_millis(self.signer_timeout_ms));
        Ok(QuorumSigner::new(local, remotes, quorum, Arc::new(client)))
    }
}

fn decode_key(encoded: &str) -> Result<[u8; 32]> {
    let bytes = bs58::decode(encoded).into_vec().context("not base58")?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| anyhow!("expected 32 bytes, got {}", len))
}
