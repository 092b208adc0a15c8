//! Follower replication
//!
//! Long-polls the leader's `getBlocks` and commits every returned block to
//! the local ledger in height order.

use crate::methods::UNAVAILABLE_CODE;
use jsonrpsee::{
    core::client::{ClientT, Error as ClientError},
    http_client::HttpClient,
    rpc_params,
};
use ledger_core::{Block, LedgerEngine, LedgerError, Snapshot};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum FollowerError {
    #[error("building client for {url}: {reason}")]
    Client { url: String, reason: String },

    #[error("local ledger: {0}")]
    Ledger(#[from] LedgerError),
}

/// Replicates the leader's chain into a local ledger
pub struct Follower {
    leader_url: String,
    ledger: Arc<dyn LedgerEngine>,
    /// Must exceed the leader's long-poll bound
    request_timeout: Duration,
    retry_delay: Duration,
}

impl Follower {
    pub fn new(leader_url: impl Into<String>, ledger: Arc<dyn LedgerEngine>) -> Self {
        Self {
            leader_url: leader_url.into(),
            ledger,
            request_timeout: Duration::from_secs(60),
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Follow the leader until `cancel` fires.
    ///
    /// Leader errors are retried. A block that does not apply on top of the
    /// local chain stops the follower.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), FollowerError> {
        let client = HttpClient::builder()
            .request_timeout(self.request_timeout)
            .build(&self.leader_url)
            .map_err(|e| FollowerError::Client {
                url: self.leader_url.clone(),
                reason: e.to_string(),
            })?;

        let (_, mut snapshot) = self.ledger.recover().await?;
        tracing::info!(leader = %self.leader_url, height = snapshot.height, "Following leader");

        loop {
            let request = client.request::<Vec<Block>, _>("getBlocks", rpc_params![snapshot.height]);
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                response = request => response,
            };

            match response {
                Ok(blocks) => {
                    snapshot = self.apply_blocks(snapshot, blocks).await?;
                }
                // Long poll expired on the leader; ask again
                Err(ClientError::Call(e)) if e.code() == UNAVAILABLE_CODE => {
                    tracing::trace!(height = snapshot.height, "No new blocks");
                }
                Err(e) => {
                    tracing::warn!(leader = %self.leader_url, error = %e, "getBlocks failed, retrying");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        tracing::info!(height = snapshot.height, "Follower stopped");
        Ok(())
    }

    /// Commit `blocks` on top of `snapshot`. Heights already held are skipped.
    pub async fn apply_blocks(&self, mut snapshot: Snapshot, blocks: Vec<Block>) -> Result<Snapshot, FollowerError> {
        for block in blocks {
            if block.height <= snapshot.height {
                continue;
            }
            let next = self.ledger.apply_block(&snapshot, &block).await?;
            self.ledger.commit_block(&block, &next).await?;
            tracing::debug!(height = block.height, txs = block.transactions.len(), "Replicated block");
            snapshot = next;
        }
        Ok(snapshot)
    }
}
