//! Block Feed - long-poll replication endpoint
//!
//! Reads committed blocks straight from durable storage, so it works on any
//! node, leader or not.

use ledger_core::{Block, LedgerEngine, LedgerError};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("canceled while waiting for block {height}")]
    Cancelled { height: u64 },

    #[error("waiting for block {height}: {source}")]
    Wait {
        height: u64,
        #[source]
        source: LedgerError,
    },

    #[error("querying blocks from storage: {0}")]
    Query(#[source] LedgerError),
}

/// Serves the ordered tail of the chain to followers
#[derive(Clone)]
pub struct BlockFeed {
    ledger: Arc<dyn LedgerEngine>,
    /// Upper bound on one long poll
    max_wait: Option<Duration>,
}

impl BlockFeed {
    pub fn new(ledger: Arc<dyn LedgerEngine>) -> Self {
        Self {
            ledger,
            max_wait: None,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Every block above `after_height`, ascending.
    ///
    /// Waits until `after_height + 1` is committed. Nothing is returned on
    /// failure.
    pub async fn get_blocks(&self, after_height: u64, cancel: &CancellationToken) -> Result<Vec<Block>, FeedError> {
        // No block can ever follow the last representable height
        let Some(height) = after_height.checked_add(1) else {
            return Ok(Vec::new());
        };
        let wait = self.ledger.wait_for_block(height);

        let waited = match self.max_wait {
            Some(max_wait) => tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = tokio::time::timeout(max_wait, wait) => result.ok(),
            },
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = wait => Some(result),
            },
        };

        match waited {
            Some(result) => result.map_err(|source| FeedError::Wait { height, source })?,
            None => return Err(FeedError::Cancelled { height }),
        }

        let blocks = self
            .ledger
            .blocks_after(after_height)
            .await
            .map_err(FeedError::Query)?;
        tracing::debug!(after_height, count = blocks.len(), "Serving blocks");
        Ok(blocks)
    }

    /// Height of the latest committed block
    pub async fn tip_height(&self) -> Result<u64, FeedError> {
        self.ledger.height().await.map_err(FeedError::Query)
    }
}
