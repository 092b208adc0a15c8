//! The ledger engine contract shared by the leader and the peer handlers

use crate::types::{Block, Hash, Snapshot, Tx};
use async_trait::async_trait;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors raised by a ledger engine
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("block height mismatch: expected {expected}, got {actual}")]
    HeightMismatch { expected: u64, actual: u64 },

    #[error("block {height} does not extend the current tip")]
    BrokenLink { height: u64 },

    #[error("snapshot does not reflect block {height}")]
    SnapshotMismatch { height: u64 },

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("transaction {0} already committed")]
    DuplicateTransaction(Hash),

    #[error("corrupt ledger: {0}")]
    Corrupt(String),

    #[error("ledger closed")]
    Closed,
}

/// Durable transaction pool, state application and block storage.
///
/// Implementations provide their own atomicity: `commit_block` either stores
/// the block row and its side effects or nothing.
#[async_trait]
pub trait LedgerEngine: Send + Sync {
    /// Newest committed block and the snapshot it produces.
    ///
    /// `None` only for an empty chain. Safe to call repeatedly.
    async fn recover(&self) -> Result<(Option<Block>, Snapshot)>;

    /// Admit a transaction to the pending pool
    async fn add_tx(&self, tx: Tx) -> Result<Hash>;

    /// Up to `limit` transactions from the pending pool
    async fn pending_txs(&self, limit: usize) -> Result<Vec<Tx>>;

    /// The built but uncommitted block, if one was saved
    async fn pending_block(&self) -> Result<Option<Block>>;

    /// Record `block` as the pending block, replacing any earlier one
    async fn save_pending_block(&self, block: &Block) -> Result<()>;

    /// Validate `block` against `snapshot` and return the resulting state.
    /// Nothing is persisted.
    async fn apply_block(&self, snapshot: &Snapshot, block: &Block) -> Result<Snapshot>;

    /// Durably append `block` with the snapshot it produces.
    ///
    /// Fails with `HeightMismatch` unless `block` is exactly one above the
    /// stored tip.
    async fn commit_block(&self, block: &Block, snapshot: &Snapshot) -> Result<()>;

    /// Suspend until a block at `height` is committed. Drop the future to cancel.
    async fn wait_for_block(&self, height: u64) -> Result<()>;

    /// Every stored block above `height`, ascending
    async fn blocks_after(&self, height: u64) -> Result<Vec<Block>>;

    /// Height of the stored tip (0 when empty)
    async fn height(&self) -> Result<u64>;
}
