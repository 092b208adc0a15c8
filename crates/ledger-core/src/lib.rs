//! Ledger Core - blocks, snapshots and the durable ledger engine
//!
//! This crate provides the storage side of the generator:
//! - Block, transaction and snapshot types with blake3 hashing
//! - The `LedgerEngine` trait consumed by the leader and the peer handlers
//! - A sled-backed engine with a transaction pool and one row per committed block

pub mod encoding;
pub mod engine;
pub mod persistence;
pub mod types;

pub use engine::{LedgerEngine, LedgerError};
pub use persistence::PersistentLedger;
pub use types::{Block, BlockSignature, Hash, Snapshot, Tx};

/// Largest accepted transaction payload in bytes
pub const MAX_TX_SIZE: usize = 64 * 1024;

/// Heights between stored snapshots
pub const DEFAULT_SNAPSHOT_INTERVAL: u64 = 10;
