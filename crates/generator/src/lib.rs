//! Block Generator - leader-side block production
//!
//! Architecture:
//! - On promotion the leader recovers the head from the ledger
//! - A block left pending by a crashed leader is committed if it is next
//! - One block is built, signed and committed per period until demotion
//!
//! The head is owned by the scheduler task alone. Peer-facing handlers work
//! through the `LedgerEngine` and never see it.

pub mod commit;
pub mod error;
pub mod head;
pub mod recovery;
pub mod scheduler;
pub mod signer;

#[cfg(test)]
mod testing;

pub use commit::CommitPipeline;
pub use error::{CommitError, GeneratorError, ProductionError, RecoveryError, SignerError};
pub use head::Head;
pub use recovery::RecoveryCoordinator;
pub use scheduler::{
    generate, CycleOutcome, GeneratorConfig, LeaderScheduler, BLOCK_PERIOD_MS, MAX_TXS_PER_BLOCK,
};
pub use signer::{
    verify_signature, BlockSigner, JsonRpcSignerClient, LocalSigner, QuorumSigner, RemoteSigner,
    RemoteSignerClient,
};
