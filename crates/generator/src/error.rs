//! Error types for the generator

use ledger_core::LedgerError;
use thiserror::Error;

/// Recovery could not produce an unambiguous head
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("ledger recovery failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("recovered head is inconsistent: {0}")]
    Inconsistent(String),
}

/// A candidate block was not committed. Nothing was applied.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("candidate height {actual} does not extend head (expected {expected})")]
    StaleHeight { expected: u64, actual: u64 },

    #[error("candidate rejected by the ledger: {0}")]
    Apply(#[source] LedgerError),

    #[error("storing block failed: {0}")]
    Store(#[source] LedgerError),
}

/// Building or signing a block failed
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("collected {collected} of {required} required signatures")]
    Quorum { collected: usize, required: usize },

    #[error("remote signer {url} failed: {reason}")]
    Remote { url: String, reason: String },

    #[error("remote signer {url} returned an invalid signature")]
    InvalidSignature { url: String },
}

/// One production cycle failed. Transient: the loop continues.
#[derive(Debug, Error)]
pub enum ProductionError {
    #[error("reading pending transactions: {0}")]
    PendingTxs(#[source] LedgerError),

    #[error("loading pending block: {0}")]
    PendingBlock(#[source] LedgerError),

    #[error("signing block: {0}")]
    Sign(#[from] SignerError),

    #[error("saving pending block: {0}")]
    SavePending(#[source] LedgerError),

    #[error("committing block: {0}")]
    Commit(#[from] CommitError),
}

/// Startup failed. Fatal: the process must not keep producing blocks.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("recovery failed: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("loading pending block: {0}")]
    PendingBlock(#[source] LedgerError),

    #[error("committing pending block: {0}")]
    Reconcile(#[source] CommitError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_name_the_stage() {
        let err = ProductionError::from(CommitError::StaleHeight {
            expected: 5,
            actual: 4,
        });
        assert_eq!(
            err.to_string(),
            "committing block: candidate height 4 does not extend head (expected 5)"
        );

        let err = GeneratorError::PendingBlock(LedgerError::Closed);
        assert_eq!(err.to_string(), "loading pending block: ledger closed");
    }
}
