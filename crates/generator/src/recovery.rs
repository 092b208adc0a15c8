//! Head recovery after promotion

use crate::{error::RecoveryError, head::Head};
use ledger_core::LedgerEngine;
use std::sync::Arc;

/// Resolves the authoritative head from the ledger once per promotion
pub struct RecoveryCoordinator {
    ledger: Arc<dyn LedgerEngine>,
}

impl RecoveryCoordinator {
    pub fn new(ledger: Arc<dyn LedgerEngine>) -> Self {
        Self { ledger }
    }

    /// Recover the head left by the previous leader.
    ///
    /// An error here is fatal to the caller: the head is not trustworthy.
    pub async fn recover(&self) -> Result<Head, RecoveryError> {
        let (block, snapshot) = self.ledger.recover().await?;

        if !snapshot.reflects(block.as_ref()) {
            return Err(RecoveryError::Inconsistent(format!(
                "snapshot at height {} does not match block {:?}",
                snapshot.height,
                block.as_ref().map(|b| b.height)
            )));
        }

        tracing::info!(
            height = snapshot.height,
            block_hash = %snapshot.block_hash,
            "Recovered head"
        );
        Ok(Head::new(block, snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chain_ledger, StubLedger};
    use ledger_core::{Block, Snapshot, Tx};

    #[tokio::test]
    async fn test_recover_empty_chain() {
        let ledger = chain_ledger(0).await;
        let head = RecoveryCoordinator::new(ledger).recover().await.unwrap();
        assert_eq!(head.height(), 0);
        assert!(head.block().is_none());
        assert_eq!(head.next_height(), 1);
    }

    #[tokio::test]
    async fn test_recover_existing_chain() {
        let ledger = chain_ledger(13).await;
        let head = RecoveryCoordinator::new(ledger).recover().await.unwrap();
        assert_eq!(head.height(), 13);
        assert_eq!(head.block().map(|b| b.height), Some(13));
    }

    #[tokio::test]
    async fn test_mismatched_pair_is_rejected() {
        let block = Block::next(&Snapshot::empty(), vec![Tx::new(b"a".to_vec())], 1);
        let stub = StubLedger::recovering(Some(block), Snapshot::empty());
        let err = RecoveryCoordinator::new(Arc::new(stub))
            .recover()
            .await
            .unwrap_err();
        assert!(matches!(err, RecoveryError::Inconsistent(_)));
    }

    #[tokio::test]
    async fn test_ledger_failure_is_reported() {
        let stub = StubLedger::failing_recovery();
        let err = RecoveryCoordinator::new(Arc::new(stub))
            .recover()
            .await
            .unwrap_err();
        assert!(matches!(err, RecoveryError::Ledger(_)));
    }
}
