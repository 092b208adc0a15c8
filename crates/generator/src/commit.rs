//! Commit pipeline - applies a finished block and advances the head

use crate::{error::CommitError, head::Head};
use ledger_core::{Block, LedgerEngine};
use std::sync::Arc;

/// Applies candidate blocks to the ledger and replaces the head
pub struct CommitPipeline {
    ledger: Arc<dyn LedgerEngine>,
}

impl CommitPipeline {
    pub fn new(ledger: Arc<dyn LedgerEngine>) -> Self {
        Self { ledger }
    }

    /// Commit `candidate` on top of `head`.
    ///
    /// Only a candidate at exactly `head.height() + 1` is accepted. On any
    /// error the head is left untouched.
    pub async fn commit<'h>(&self, head: &'h mut Head, candidate: Block) -> Result<&'h Head, CommitError> {
        let expected = head.next_height();
        if candidate.height != expected {
            return Err(CommitError::StaleHeight {
                expected,
                actual: candidate.height,
            });
        }

        let snapshot = self
            .ledger
            .apply_block(head.snapshot(), &candidate)
            .await
            .map_err(CommitError::Apply)?;
        self.ledger
            .commit_block(&candidate, &snapshot)
            .await
            .map_err(CommitError::Store)?;

        tracing::debug!(
            height = candidate.height,
            txs = candidate.transactions.len(),
            signatures = candidate.signatures.len(),
            "Head advanced"
        );

        *head = Head::new(Some(candidate), snapshot);
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{recovery::RecoveryCoordinator, testing::chain_ledger};
    use ledger_core::{LedgerError, Snapshot, Tx};
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_commit_advances_head() {
        let ledger = chain_ledger(3).await;
        let mut head = RecoveryCoordinator::new(ledger.clone()).recover().await.unwrap();
        let pipeline = CommitPipeline::new(ledger.clone());

        let candidate = Block::next(head.snapshot(), vec![Tx::new(b"next".to_vec())], 9);
        let new_head = pipeline.commit(&mut head, candidate.clone()).await.unwrap();
        assert_eq!(new_head.height(), 4);
        assert_eq!(new_head.block(), Some(&candidate));
        assert!(new_head.snapshot().reflects(Some(&candidate)));
        assert_eq!(ledger.height().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_ledger_rejection_leaves_head() {
        let ledger = chain_ledger(2).await;
        let mut head = RecoveryCoordinator::new(ledger.clone()).recover().await.unwrap();
        let before = head.clone();
        let pipeline = CommitPipeline::new(ledger.clone());

        let mut candidate = Block::next(head.snapshot(), vec![], 9);
        candidate.previous_block_hash = Snapshot::empty().block_hash;
        let err = pipeline.commit(&mut head, candidate).await.unwrap_err();
        assert!(matches!(err, CommitError::Apply(LedgerError::BrokenLink { height: 3 })));
        assert_eq!(head, before);
        assert_eq!(ledger.height().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_store_rejection_after_race() {
        // Another writer commits height 3 behind this head's back.
        let ledger = chain_ledger(2).await;
        let mut head = RecoveryCoordinator::new(ledger.clone()).recover().await.unwrap();
        let racer = Block::next(head.snapshot(), vec![Tx::new(b"racer".to_vec())], 1);
        let racer_snapshot = head.snapshot().apply(&racer);
        ledger.commit_block(&racer, &racer_snapshot).await.unwrap();

        let pipeline = CommitPipeline::new(ledger.clone());
        let candidate = Block::next(head.snapshot(), vec![Tx::new(b"mine".to_vec())], 2);
        let err = pipeline.commit(&mut head, candidate).await.unwrap_err();
        assert!(matches!(
            err,
            CommitError::Store(LedgerError::HeightMismatch { expected: 4, actual: 3 })
        ));
        assert_eq!(head.height(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_rejects_any_height_but_next(tip in 0u64..6, height in 0u64..64) {
            prop_assume!(height != tip + 1);

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let ledger = chain_ledger(tip).await;
                let mut head = RecoveryCoordinator::new(ledger.clone()).recover().await.unwrap();
                let before = head.clone();

                let mut candidate = Block::next(head.snapshot(), vec![], 0);
                candidate.height = height;
                let result = CommitPipeline::new(ledger.clone()).commit(&mut head, candidate).await;

                assert!(matches!(
                    result,
                    Err(CommitError::StaleHeight { expected, actual })
                        if expected == tip + 1 && actual == height
                ));
                assert_eq!(head, before);
                assert_eq!(ledger.height().await.unwrap(), tip);
            });
        }
    }
}
