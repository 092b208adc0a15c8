//! Submission Gateway - forwards peer transactions to the ledger pool

use ledger_core::{Hash, LedgerEngine, LedgerError, Tx};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("transaction admission failed: {0}")]
    Admission(#[source] LedgerError),
}

/// Hands submitted transactions to the ledger unchanged
#[derive(Clone)]
pub struct SubmissionGateway {
    ledger: Arc<dyn LedgerEngine>,
}

impl SubmissionGateway {
    pub fn new(ledger: Arc<dyn LedgerEngine>) -> Self {
        Self { ledger }
    }

    /// Admit `tx` to the pending pool. Validity is the ledger's call.
    pub async fn submit(&self, tx: Tx) -> Result<Hash, SubmitError> {
        self.ledger.add_tx(tx).await.map_err(SubmitError::Admission)
    }
}
