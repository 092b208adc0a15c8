//! Test fixtures: pre-filled ledgers, stub engines and scripted signers

use crate::{error::SignerError, signer::BlockSigner};
use async_trait::async_trait;
use ledger_core::{
    engine::Result as LedgerResult, Block, Hash, LedgerEngine, LedgerError, PersistentLedger,
    Snapshot, Tx,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Temporary ledger with `height` committed blocks
pub async fn chain_ledger(height: u64) -> Arc<PersistentLedger> {
    let ledger = PersistentLedger::temporary(4).unwrap();
    let mut snapshot = Snapshot::empty();
    for h in 1..=height {
        let block = Block::next(&snapshot, vec![Tx::new(h.to_le_bytes().to_vec())], h);
        snapshot = ledger.apply_block(&snapshot, &block).await.unwrap();
        ledger.commit_block(&block, &snapshot).await.unwrap();
    }
    Arc::new(ledger)
}

/// Leaves blocks unsigned
pub struct PlainSigner;

#[async_trait]
impl BlockSigner for PlainSigner {
    async fn sign(&self, block: Block) -> Result<Block, SignerError> {
        Ok(block)
    }
}

/// Fails the first `failures` calls, then behaves like `PlainSigner`
pub struct FlakySigner {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakySigner {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockSigner for FlakySigner {
    async fn sign(&self, block: Block) -> Result<Block, SignerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(SignerError::Quorum {
                collected: 0,
                required: 1,
            });
        }
        Ok(block)
    }
}

/// Never finishes signing
pub struct StalledSigner;

#[async_trait]
impl BlockSigner for StalledSigner {
    async fn sign(&self, _block: Block) -> Result<Block, SignerError> {
        std::future::pending().await
    }
}

/// Ledger that only answers `recover`
pub struct StubLedger {
    recovered: Option<(Option<Block>, Snapshot)>,
}

impl StubLedger {
    pub fn recovering(block: Option<Block>, snapshot: Snapshot) -> Self {
        Self {
            recovered: Some((block, snapshot)),
        }
    }

    pub fn failing_recovery() -> Self {
        Self { recovered: None }
    }
}

#[async_trait]
impl LedgerEngine for StubLedger {
    async fn recover(&self) -> LedgerResult<(Option<Block>, Snapshot)> {
        self.recovered
            .clone()
            .ok_or_else(|| LedgerError::Corrupt("no tip record".to_string()))
    }

    async fn add_tx(&self, _tx: Tx) -> LedgerResult<Hash> {
        Err(LedgerError::Closed)
    }

    async fn pending_txs(&self, _limit: usize) -> LedgerResult<Vec<Tx>> {
        Ok(Vec::new())
    }

    async fn pending_block(&self) -> LedgerResult<Option<Block>> {
        Ok(None)
    }

    async fn save_pending_block(&self, _block: &Block) -> LedgerResult<()> {
        Err(LedgerError::Closed)
    }

    async fn apply_block(&self, _snapshot: &Snapshot, _block: &Block) -> LedgerResult<Snapshot> {
        Err(LedgerError::Closed)
    }

    async fn commit_block(&self, _block: &Block, _snapshot: &Snapshot) -> LedgerResult<()> {
        Err(LedgerError::Closed)
    }

    async fn wait_for_block(&self, _height: u64) -> LedgerResult<()> {
        Err(LedgerError::Closed)
    }

    async fn blocks_after(&self, _height: u64) -> LedgerResult<Vec<Block>> {
        Ok(Vec::new())
    }

    async fn height(&self) -> LedgerResult<u64> {
        Ok(0)
    }
}
