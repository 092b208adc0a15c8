//! The leader's view of the ledger tip

use ledger_core::{Block, Snapshot};

/// Current block and the snapshot it produces.
///
/// Owned by the scheduler; only `CommitPipeline` replaces it, and always both
/// fields at once. Not persisted: the ledger is the durable copy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Head {
    block: Option<Block>,
    snapshot: Snapshot,
}

impl Head {
    pub(crate) fn new(block: Option<Block>, snapshot: Snapshot) -> Self {
        Self { block, snapshot }
    }

    /// Latest committed block, `None` on an empty chain
    pub fn block(&self) -> Option<&Block> {
        self.block.as_ref()
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn height(&self) -> u64 {
        self.snapshot.height
    }

    /// Height the next committed block must have
    pub fn next_height(&self) -> u64 {
        self.snapshot.height + 1
    }
}
