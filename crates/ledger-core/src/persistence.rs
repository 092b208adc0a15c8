//! Persistence Layer for the ledger
//!
//! Uses the sled embedded database. Every committed block is one row keyed by
//! its big-endian height, so key order is height order. Snapshots are stored
//! every `snapshot_interval` heights and recovery replays the blocks above the
//! newest one.

use crate::{
    engine::{LedgerEngine, LedgerError, Result},
    types::{Block, Hash, Snapshot, Tx},
    MAX_TX_SIZE,
};
use async_trait::async_trait;
use sled::{
    transaction::{
        ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
        Transactional,
    },
    Db, Tree,
};
use std::{collections::HashSet, path::Path};
use tokio::sync::watch;

const TIP_KEY: &[u8] = b"tip";
const PENDING_BLOCK_KEY: &[u8] = b"block";
const PENDING_HEIGHT_KEY: &[u8] = b"height";

/// sled-backed ledger engine
pub struct PersistentLedger {
    /// Sled database instance
    db: Db,
    /// Committed blocks by height
    blocks: Tree,
    /// Periodic snapshots by height
    snapshots: Tree,
    /// Pending transaction pool by tx id
    pool: Tree,
    /// Committed tx id -> height
    committed: Tree,
    /// The single pending block
    pending: Tree,
    /// Tip height
    meta: Tree,
    snapshot_interval: u64,
    /// Tip notifications for `wait_for_block`
    tip: watch::Sender<u64>,
}

impl PersistentLedger {
    /// Open or create a ledger at the given path
    pub fn open<P: AsRef<Path>>(path: P, snapshot_interval: u64) -> Result<Self> {
        let db = sled::open(&path)?;
        tracing::info!("Opened ledger at {:?}", path.as_ref());
        Self::from_db(db, snapshot_interval)
    }

    /// A ledger that lives only as long as this handle
    pub fn temporary(snapshot_interval: u64) -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, snapshot_interval)
    }

    fn from_db(db: Db, snapshot_interval: u64) -> Result<Self> {
        let blocks = db.open_tree("blocks")?;
        let snapshots = db.open_tree("snapshots")?;
        let pool = db.open_tree("pool")?;
        let committed = db.open_tree("committed_txs")?;
        let pending = db.open_tree("pending")?;
        let meta = db.open_tree("meta")?;

        let height = read_height(&meta)?;
        let (tip, _) = watch::channel(height);

        Ok(Self {
            db,
            blocks,
            snapshots,
            pool,
            committed,
            pending,
            meta,
            snapshot_interval: snapshot_interval.max(1),
            tip,
        })
    }

    fn load_block(&self, height: u64) -> Result<Option<Block>> {
        match self.blocks.get(height.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn snapshot_due(&self, height: u64) -> bool {
        height == 1 || height % self.snapshot_interval == 0
    }

    fn check_tx(&self, tx: &Tx) -> Result<Hash> {
        if tx.payload.is_empty() {
            return Err(LedgerError::InvalidTransaction("empty payload".to_string()));
        }
        if tx.payload.len() > MAX_TX_SIZE {
            return Err(LedgerError::InvalidTransaction(format!(
                "payload of {} bytes exceeds {}",
                tx.payload.len(),
                MAX_TX_SIZE
            )));
        }
        let id = tx.id();
        if self.committed.contains_key(id.as_bytes())? {
            return Err(LedgerError::DuplicateTransaction(id));
        }
        Ok(id)
    }
}

#[async_trait]
impl LedgerEngine for PersistentLedger {
    async fn recover(&self) -> Result<(Option<Block>, Snapshot)> {
        let tip = read_height(&self.meta)?;

        let mut snapshot = match self.snapshots.last()? {
            Some((_, bytes)) => bincode::deserialize::<Snapshot>(&bytes)?,
            None => Snapshot::empty(),
        };
        if snapshot.height > tip {
            return Err(LedgerError::Corrupt(format!(
                "snapshot at height {} is above tip {}",
                snapshot.height, tip
            )));
        }

        let mut block = None;
        if snapshot.height > 0 {
            let stored = self.load_block(snapshot.height)?.ok_or_else(|| {
                LedgerError::Corrupt(format!("missing block {}", snapshot.height))
            })?;
            if !snapshot.reflects(Some(&stored)) {
                return Err(LedgerError::Corrupt(format!(
                    "snapshot does not match block {}",
                    stored.height
                )));
            }
            block = Some(stored);
        }

        let replay_from = snapshot.height + 1;
        for height in replay_from..=tip {
            let next = self
                .load_block(height)?
                .ok_or_else(|| LedgerError::Corrupt(format!("missing block {}", height)))?;
            if next.previous_block_hash != snapshot.block_hash {
                return Err(LedgerError::Corrupt(format!(
                    "block {} does not link to block {}",
                    height,
                    height - 1
                )));
            }
            snapshot = snapshot.apply(&next);
            block = Some(next);
        }

        tracing::info!(
            height = tip,
            replayed = tip + 1 - replay_from,
            "Recovered ledger head"
        );
        Ok((block, snapshot))
    }

    async fn add_tx(&self, tx: Tx) -> Result<Hash> {
        let id = self.check_tx(&tx)?;
        self.pool.insert(id.as_bytes(), bincode::serialize(&tx)?)?;
        tracing::trace!(tx = %id, "Admitted transaction");
        Ok(id)
    }

    async fn pending_txs(&self, limit: usize) -> Result<Vec<Tx>> {
        self.pool
            .iter()
            .values()
            .take(limit)
            .map(|bytes| -> Result<Tx> { Ok(bincode::deserialize(&bytes?)?) })
            .collect()
    }

    async fn pending_block(&self) -> Result<Option<Block>> {
        match self.pending.get(PENDING_BLOCK_KEY)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save_pending_block(&self, block: &Block) -> Result<()> {
        let bytes = bincode::serialize(block)?;
        let height = block.height.to_be_bytes();

        self.pending
            .transaction(|pending| -> ConflictableTransactionResult<(), LedgerError> {
                pending.insert(PENDING_BLOCK_KEY, bytes.as_slice())?;
                pending.insert(PENDING_HEIGHT_KEY, &height[..])?;
                Ok(())
            })
            .map_err(into_ledger_error)?;
        self.pending.flush_async().await?;
        Ok(())
    }

    async fn apply_block(&self, snapshot: &Snapshot, block: &Block) -> Result<Snapshot> {
        if block.height != snapshot.height + 1 {
            return Err(LedgerError::HeightMismatch {
                expected: snapshot.height + 1,
                actual: block.height,
            });
        }
        if block.previous_block_hash != snapshot.block_hash {
            return Err(LedgerError::BrokenLink {
                height: block.height,
            });
        }

        let mut seen = HashSet::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            let id = self.check_tx(tx)?;
            if !seen.insert(id) {
                return Err(LedgerError::DuplicateTransaction(id));
            }
        }

        Ok(snapshot.apply(block))
    }

    async fn commit_block(&self, block: &Block, snapshot: &Snapshot) -> Result<()> {
        if !snapshot.reflects(Some(block)) {
            return Err(LedgerError::SnapshotMismatch {
                height: block.height,
            });
        }

        let key = block.height.to_be_bytes();
        let block_bytes = bincode::serialize(block)?;
        let snapshot_bytes = if self.snapshot_due(block.height) {
            Some(bincode::serialize(snapshot)?)
        } else {
            None
        };
        let tx_ids: Vec<Hash> = block.transactions.iter().map(Tx::id).collect();

        (
            &self.blocks,
            &self.snapshots,
            &self.pool,
            &self.committed,
            &self.pending,
            &self.meta,
        )
            .transaction(
                |(blocks, snapshots, pool, committed, pending, meta)| -> ConflictableTransactionResult<(), LedgerError> {
                    let tip = match meta.get(TIP_KEY)? {
                        Some(bytes) => decode_height(&bytes).map_err(ConflictableTransactionError::Abort)?,
                        None => 0,
                    };
                    if block.height != tip + 1 {
                        return Err(ConflictableTransactionError::Abort(
                            LedgerError::HeightMismatch {
                                expected: tip + 1,
                                actual: block.height,
                            },
                        ));
                    }

                    blocks.insert(&key[..], block_bytes.as_slice())?;
                    meta.insert(TIP_KEY, &key[..])?;
                    if let Some(bytes) = &snapshot_bytes {
                        snapshots.insert(&key[..], bytes.as_slice())?;
                    }
                    for id in &tx_ids {
                        pool.remove(&id.as_bytes()[..])?;
                        committed.insert(&id.as_bytes()[..], &key[..])?;
                    }

                    if let Some(bytes) = pending.get(PENDING_HEIGHT_KEY)? {
                        let pending_height =
                            decode_height(&bytes).map_err(ConflictableTransactionError::Abort)?;
                        if pending_height <= block.height {
                            pending.remove(PENDING_BLOCK_KEY)?;
                            pending.remove(PENDING_HEIGHT_KEY)?;
                        }
                    }
                    Ok(())
                },
            )
            .map_err(into_ledger_error)?;

        // Visible to readers from here on, so waiters must hear about it even
        // if this future is dropped during the flush.
        self.tip.send_replace(block.height);
        self.db.flush_async().await?;

        tracing::debug!(
            height = block.height,
            txs = block.transactions.len(),
            "Committed block"
        );
        Ok(())
    }

    async fn wait_for_block(&self, height: u64) -> Result<()> {
        let mut tip = self.tip.subscribe();
        tip.wait_for(|tip| *tip >= height)
            .await
            .map_err(|_| LedgerError::Closed)?;
        Ok(())
    }

    async fn blocks_after(&self, height: u64) -> Result<Vec<Block>> {
        let Some(start) = height.checked_add(1) else {
            return Ok(Vec::new());
        };
        self.blocks
            .range(start.to_be_bytes()..)
            .values()
            .map(|bytes| -> Result<Block> { Ok(bincode::deserialize(&bytes?)?) })
            .collect()
    }

    async fn height(&self) -> Result<u64> {
        read_height(&self.meta)
    }
}

fn read_height(meta: &Tree) -> Result<u64> {
    match meta.get(TIP_KEY)? {
        Some(bytes) => decode_height(&bytes),
        None => Ok(0),
    }
}

fn decode_height(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| LedgerError::Corrupt(format!("bad height record of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

fn into_ledger_error(error: TransactionError<LedgerError>) -> LedgerError {
    match error {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => LedgerError::Storage(e),
    }
}
