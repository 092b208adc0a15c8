//! Leader Scheduler - fixed-period block production
//!
//! Runs once per promotion: recover the head, finish a block the previous
//! leader left pending, then produce one block per tick until demoted.
//!
//! One production cycle runs at a time, inline in the loop. A cycle is
//! expected to finish well within one period; when it does not, the ticks it
//! overran are skipped rather than queued.

use crate::{
    commit::CommitPipeline,
    error::{GeneratorError, ProductionError},
    head::Head,
    recovery::RecoveryCoordinator,
    signer::BlockSigner,
};
use ledger_core::LedgerEngine;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Default block period in milliseconds
pub const BLOCK_PERIOD_MS: u64 = 1000;

/// Default cap on transactions per block
pub const MAX_TXS_PER_BLOCK: usize = 10_000;

/// Generator configuration
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    /// Time between production ticks
    pub period: Duration,
    /// Maximum transactions taken from the pool per block
    pub max_txs_per_block: usize,
    /// Produce nothing on ticks with an empty pool
    pub skip_empty_blocks: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(BLOCK_PERIOD_MS),
            max_txs_per_block: MAX_TXS_PER_BLOCK,
            skip_empty_blocks: false,
        }
    }
}

/// Result of one production cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A block at this height was committed
    Committed(u64),
    /// Nothing to include and empty blocks are disabled
    SkippedEmpty,
    /// Demoted before the cycle finished
    Cancelled,
}

/// Owns the head and drives block production for one leadership term
pub struct LeaderScheduler {
    config: GeneratorConfig,
    ledger: Arc<dyn LedgerEngine>,
    signer: Arc<dyn BlockSigner>,
    pipeline: CommitPipeline,
    head: Head,
}

impl LeaderScheduler {
    /// Run the startup sequence after promotion.
    ///
    /// Returns `Ok(None)` if demoted before startup finished. Any error is
    /// fatal: the head could not be established.
    pub async fn promote(
        config: GeneratorConfig,
        ledger: Arc<dyn LedgerEngine>,
        signer: Arc<dyn BlockSigner>,
        cancel: &CancellationToken,
    ) -> Result<Option<Self>, GeneratorError> {
        let recovery = RecoveryCoordinator::new(ledger.clone());
        let Some(head) = until_cancelled(cancel, recovery.recover()).await else {
            tracing::info!("Demoted during recovery");
            return Ok(None);
        };

        let mut scheduler = Self {
            pipeline: CommitPipeline::new(ledger.clone()),
            config,
            ledger,
            signer,
            head: head?,
        };

        // A previous leader may have exited between saving a block and
        // committing it.
        let Some(pending) = until_cancelled(cancel, scheduler.ledger.pending_block()).await else {
            tracing::info!("Demoted while loading pending block");
            return Ok(None);
        };

        match pending.map_err(GeneratorError::PendingBlock)? {
            Some(block) if block.height == scheduler.head.next_height() => {
                tracing::info!(height = block.height, "Committing pending block from previous leader");
                let height = block.height;
                let Some(signed) = until_cancelled(cancel, scheduler.signer.sign(block)).await else {
                    tracing::info!("Demoted while signing pending block");
                    return Ok(None);
                };
                match signed {
                    Ok(block) => {
                        scheduler
                            .pipeline
                            .commit(&mut scheduler.head, block)
                            .await
                            .map_err(GeneratorError::Reconcile)?;
                    }
                    // Still stored; the first tick picks it up again
                    Err(e) => tracing::warn!(
                        height,
                        error = %e,
                        "Could not sign pending block, deferring to the first tick"
                    ),
                }
            }
            Some(block) => {
                tracing::info!(
                    pending_height = block.height,
                    head_height = scheduler.head.height(),
                    "Discarding stale pending block"
                );
            }
            None => {}
        }

        Ok(Some(scheduler))
    }

    pub fn head(&self) -> &Head {
        &self.head
    }

    /// One production cycle: build a block from the pool, record it as
    /// pending, sign it, then commit it.
    ///
    /// A pending block at the next height is an earlier cycle's candidate
    /// that never got committed. It is signed and committed again instead of
    /// building a new one, so remote signers see the same block hash.
    pub async fn make_block(&mut self, cancel: &CancellationToken) -> Result<CycleOutcome, ProductionError> {
        let Some(pending) = until_cancelled(cancel, self.ledger.pending_block()).await else {
            return Ok(CycleOutcome::Cancelled);
        };
        let candidate = match pending.map_err(ProductionError::PendingBlock)? {
            Some(block) if block.height == self.head.next_height() => {
                tracing::debug!(height = block.height, "Retrying pending block");
                block
            }
            _ => {
                let limit = self.config.max_txs_per_block;
                let Some(txs) = until_cancelled(cancel, self.ledger.pending_txs(limit)).await else {
                    return Ok(CycleOutcome::Cancelled);
                };
                let txs = txs.map_err(ProductionError::PendingTxs)?;
                if txs.is_empty() && self.config.skip_empty_blocks {
                    return Ok(CycleOutcome::SkippedEmpty);
                }

                let block = self.signer.build(self.head.snapshot(), txs);
                let Some(saved) = until_cancelled(cancel, self.ledger.save_pending_block(&block)).await
                else {
                    return Ok(CycleOutcome::Cancelled);
                };
                saved.map_err(ProductionError::SavePending)?;
                block
            }
        };

        let Some(signed) = until_cancelled(cancel, self.signer.sign(candidate)).await else {
            return Ok(CycleOutcome::Cancelled);
        };
        let signed = signed?;

        // Runs to completion even when demoted: the block may already be
        // stored by the time the ledger call yields.
        let head = self.pipeline.commit(&mut self.head, signed).await?;
        Ok(CycleOutcome::Committed(head.height()))
    }

    /// Produce blocks until `cancel` fires, then hand back the final head.
    pub async fn run(mut self, cancel: CancellationToken) -> Head {
        let period = self.config.period;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            height = self.head.height(),
            period_ms = period.as_millis() as u64,
            "Block generator started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let started = Instant::now();
            match self.make_block(&cancel).await {
                Ok(CycleOutcome::Committed(height)) => {
                    tracing::debug!(height, "Produced block");
                }
                Ok(CycleOutcome::SkippedEmpty) => {
                    tracing::trace!("No pending transactions, skipping tick");
                }
                Ok(CycleOutcome::Cancelled) => break,
                Err(e) => {
                    tracing::error!(
                        height = self.head.next_height(),
                        error = %e,
                        "Block production failed"
                    );
                }
            }

            let elapsed = started.elapsed();
            if elapsed > period {
                tracing::warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    period_ms = period.as_millis() as u64,
                    "Production cycle overran the block period, skipping missed ticks"
                );
            }
        }

        tracing::info!(height = self.head.height(), "Deposed, generator exiting");
        self.head
    }
}

/// Promote and produce blocks until `cancel` fires.
///
/// An error means this process could not establish a trustworthy head and
/// must stop.
pub async fn generate(
    config: GeneratorConfig,
    ledger: Arc<dyn LedgerEngine>,
    signer: Arc<dyn BlockSigner>,
    cancel: CancellationToken,
) -> Result<(), GeneratorError> {
    if let Some(scheduler) = LeaderScheduler::promote(config, ledger, signer, &cancel).await? {
        scheduler.run(cancel).await;
    }
    Ok(())
}

/// Race `future` against demotion; `None` if demoted first
async fn until_cancelled<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}
