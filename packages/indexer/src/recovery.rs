//! Recovery Orchestrator
//!
//! One run reads the checkpoint, collects the next window of logs, applies
//! mints then morphs, re-ranks the projection and finally moves the
//! checkpoint. A failed run leaves the checkpoint where it was, so the
//! next tick retries the same window; the transaction ledger keeps the
//! retry from counting anything twice.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::collector::{collect_events, BlockRange, CollectError, DEFAULT_MAX_BLOCK_RANGE};
use crate::filter::{classify_events, TransactionLedger};
use crate::processor::{process_mints, process_morphs, EntityBuilder, MintReport, MorphReport};
use crate::ranking::update_all_ranking;
use crate::rpc::ChainClient;
use crate::store::{ProjectionStore, StoreError};

/// Default seconds between runs
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Errors that abort a run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Collection failed: {0}")]
    Collect(#[from] CollectError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Scheduling and windowing settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexerSettings {
    /// Block to start from when nothing was processed yet
    pub start_block: u64,
    /// Maximum number of blocks per run
    pub max_block_range: u64,
    /// Time between runs
    pub poll_interval: Duration,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            start_block: 0,
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

/// Summary of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Window processed, if there was one
    pub window: Option<BlockRange>,
    /// Checkpoint after the run
    pub checkpoint: u64,
    pub logs: usize,
    pub duplicates: usize,
    pub transfers: usize,
    pub mints: MintReport,
    pub morphs: MorphReport,
    pub ranks_changed: usize,
}

/// The indexing pipeline
pub struct Indexer<C: ?Sized, S: ?Sized> {
    client: Arc<C>,
    store: Arc<S>,
    builder: Arc<EntityBuilder>,
    settings: IndexerSettings,
}

impl<C: ?Sized, S: ?Sized> Clone for Indexer<C, S> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            store: Arc::clone(&self.store),
            builder: Arc::clone(&self.builder),
            settings: self.settings,
        }
    }
}

impl<C, S> Indexer<C, S>
where
    C: ChainClient + ?Sized + 'static,
    S: ProjectionStore + ?Sized + 'static,
{
    pub fn new(
        client: Arc<C>,
        store: Arc<S>,
        builder: Arc<EntityBuilder>,
        settings: IndexerSettings,
    ) -> Self {
        Self {
            client,
            store,
            builder,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn settings(&self) -> &IndexerSettings {
        &self.settings
    }

    /// First block the next run will collect
    pub async fn checkpoint(&self) -> Result<u64, StoreError> {
        Ok(self
            .store
            .last_processed_block()
            .await?
            .unwrap_or(self.settings.start_block))
    }

    /// Run the pipeline once
    ///
    /// # Arguments
    /// * `range` - Explicit block range; the checkpoint is used when `None`
    ///
    /// # Returns
    /// A summary of what the run did
    pub async fn run_once(&self, range: Option<BlockRange>) -> Result<RunReport, PipelineError> {
        let checkpoint = self.checkpoint().await?;
        let Some(window) = collect_events(
            self.client.as_ref(),
            checkpoint,
            range,
            self.settings.max_block_range,
        )
        .await?
        else {
            return Ok(RunReport {
                checkpoint,
                ..RunReport::default()
            });
        };

        let ledger = TransactionLedger::from_keys(self.store.processed_transactions().await?);
        let batch = classify_events(&window.logs, &ledger);

        let mints = process_mints(batch.mints, Arc::clone(&self.builder), self.store.as_ref()).await;
        let morphs = process_morphs(
            Arc::clone(&self.client),
            Arc::clone(&self.store),
            Arc::clone(&self.builder),
            &batch.morphs,
        )
        .await;
        let ranks_changed = update_all_ranking(self.store.as_ref()).await?;

        // a backfill of an older range never moves the checkpoint back
        let next = window.next_checkpoint.max(checkpoint);
        self.store.save_last_processed_block(next).await?;

        info!(
            "Processed blocks {}..={}, checkpoint now {}",
            window.from, window.to, next
        );
        Ok(RunReport {
            window: Some(BlockRange {
                from: window.from,
                to: window.to,
            }),
            checkpoint: next,
            logs: window.logs.len(),
            duplicates: batch.duplicates,
            transfers: batch.transfers,
            mints,
            morphs,
            ranks_changed,
        })
    }

    /// Run once now and then on every tick until `shutdown` resolves
    ///
    /// Each tick starts its own run without waiting for the previous one;
    /// runs claim every log in the ledger before applying it, so
    /// overlapping runs never apply the same log twice.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut runs = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Received shutdown signal, stopping scheduler");
                    break;
                }
                _ = ticker.tick() => {
                    let indexer = self.clone();
                    runs.spawn(async move {
                        if let Err(e) = indexer.run_once(None).await {
                            error!("Run aborted, checkpoint unchanged: {}", e);
                        }
                    });
                }
                Some(joined) = runs.join_next(), if !runs.is_empty() => {
                    if let Err(e) = joined {
                        error!("Run task failed: {}", e);
                    }
                }
            }
        }

        runs.shutdown().await;
    }

    /// Run on the configured interval until Ctrl+C
    pub async fn run_forever(&self) {
        info!(
            "Indexer is running every {:?}. Press Ctrl+C to stop.",
            self.settings.poll_interval
        );
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    }
}
