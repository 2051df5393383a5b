use std::time::{Duration, Instant};

use chrono::DateTime;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::block_processor::{normalize_block, NormalizeError};
use crate::chain;
use crate::clock::Clock;
use crate::database::{BlockStore, StoreError, StoreOutcome};
use crate::rpc::{NodeRpc, RpcError};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
    pub progress_every: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            poll_interval: Duration::from_secs(5 * 60),
            retry_backoff: Duration::from_secs(30),
            progress_every: 250,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    /// `next` is the height being fetched, `target` the node tip seen when the
    /// burst started.
    CatchingUp { next: i64, target: i64 },
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("asked for block {requested}, node returned height {reported:?}")]
    HeightMismatch { requested: i64, reported: Option<i64> },
}

/// Polls the node and stores every block between the local and the remote tip,
/// one block per transaction, forever.
pub struct Syncer<R, S, C> {
    rpc: R,
    store: S,
    clock: C,
    settings: SyncSettings,
    state: SyncState,
    since_report: u64,
    report_started: Instant,
}

impl<R: NodeRpc, S: BlockStore, C: Clock> Syncer<R, S, C> {
    pub fn new(rpc: R, store: S, clock: C, settings: SyncSettings) -> Self {
        Syncer {
            rpc,
            store,
            clock,
            settings,
            state: SyncState::Idle,
            since_report: 0,
            report_started: Instant::now(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Runs until `shutdown` turns true (or its sender goes away). The flag is
    /// checked between iterations and raced against every sleep; a block that is
    /// being written is always finished first.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval = ?self.settings.poll_interval,
            retry_backoff = ?self.settings.retry_backoff,
            "sync loop started"
        );

        while !*shutdown.borrow() {
            let pause = self.tick().await;
            tokio::select! {
                _ = self.clock.sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("sync loop stopped");
    }

    /// One iteration: sync to the tip and return how long to sleep before the
    /// next one. Errors never escape; they turn into the backoff delay.
    pub async fn tick(&mut self) -> Duration {
        match self.sync_to_tip().await {
            Ok(_) => self.settings.poll_interval,
            Err(e) => {
                error!(
                    error = %e,
                    state = ?self.state,
                    "sync iteration failed, retrying in {:?}",
                    self.settings.retry_backoff
                );
                self.state = SyncState::Idle;
                self.settings.retry_backoff
            }
        }
    }

    /// Fetches and stores every block above the local tip up to the remote tip
    /// observed at the start. Returns the number of blocks processed.
    pub async fn sync_to_tip(&mut self) -> Result<u64, SyncError> {
        let remote = chain::remote_tip(&self.rpc).await?;
        let local = chain::local_tip(&self.store).await?;
        let start = chain::next_height(local.as_ref());

        if start > remote {
            debug!(remote, "store is at the node tip");
            return Ok(0);
        }

        info!(from = start, to = remote, "catching up");
        let mut previous = local.map(|tip| tip.hash);
        let mut processed = 0;

        for height in start..=remote {
            self.state = SyncState::CatchingUp { next: height, target: remote };

            let hash = self.rpc.block_hash(height).await?;
            let raw = self.rpc.block(&hash).await?;
            if raw.height != Some(height) {
                return Err(SyncError::HeightMismatch {
                    requested: height,
                    reported: raw.height,
                });
            }

            // Heights alone drive the sync; a broken link is only reported.
            if let (Some(expected), Some(actual)) = (previous.as_deref(), raw.previousblockhash.as_deref()) {
                if expected != actual {
                    warn!(height, expected, actual, "previousblockhash does not match the block stored below it");
                }
            }

            let block = normalize_block(&raw)?;
            match self.store.store_block(&block).await? {
                StoreOutcome::Stored(counts) => debug!(
                    height,
                    hash = %block.block.hash,
                    transactions = counts.transactions,
                    inputs = counts.inputs,
                    outputs = counts.outputs,
                    "stored block"
                ),
                StoreOutcome::AlreadyStored => debug!(height, hash = %block.block.hash, "block already stored"),
            }

            processed += 1;
            self.report_progress(height, block.block.time);
            previous = Some(block.block.hash);
        }

        self.state = SyncState::Idle;
        info!(blocks = processed, tip = remote, "caught up");
        Ok(processed)
    }

    fn report_progress(&mut self, height: i64, time: Option<i64>) {
        self.since_report += 1;
        if self.since_report < self.settings.progress_every {
            return;
        }

        let mined_at = time
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|at| at.to_rfc3339());
        info!(
            height,
            mined_at = mined_at.as_deref().unwrap_or("unknown"),
            "processed {} blocks in {:?}",
            self.since_report,
            self.report_started.elapsed()
        );
        self.since_report = 0;
        self.report_started = Instant::now();
    }
}
