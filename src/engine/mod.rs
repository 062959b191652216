//! Log ingestion watermark engine.
//!
//! [`WatermarkEngine`] owns the block cursor, the highest block whose logs
//! have been fully forwarded, and is the single point reconciling logs
//! delivered by range polling and by the push subscription.
//!
//! # States
//!
//! - [`EngineState::Backfilling`] - Initial catch-up of `lookback` blocks
//!   below the chain height (or of blocks above the configured start cursor)
//! - [`EngineState::Live`] - Drains `[cursor + 1, height]` on every poll tick
//! - [`EngineState::Recovering`] - Chain query failed, the interrupted phase
//!   is retried after capped exponential backoff with the cursor unmoved
//!
//! Drained ranges are forwarded in ascending `(block, log index)` order and
//! the cursor moves only after the whole range was forwarded. Every event,
//! polled or pushed, passes the [`DedupeWindow`] before pricing and delivery,
//! so overlapping paths and retried ranges never produce a second alert.
//!
//! Only one range drain runs at a time, a poll tick arriving while a drain
//! is in flight is skipped rather than queued.

mod backoff;
mod dedupe;
mod stats;

use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};

use fastnum::UD256;
use futures::StreamExt;
use itertools::Itertools;
use tokio::{
    sync::{Mutex, watch},
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

pub use backoff::Backoff;
pub use dedupe::{Admission, DedupeWindow};
pub use stats::EngineStats;

use crate::{
    Market,
    decoder::EventDecoder,
    error::ChainError,
    oracle::PriceOracle,
    price::{DEFAULT_ORACLE_TIMEOUT, PriceResolver},
    reader::ChainReader,
    sink::NotificationSink,
    types::{BlockNumber, BlockRange, RawLog, TradeEvent},
};

/// Engine tuning parameters.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Interval between live range polls.
    pub poll_interval: Duration,

    /// Number of blocks below the chain height to backfill on startup.
    pub lookback: u64,

    /// Last block known to be processed, backfill resumes right above it
    /// instead of using the lookback.
    pub start_cursor: Option<BlockNumber>,

    /// Maximum span of a single log query, larger ranges are split.
    pub max_block_range: u64,

    /// Initial retry delay after a chain query failure.
    pub backoff_floor: Duration,

    /// Maximum retry delay.
    pub backoff_cap: Duration,

    /// Number of blocks behind the cursor forwarded event keys are retained for.
    pub dedupe_retention: u64,

    /// Maximum number of retained event keys.
    pub dedupe_capacity: usize,

    /// Bound of a single external price request.
    pub oracle_timeout: Duration,

    /// Trades with smaller quote amount are not forwarded.
    pub min_quote_amount: UD256,

    /// Resubscribe if the push subscription produces nothing for this long.
    pub push_idle_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            lookback: 1000,
            start_cursor: None,
            max_block_range: 2000,
            backoff_floor: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(60),
            dedupe_retention: 256,
            dedupe_capacity: 10_000,
            oracle_timeout: DEFAULT_ORACLE_TIMEOUT,
            min_quote_amount: UD256::ZERO,
            push_idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Phase of the cursor progression a recovery returns to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Backfilling,
    Live,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Backfilling,
    Live,
    /// Waiting to retry `resume` phase, `level` counts consecutive failures minus one.
    Recovering { level: u32, resume: Phase },
}

/// Result of a single backfill or poll attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// Chain has not advanced past the cursor.
    Idle,
    /// Range drained and cursor moved to its end.
    Drained { range: BlockRange, forwarded: usize },
    /// Another drain was in flight.
    Skipped,
}

#[derive(Clone, Copy, Debug)]
struct Progress {
    state: EngineState,
    cursor: Option<BlockNumber>,
    /// Start of the first backfill attempt, kept so retries do not skip blocks.
    backfill_from: Option<BlockNumber>,
}

/// Block cursor owner and dedupe-and-forward gate, see [module docs](self).
pub struct WatermarkEngine<R, O, S> {
    reader: R,
    decoder: EventDecoder,
    resolver: PriceResolver<O>,
    sink: S,
    config: EngineConfig,
    backoff: Backoff,
    progress: Mutex<Progress>,
    window: Mutex<DedupeWindow>,
    drain: Mutex<()>,
    counters: stats::Counters,
}

impl<R: ChainReader, O: PriceOracle, S: NotificationSink> WatermarkEngine<R, O, S> {
    pub fn new(market: &Market, reader: R, oracle: O, sink: S, config: EngineConfig) -> Self {
        Self {
            reader,
            decoder: EventDecoder::new(market),
            resolver: PriceResolver::new(oracle, config.oracle_timeout),
            sink,
            backoff: Backoff::new(config.backoff_floor, config.backoff_cap),
            progress: Mutex::new(Progress {
                state: EngineState::Backfilling,
                cursor: None,
                backfill_from: None,
            }),
            window: Mutex::new(DedupeWindow::new(
                config.dedupe_retention,
                config.dedupe_capacity,
            )),
            drain: Mutex::new(()),
            counters: stats::Counters::default(),
            config,
        }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Highest block fully processed, `None` until the backfill completes.
    pub async fn cursor(&self) -> Option<BlockNumber> {
        self.progress.lock().await.cursor
    }

    pub async fn state(&self) -> EngineState {
        self.progress.lock().await.state
    }

    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    /// Delay to wait before the next [`Self::step`] when recovering.
    pub async fn retry_delay(&self) -> Option<Duration> {
        match self.state().await {
            EngineState::Recovering { level, .. } => Some(self.backoff.delay(level)),
            _ => None,
        }
    }

    /// Performs the action of the current state and transitions:
    /// backfill when backfilling, poll when live, retry of the interrupted
    /// phase when recovering. Does not wait, see [`Self::retry_delay`].
    pub async fn step(&self) -> EngineState {
        let (phase, level) = match self.state().await {
            EngineState::Backfilling => (Phase::Backfilling, None),
            EngineState::Live => (Phase::Live, None),
            EngineState::Recovering { level, resume } => (resume, Some(level)),
        };

        let result = match phase {
            Phase::Backfilling => self.backfill().await,
            Phase::Live => self.poll().await,
        };

        let next = match result {
            Ok(outcome) => {
                if let Some(level) = level {
                    info!(?phase, failures = level + 1, "recovered from chain query failures");
                }
                if let PollOutcome::Drained { range, forwarded } = outcome {
                    debug!(%range, forwarded, "range drained");
                }
                EngineState::Live
            }
            Err(e) => {
                stats::incr(&self.counters.chain_errors);
                let level = level.map_or(0, |l| l.saturating_add(1));
                warn!(%e, ?phase, level, "chain query failed, recovering");
                EngineState::Recovering {
                    level,
                    resume: phase,
                }
            }
        };
        self.progress.lock().await.state = next;
        next
    }

    /// Single backfill attempt, drains the historical range and sets the cursor.
    pub async fn backfill(&self) -> Result<PollOutcome, ChainError> {
        let _drain = self.drain.lock().await;

        let height = self.reader.current_height().await?;
        let from = {
            let mut progress = self.progress.lock().await;
            let from = match (progress.backfill_from, self.config.start_cursor) {
                (Some(from), _) => from,
                (None, Some(cursor)) => cursor.saturating_add(1),
                (None, None) => height.saturating_sub(self.config.lookback),
            };
            progress.backfill_from = Some(from);
            from
        };

        if from > height {
            let cursor = from - 1;
            info!(cursor, height, "start cursor is not below chain height, nothing to backfill");
            self.advance(cursor).await;
            return Ok(PollOutcome::Idle);
        }

        let range = BlockRange::new(from, height)?;
        info!(%range, "backfilling historical trades");
        let forwarded = self.drain_range(range, true).await?;
        self.advance(range.to()).await;
        info!(%range, forwarded, "backfill completed");

        Ok(PollOutcome::Drained { range, forwarded })
    }

    /// Single live poll attempt, drains blocks between the cursor and the
    /// current height.
    pub async fn poll(&self) -> Result<PollOutcome, ChainError> {
        let Ok(_drain) = self.drain.try_lock() else {
            debug!("previous drain still in flight, skipping tick");
            return Ok(PollOutcome::Skipped);
        };
        let Some(cursor) = self.cursor().await else {
            warn!("poll requested before backfill, ignoring");
            return Ok(PollOutcome::Idle);
        };

        let height = self.reader.current_height().await?;
        if height <= cursor {
            if height < cursor {
                debug!(height, cursor, "chain height behind cursor, keeping cursor");
            }
            return Ok(PollOutcome::Idle);
        }

        let range = BlockRange::new(cursor + 1, height)?;
        let forwarded = self.drain_range(range, false).await?;
        self.advance(height).await;

        Ok(PollOutcome::Drained { range, forwarded })
    }

    /// Feeds a log delivered by the push subscription into the forward path.
    /// Returns `true` if the event was forwarded.
    pub async fn ingest_push(&self, log: RawLog) -> bool {
        if log.removed {
            stats::incr(&self.counters.removed);
            debug!(tx = ?log.transaction_hash, "dropping log removed by reorg");
            return false;
        }
        let event = match self.decoder.decode(&log) {
            Ok(event) => event,
            Err(e) => {
                stats::incr(&self.counters.decode_errors);
                warn!(%e, tx = ?log.transaction_hash, "skipping undecodable pushed log");
                return false;
            }
        };

        self.forward(event).await
    }

    /// Dedupe gate followed by pricing and delivery.
    /// Returns `true` if the event was forwarded to the sink.
    pub async fn forward(&self, event: TradeEvent) -> bool {
        let admission = self
            .window
            .lock()
            .await
            .admit(event.key(), event.block_number());
        match admission {
            Admission::Fresh => {}
            Admission::Duplicate => {
                stats::incr(&self.counters.duplicates);
                debug!(
                    tx = %event.tx_hash(),
                    log_index = event.log_index(),
                    "duplicate event suppressed"
                );
                return false;
            }
            Admission::Stale => {
                stats::incr(&self.counters.stale);
                debug!(
                    block = event.block_number(),
                    tx = %event.tx_hash(),
                    "dropping event behind the dedupe horizon"
                );
                return false;
            }
        }

        if event.quote_amount() < self.config.min_quote_amount {
            stats::incr(&self.counters.filtered);
            debug!(
                tx = %event.tx_hash(),
                amount = %event.quote_amount(),
                "trade below minimum alert amount"
            );
            return false;
        }

        let quote = self.resolver.resolve(&event).await;
        stats::incr(&self.counters.forwarded);

        match self.sink.deliver(&event, &quote).await {
            Ok(()) => {
                stats::incr(&self.counters.delivered);
                info!(
                    kind = ?event.kind(),
                    block = event.block_number(),
                    tx = %event.tx_hash(),
                    amount = %event.quote_amount(),
                    price = %quote.value,
                    source = ?quote.source,
                    historical = event.is_historical(),
                    "trade alert delivered"
                );
            }
            Err(e) if e.is_rate_limited() => {
                stats::incr(&self.counters.rate_limited);
                warn!(%e, tx = %event.tx_hash(), "trade alert dropped, sink rate limited");
            }
            Err(e) => {
                stats::incr(&self.counters.delivery_failures);
                error!(%e, tx = %event.tx_hash(), "trade alert delivery failed");
            }
        }
        true
    }

    async fn drain_range(&self, range: BlockRange, historical: bool) -> Result<usize, ChainError> {
        let logs = self.fetch_range(range).await?;
        let mut forwarded = 0;
        for event in self.prepare_batch(logs, historical) {
            if self.forward(event).await {
                forwarded += 1;
            }
        }
        Ok(forwarded)
    }

    /// Fetches all logs of the range, in chunks of at most `max_block_range`
    /// blocks, halving chunks the node rejects as too large.
    async fn fetch_range(&self, range: BlockRange) -> Result<Vec<RawLog>, ChainError> {
        let mut pending = range
            .chunks(self.config.max_block_range)
            .collect::<Vec<_>>();
        pending.reverse();

        let mut logs = Vec::new();
        while let Some(chunk) = pending.pop() {
            match self.reader.get_logs(chunk.from(), chunk.to()).await {
                Ok(mut chunk_logs) => logs.append(&mut chunk_logs),
                Err(ChainError::RangeTooLarge(reason)) => match chunk.halve() {
                    Some((lower, upper)) => {
                        debug!(%chunk, %reason, "log query rejected, splitting range");
                        pending.push(upper);
                        pending.push(lower);
                    }
                    None => return Err(ChainError::RangeTooLarge(reason)),
                },
                Err(e) => return Err(e),
            }
        }
        Ok(logs)
    }

    /// Decodes logs and orders them by chain position, dropping logs which
    /// repeat the position or identity of an earlier one.
    fn prepare_batch(&self, logs: Vec<RawLog>, historical: bool) -> Vec<TradeEvent> {
        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            if log.removed {
                stats::incr(&self.counters.removed);
                continue;
            }
            match self.decoder.decode(log) {
                Ok(event) if historical => events.push(event.into_historical()),
                Ok(event) => events.push(event),
                Err(e) => {
                    stats::incr(&self.counters.decode_errors);
                    warn!(
                        %e,
                        block = ?log.block_number,
                        tx = ?log.transaction_hash,
                        "skipping undecodable log"
                    );
                }
            }
        }

        let mut keys = HashSet::with_capacity(events.len());
        let mut last_position = None;
        events
            .into_iter()
            .sorted_by_key(TradeEvent::position)
            .filter(|event| {
                let repeated =
                    last_position == Some(event.position()) || !keys.insert(event.key());
                last_position = Some(event.position());
                if repeated {
                    stats::incr(&self.counters.anomalies);
                    warn!(
                        block = event.block_number(),
                        tx = %event.tx_hash(),
                        log_index = event.log_index(),
                        "dropping repeated log in batch"
                    );
                }
                !repeated
            })
            .collect()
    }

    /// Moves the cursor forward (never back) and expires old dedupe entries.
    async fn advance(&self, to: BlockNumber) {
        let cursor = {
            let mut progress = self.progress.lock().await;
            let cursor = progress.cursor.map_or(to, |c| c.max(to));
            progress.cursor = Some(cursor);
            progress.state = EngineState::Live;
            cursor
        };
        self.window.lock().await.prune(cursor);
    }
}

impl<R, O, S> WatermarkEngine<R, O, S>
where
    R: ChainReader + 'static,
    O: PriceOracle + 'static,
    S: NotificationSink + 'static,
{
    /// Runs the engine until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// Backfills, then polls every `poll_interval`, while a background task
    /// follows the push subscription if the reader supports one. Backoff
    /// delays are awaited via `sleep`. A drain in flight at shutdown is
    /// finished before returning.
    pub async fn run<F, Fut>(self: Arc<Self>, mut shutdown: watch::Receiver<bool>, sleep: F)
    where
        F: Fn(Duration) -> Fut + Copy + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let subscription = tokio::spawn(
            Arc::clone(&self).follow_subscription(shutdown.clone(), sleep),
        );

        let mut interval =
            tokio::time::interval(self.config.poll_interval.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await; // First tick completes immediately

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.state().await {
                EngineState::Backfilling => {}
                EngineState::Live => {
                    tokio::select! {
                        _ = interval.tick() => {}
                        _ = shutdown.changed() => break,
                    }
                }
                EngineState::Recovering { level, resume } => {
                    let delay = self.backoff.delay(level);
                    info!(level, ?delay, ?resume, "backing off before retry");
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
            // Not raced against shutdown, so the in-flight range always completes
            self.step().await;
        }

        let cursor = self.cursor().await;
        info!(?cursor, "engine stopping");
        if let Err(e) = subscription.await {
            error!(%e, "push subscription task failed");
        }
        info!(stats = ?self.stats(), "engine stopped");
    }

    async fn follow_subscription<F, Fut>(self: Arc<Self>, mut shutdown: watch::Receiver<bool>, sleep: F)
    where
        F: Fn(Duration) -> Fut + Copy + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut level = 0u32;
        loop {
            if *shutdown.borrow() {
                return;
            }
            let subscribed = tokio::select! {
                subscribed = self.reader.subscribe() => subscribed,
                _ = shutdown.changed() => return,
            };

            match subscribed {
                Ok(Some(mut logs)) => {
                    info!("push subscription established");
                    loop {
                        tokio::select! {
                            next = tokio::time::timeout(self.config.push_idle_timeout, logs.next()) => match next {
                                Ok(Some(log)) => {
                                    level = 0;
                                    self.ingest_push(log).await;
                                }
                                Ok(None) => {
                                    warn!("push subscription closed, resubscribing");
                                    break;
                                }
                                Err(_) => {
                                    warn!(
                                        timeout = ?self.config.push_idle_timeout,
                                        "push subscription idle, resubscribing"
                                    );
                                    break;
                                }
                            },
                            _ = shutdown.changed() => return,
                        }
                    }
                }
                Ok(None) => {
                    debug!("push subscription not available, relying on polling");
                    return;
                }
                Err(e) => warn!(%e, "failed to subscribe to trade logs"),
            }

            let delay = self.backoff.delay(level);
            level = level.saturating_add(1);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
        }
    }
}
