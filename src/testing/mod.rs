//! In-memory chain reader, oracle and sink plus exchange log builders.
//!
//! [`MockChainReader`] serves scripted logs by block and can be told to fail
//! height or log queries, reject large ranges, hold log queries on a gate, or
//! feed a push subscription. [`StaticOracle`] and [`RecordingSink`] cover the
//! pricing and delivery edges.
//!
//! [`LogBuilder`] produces ABI-encoded `Bought`/`Sold` logs, exactly like a
//! node would return them.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use alloy::{
    primitives::{self, Address, B256, TxHash, U256, address},
    sol_types::SolEvent,
};
use dashmap::DashMap;
use fastnum::{UD256, udec256};
use futures::{StreamExt, stream};
use tokio::sync::{Notify, mpsc};

use crate::{
    Market,
    abi::exchange::Exchange,
    decoder::EventDecoder,
    error::{ChainError, DeliveryError, OracleError},
    num,
    oracle::PriceOracle,
    reader::{ChainReader, LogStream},
    sink::NotificationSink,
    types::{BlockNumber, BlockRange, PriceQuote, RawLog, TradeEvent, TradeKind},
};

pub const EXCHANGE: Address = address!("0x5d4e1fd3a5e2b1b6e0b1c3bdb5b6ce52b0a0f3a1");
pub const TRADER: Address = address!("0x8ba1f109551bd432803012645ac136ddd64dba72");
pub const TOKEN: Address = address!("0xc2132d05d31c914a87c6611c10748aeb04b58e8f");

/// Market of [`EXCHANGE`] with default precisions.
pub fn market() -> Market {
    Market::new(EXCHANGE)
}

/// Decodes the log with [`market`] precisions, panics on failure.
pub fn decode(log: &RawLog) -> TradeEvent {
    EventDecoder::new(&market())
        .decode(log)
        .expect("test log must decode")
}

/// Deterministic transaction hash for test logs.
pub fn tx_hash(n: u64) -> TxHash {
    B256::left_padding_from(&n.to_be_bytes())
}

/// Buy log at the given position, transaction hash derived from the position.
pub fn buy_at(block: BlockNumber, log_index: u64) -> RawLog {
    LogBuilder::buy(udec256!(100), udec256!(400))
        .at(block, tx_hash(block * 1000 + log_index), log_index)
        .build()
}

/// Sell log at the given position, transaction hash derived from the position.
pub fn sell_at(block: BlockNumber, log_index: u64) -> RawLog {
    LogBuilder::sell(udec256!(100), udec256!(400))
        .at(block, tx_hash(block * 1000 + log_index), log_index)
        .build()
}

/// Builder of raw exchange trade logs.
///
/// # Example
///
/// ```ignore
/// use trade_watch::testing::LogBuilder;
/// use fastnum::udec256;
///
/// let log = LogBuilder::buy(udec256!(250), udec256!(1000))
///     .price(udec256!(0.25))
///     .at(41753780, tx, 14)
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct LogBuilder {
    kind: TradeKind,
    quote: UD256,
    base: UD256,
    price: UD256,
    traded_at: u64,
    trader: Address,
    token: Address,
    market: Market,
    block: BlockNumber,
    tx_hash: TxHash,
    log_index: u64,
    removed: bool,
}

impl LogBuilder {
    /// `Bought` log, `quote` stable tokens paid for `base` tokens.
    pub fn buy(quote: UD256, base: UD256) -> Self {
        Self::new(TradeKind::Buy, quote, base)
    }

    /// `Sold` log, `base` tokens sold for `quote` stable tokens.
    pub fn sell(quote: UD256, base: UD256) -> Self {
        Self::new(TradeKind::Sell, quote, base)
    }

    fn new(kind: TradeKind, quote: UD256, base: UD256) -> Self {
        Self {
            kind,
            quote,
            base,
            price: UD256::ZERO,
            traded_at: 1_700_000_000,
            trader: TRADER,
            token: TOKEN,
            market: market(),
            block: 1,
            tx_hash: tx_hash(1),
            log_index: 0,
            removed: false,
        }
    }

    /// Contract-reported price.
    pub fn price(mut self, price: UD256) -> Self {
        self.price = price;
        self
    }

    pub fn traded_at(mut self, timestamp: u64) -> Self {
        self.traded_at = timestamp;
        self
    }

    pub fn trader(mut self, trader: Address) -> Self {
        self.trader = trader;
        self
    }

    /// Precisions used to encode amounts and price.
    pub fn with_market(mut self, market: &Market) -> Self {
        self.market = market.clone();
        self
    }

    /// Position of the log on chain.
    pub fn at(mut self, block: BlockNumber, tx_hash: TxHash, log_index: u64) -> Self {
        self.block = block;
        self.tx_hash = tx_hash;
        self.log_index = log_index;
        self
    }

    /// Marks the log as removed by a reorg.
    pub fn removed(mut self) -> Self {
        self.removed = true;
        self
    }

    pub fn build(&self) -> RawLog {
        let quote = num::Converter::new(self.market.quote_decimals()).to_unsigned(self.quote);
        let base = num::Converter::new(self.market.base_decimals()).to_unsigned(self.base);
        let price = num::Converter::new(self.market.price_decimals()).to_unsigned(self.price);
        let tdate = U256::from(self.traded_at);

        let data = match self.kind {
            TradeKind::Buy => Exchange::Bought {
                tdate,
                user: self.trader,
                token: self.token,
                usdtIn: quote,
                tokenOut: base,
                price,
            }
            .encode_log_data(),
            TradeKind::Sell => Exchange::Sold {
                tdate,
                user: self.trader,
                token: self.token,
                tokenIn: base,
                usdtOut: quote,
                price,
            }
            .encode_log_data(),
        };

        RawLog {
            inner: primitives::Log {
                address: self.market.exchange(),
                data,
            },
            block_hash: Some(B256::left_padding_from(&self.block.to_be_bytes())),
            block_number: Some(self.block),
            block_timestamp: None,
            transaction_hash: Some(self.tx_hash),
            transaction_index: Some(0),
            log_index: Some(self.log_index),
            removed: self.removed,
        }
    }
}

/// Scriptable in-memory [`ChainReader`].
#[derive(Debug, Default)]
pub struct MockChainReader {
    head: AtomicU64,
    logs: DashMap<BlockNumber, Vec<RawLog>>,
    height_failures: Mutex<VecDeque<ChainError>>,
    log_failures: Mutex<VecDeque<ChainError>>,
    max_range: Mutex<Option<u64>>,
    queries: Mutex<Vec<BlockRange>>,
    height_calls: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
    push: Mutex<Option<mpsc::UnboundedReceiver<RawLog>>>,
}

impl MockChainReader {
    pub fn new(head: BlockNumber) -> Self {
        let reader = Self::default();
        reader.set_head(head);
        reader
    }

    pub fn set_head(&self, head: BlockNumber) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn head(&self) -> BlockNumber {
        self.head.load(Ordering::SeqCst)
    }

    /// Adds log served by range queries, within a block logs are served in
    /// insertion order.
    pub fn add_log(&self, log: RawLog) {
        let block = log.block_number.unwrap_or_default();
        self.logs.entry(block).or_default().push(log);
    }

    pub fn add_logs(&self, logs: impl IntoIterator<Item = RawLog>) {
        logs.into_iter().for_each(|log| self.add_log(log));
    }

    /// Next height query fails with the error.
    pub fn fail_height(&self, err: ChainError) {
        self.height_failures.lock().unwrap().push_back(err);
    }

    /// Next log query fails with the error.
    pub fn fail_logs(&self, err: ChainError) {
        self.log_failures.lock().unwrap().push_back(err);
    }

    /// Log queries spanning more blocks fail with [`ChainError::RangeTooLarge`].
    pub fn reject_ranges_above(&self, max_len: u64) {
        *self.max_range.lock().unwrap() = Some(max_len);
    }

    /// Log queries wait for a notification on the returned gate.
    pub fn gate_log_queries(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Enables push subscription, logs sent to the returned channel are
    /// delivered by the stream. Dropping the sender ends the stream.
    pub fn push_channel(&self) -> mpsc::UnboundedSender<RawLog> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.push.lock().unwrap() = Some(rx);
        tx
    }

    /// All attempted log query ranges, in order.
    pub fn queries(&self) -> Vec<BlockRange> {
        self.queries.lock().unwrap().clone()
    }

    pub fn height_calls(&self) -> usize {
        self.height_calls.load(Ordering::SeqCst)
    }
}

impl ChainReader for MockChainReader {
    async fn current_height(&self) -> Result<BlockNumber, ChainError> {
        self.height_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.height_failures.lock().unwrap().pop_front();
        match failure {
            Some(err) => Err(err),
            None => Ok(self.head()),
        }
    }

    async fn fetch_logs(&self, range: BlockRange) -> Result<Vec<RawLog>, ChainError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.queries.lock().unwrap().push(range);
        let failure = self.log_failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        let max_range = *self.max_range.lock().unwrap();
        if let Some(max_len) = max_range
            && range.len() > max_len
        {
            return Err(ChainError::RangeTooLarge(format!(
                "query exceeds {max_len} blocks"
            )));
        }

        let mut blocks = self
            .logs
            .iter()
            .filter(|entry| (range.from()..=range.to()).contains(entry.key()))
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect::<Vec<_>>();
        blocks.sort_by_key(|(block, _)| *block);
        Ok(blocks.into_iter().flat_map(|(_, logs)| logs).collect())
    }

    async fn subscribe(&self) -> Result<Option<LogStream>, ChainError> {
        let push = self.push.lock().unwrap().take();
        Ok(push.map(|rx| {
            stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|log| (log, rx)) })
                .boxed()
        }))
    }
}

#[derive(Clone, Copy, Debug)]
enum OracleBehavior {
    Price(UD256),
    NoPrice,
    Failing,
    Hanging,
}

/// [`PriceOracle`] with fixed behavior, counts requests.
#[derive(Debug)]
pub struct StaticOracle {
    behavior: OracleBehavior,
    calls: AtomicUsize,
}

impl StaticOracle {
    pub fn price(price: UD256) -> Self {
        Self::with(OracleBehavior::Price(price))
    }

    /// Oracle knowing no price.
    pub fn none() -> Self {
        Self::with(OracleBehavior::NoPrice)
    }

    pub fn failing() -> Self {
        Self::with(OracleBehavior::Failing)
    }

    /// Oracle never responding.
    pub fn hanging() -> Self {
        Self::with(OracleBehavior::Hanging)
    }

    fn with(behavior: OracleBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PriceOracle for StaticOracle {
    async fn spot_price(&self, _token: Address) -> Result<Option<UD256>, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            OracleBehavior::Price(price) => Ok(Some(price)),
            OracleBehavior::NoPrice => Ok(None),
            OracleBehavior::Failing => Err(OracleError::Http("connection refused".to_string())),
            OracleBehavior::Hanging => std::future::pending().await,
        }
    }
}

/// [`NotificationSink`] recording delivered events, can be scripted to fail.
#[derive(Debug, Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<(TradeEvent, PriceQuote)>>,
    failures: Mutex<VecDeque<DeliveryError>>,
    attempts: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next delivery fails with the error.
    pub fn fail_next(&self, err: DeliveryError) {
        self.failures.lock().unwrap().push_back(err);
    }

    /// Successfully delivered events with their quotes, in delivery order.
    pub fn delivered(&self) -> Vec<(TradeEvent, PriceQuote)> {
        self.delivered.lock().unwrap().clone()
    }

    /// `(block, log index)` of successfully delivered events, in delivery order.
    pub fn positions(&self) -> Vec<(BlockNumber, u64)> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(event, _)| event.position())
            .collect()
    }

    /// Number of delivery attempts, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl NotificationSink for RecordingSink {
    async fn deliver(&self, event: &TradeEvent, quote: &PriceQuote) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        self.delivered
            .lock()
            .unwrap()
            .push((event.clone(), *quote));
        Ok(())
    }
}
