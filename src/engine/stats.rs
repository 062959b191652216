use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of engine counters since startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Events passed to the price resolver and sink.
    pub forwarded: u64,
    /// Events the sink accepted.
    pub delivered: u64,
    /// Events suppressed by the dedupe window.
    pub duplicates: u64,
    /// Events sharing a position or identity with an earlier one in the same batch.
    pub anomalies: u64,
    /// Logs that failed to decode.
    pub decode_errors: u64,
    /// Deliveries rejected by the sink for reasons other than rate limiting.
    pub delivery_failures: u64,
    /// Deliveries dropped due to rate limiting.
    pub rate_limited: u64,
    /// Events below the minimum alert amount.
    pub filtered: u64,
    /// Pushed events too far behind the cursor to deduplicate.
    pub stale: u64,
    /// Logs flagged as removed by a reorg.
    pub removed: u64,
    /// Failed height or log queries.
    pub chain_errors: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) forwarded: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) duplicates: AtomicU64,
    pub(crate) anomalies: AtomicU64,
    pub(crate) decode_errors: AtomicU64,
    pub(crate) delivery_failures: AtomicU64,
    pub(crate) rate_limited: AtomicU64,
    pub(crate) filtered: AtomicU64,
    pub(crate) stale: AtomicU64,
    pub(crate) removed: AtomicU64,
    pub(crate) chain_errors: AtomicU64,
}

pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    pub(crate) fn snapshot(&self) -> EngineStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        EngineStats {
            forwarded: get(&self.forwarded),
            delivered: get(&self.delivered),
            duplicates: get(&self.duplicates),
            anomalies: get(&self.anomalies),
            decode_errors: get(&self.decode_errors),
            delivery_failures: get(&self.delivery_failures),
            rate_limited: get(&self.rate_limited),
            filtered: get(&self.filtered),
            stale: get(&self.stale),
            removed: get(&self.removed),
            chain_errors: get(&self.chain_errors),
        }
    }
}
