use std::collections::{BTreeSet, HashMap};

use crate::types::{BlockNumber, EventKey};

/// Outcome of offering an event key to the [`DedupeWindow`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// First sighting, key recorded.
    Fresh,
    /// Key already recorded.
    Duplicate,
    /// Block is below the pruned horizon, the window can no longer tell.
    Stale,
}

/// Bounded set of recently forwarded event keys.
///
/// Entries are evicted once their block falls behind the cursor by more than
/// `retention` blocks, or lowest blocks first when above `capacity`.
/// Entries above the cursor (pushed ahead of polling) are never pruned by
/// cursor movement. Keys of blocks below the last pruned horizon are refused.
#[derive(Clone, Debug)]
pub struct DedupeWindow {
    retention: u64,
    capacity: usize,
    horizon: BlockNumber,
    keys: HashMap<EventKey, BlockNumber>,
    by_block: BTreeSet<(BlockNumber, EventKey)>,
}

impl DedupeWindow {
    pub fn new(retention: u64, capacity: usize) -> Self {
        Self {
            retention,
            capacity: capacity.max(1),
            horizon: 0,
            keys: HashMap::new(),
            by_block: BTreeSet::new(),
        }
    }

    /// Records the key unless it was seen already or its block is stale.
    pub fn admit(&mut self, key: EventKey, block: BlockNumber) -> Admission {
        if block < self.horizon {
            return Admission::Stale;
        }
        if self.keys.contains_key(&key) {
            return Admission::Duplicate;
        }
        self.keys.insert(key, block);
        self.by_block.insert((block, key));
        while self.keys.len() > self.capacity {
            let Some((_, evicted)) = self.by_block.pop_first() else {
                break;
            };
            self.keys.remove(&evicted);
        }
        Admission::Fresh
    }

    pub fn contains(&self, key: &EventKey) -> bool {
        self.keys.contains_key(key)
    }

    /// Drops entries which fell behind the cursor by more than the retention.
    pub fn prune(&mut self, cursor: BlockNumber) {
        self.horizon = self.horizon.max(cursor.saturating_sub(self.retention));
        while let Some(&(block, key)) = self.by_block.first() {
            if block >= self.horizon {
                break;
            }
            self.by_block.pop_first();
            self.keys.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::B256;

    use super::*;
    use crate::types::TradeKind;

    fn key(tx: u8, log_index: u64, kind: TradeKind) -> EventKey {
        EventKey {
            tx_hash: B256::repeat_byte(tx),
            log_index,
            kind,
        }
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut window = DedupeWindow::new(10, 100);
        assert_eq!(window.admit(key(1, 0, TradeKind::Buy), 5), Admission::Fresh);
        assert_eq!(window.admit(key(1, 0, TradeKind::Buy), 5), Admission::Duplicate);
        // Same position, different kind is a different event
        assert_eq!(window.admit(key(1, 0, TradeKind::Sell), 5), Admission::Fresh);
        assert_eq!(window.admit(key(1, 1, TradeKind::Buy), 5), Admission::Fresh);
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn test_prune_by_retention() {
        let mut window = DedupeWindow::new(10, 100);
        window.admit(key(1, 0, TradeKind::Buy), 89);
        window.admit(key(2, 0, TradeKind::Buy), 90);
        window.admit(key(3, 0, TradeKind::Buy), 120);

        window.prune(100);
        assert!(!window.contains(&key(1, 0, TradeKind::Buy)));
        assert!(window.contains(&key(2, 0, TradeKind::Buy)));
        // Pushed ahead of the cursor
        assert!(window.contains(&key(3, 0, TradeKind::Buy)));

        assert_eq!(window.admit(key(1, 0, TradeKind::Buy), 89), Admission::Stale);
        assert_eq!(window.admit(key(4, 0, TradeKind::Buy), 90), Admission::Fresh);
    }

    #[test]
    fn test_capacity_evicts_lowest_blocks() {
        let mut window = DedupeWindow::new(1000, 2);
        window.admit(key(1, 0, TradeKind::Buy), 30);
        window.admit(key(2, 0, TradeKind::Buy), 10);
        window.admit(key(3, 0, TradeKind::Buy), 20);

        assert_eq!(window.len(), 2);
        assert!(!window.contains(&key(2, 0, TradeKind::Buy)));
        assert!(window.contains(&key(1, 0, TradeKind::Buy)));
        assert!(window.contains(&key(3, 0, TradeKind::Buy)));
    }

    #[test]
    fn test_prune_near_genesis() {
        let mut window = DedupeWindow::new(10, 100);
        window.admit(key(1, 0, TradeKind::Buy), 0);
        window.prune(5);
        assert!(!window.is_empty());
    }

    #[test]
    fn test_pruned_key_is_not_readmitted() {
        let mut window = DedupeWindow::new(10, 100);
        assert_eq!(window.admit(key(1, 0, TradeKind::Buy), 50), Admission::Fresh);
        window.prune(100);
        assert!(!window.contains(&key(1, 0, TradeKind::Buy)));
        // Horizon never moves back with a lower cursor
        window.prune(20);
        assert_eq!(window.admit(key(1, 0, TradeKind::Buy), 50), Admission::Stale);
        assert!(window.is_empty());
    }
}
