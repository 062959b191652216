use crate::error::ChainError;

use super::BlockNumber;

/// Closed block range, both bounds inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockRange {
    from: BlockNumber,
    to: BlockNumber,
}

impl BlockRange {
    /// Creates a new range, failing if `to < from`.
    pub fn new(from: BlockNumber, to: BlockNumber) -> Result<Self, ChainError> {
        if to < from {
            return Err(ChainError::InvalidRange { from, to });
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> BlockNumber {
        self.from
    }

    pub fn to(&self) -> BlockNumber {
        self.to
    }

    /// Number of blocks in the range.
    pub fn len(&self) -> u64 {
        self.to - self.from + 1
    }

    /// Splits the range into two halves, `None` for a single block.
    pub fn halve(&self) -> Option<(Self, Self)> {
        if self.from == self.to {
            return None;
        }
        let mid = self.from + (self.to - self.from) / 2;
        Some((
            Self {
                from: self.from,
                to: mid,
            },
            Self {
                from: mid + 1,
                to: self.to,
            },
        ))
    }

    /// Consecutive sub-ranges of at most `max_len` blocks, in ascending order.
    pub fn chunks(&self, max_len: u64) -> impl Iterator<Item = Self> + use<> {
        let (to, step) = (self.to, max_len.max(1));
        let mut next = Some(self.from);
        std::iter::from_fn(move || {
            let from = next?;
            let end = from.saturating_add(step - 1).min(to);
            next = (end < to).then_some(end + 1);
            Some(Self { from, to: end })
        })
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}
