mod event;
mod quote;
mod range;

pub use event::*;
pub use quote::{PriceQuote, PriceSource};
pub use range::BlockRange;

/// Raw log record as returned by the node, for both log queries and subscriptions.
pub type RawLog = alloy::rpc::types::Log;

/// Block number.
pub type BlockNumber = u64;
