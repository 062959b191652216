use alloy::primitives::{Address, TxHash};
use fastnum::UD256;

use super::BlockNumber;

/// Direction of the trade, from the trader's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TradeKind {
    Buy,
    Sell,
}

/// Identity of the on-chain trade event, unique per emitted log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub tx_hash: TxHash,
    pub log_index: u64,
    pub kind: TradeKind,
}

/// Decoded trade event.
///
/// Quote amount is denominated in the quote (stable) token, base amount
/// in the traded token, both normalized to decimals.
#[derive(Clone, derive_more::Debug, PartialEq)]
pub struct TradeEvent {
    pub(crate) kind: TradeKind,
    pub(crate) trader: Address,
    pub(crate) token: Address,
    #[debug("{quote_amount}")]
    pub(crate) quote_amount: UD256,
    #[debug("{base_amount}")]
    pub(crate) base_amount: UD256,
    #[debug("{on_chain_price:?}")]
    pub(crate) on_chain_price: Option<UD256>,
    pub(crate) tx_hash: TxHash,
    pub(crate) log_index: u64,
    pub(crate) block_number: BlockNumber,
    pub(crate) traded_at: u64,
    pub(crate) is_historical: bool,
}

impl TradeEvent {
    pub fn kind(&self) -> TradeKind {
        self.kind
    }

    /// Address of the account that traded.
    pub fn trader(&self) -> Address {
        self.trader
    }

    /// Address of the traded (base) token.
    pub fn token(&self) -> Address {
        self.token
    }

    pub fn quote_amount(&self) -> UD256 {
        self.quote_amount
    }

    pub fn base_amount(&self) -> UD256 {
        self.base_amount
    }

    /// Price reported by the exchange contract in the event, if any.
    pub fn on_chain_price(&self) -> Option<UD256> {
        self.on_chain_price
    }

    pub fn tx_hash(&self) -> TxHash {
        self.tx_hash
    }

    pub fn log_index(&self) -> u64 {
        self.log_index
    }

    pub fn block_number(&self) -> BlockNumber {
        self.block_number
    }

    /// Trade timestamp as reported by the contract.
    pub fn traded_at(&self) -> u64 {
        self.traded_at
    }

    /// True if the event was observed during the startup backfill.
    pub fn is_historical(&self) -> bool {
        self.is_historical
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            tx_hash: self.tx_hash,
            log_index: self.log_index,
            kind: self.kind,
        }
    }

    /// Position of the event in the chain, forwarding order.
    pub fn position(&self) -> (BlockNumber, u64) {
        (self.block_number, self.log_index)
    }

    pub(crate) fn into_historical(self) -> Self {
        Self {
            is_historical: true,
            ..self
        }
    }
}
