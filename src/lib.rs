//! Spot exchange trade watcher.
//!
//! # Overview
//!
//! Follows `Bought`/`Sold` events of a spot exchange contract and forwards
//! exactly one notification per on-chain trade to the configured sink.
//!
//! Logs are available through two unreliable paths: range queries
//! ([`reader::ChainReader::get_logs`]) and an optional push subscription
//! ([`reader::ChainReader::subscribe`]). [`engine::WatermarkEngine`] owns
//! the block cursor, backfills recent history on startup, polls new ranges
//! on a fixed interval and reconciles both paths through a single
//! dedupe-and-forward gate.
//!
//! Every forwarded event gets a display price from [`price::PriceResolver`]
//! (external oracle, then contract-reported price, then amounts ratio).
//!
//! # Limitations/follow-ups
//!
//! * Cursor and dedupe state are kept in memory, a restart in the middle
//!   of a range can duplicate alerts of that range.
//!
//! * Reorgs are handled only by dropping `removed` subscription logs.
//!
//! # Testing
//!
//! [`testing`] module provides scriptable in-memory chain reader, oracle
//! and sink, plus builders of raw exchange logs.

pub mod abi;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod num;
pub mod oracle;
pub mod price;
pub mod reader;
pub mod sink;
pub mod testing;
pub mod types;

use alloy::primitives::Address;

/// Default precision of the quote (stable) token.
pub const DEFAULT_QUOTE_DECIMALS: u8 = 6;

/// Default precision of the traded token.
pub const DEFAULT_BASE_DECIMALS: u8 = 18;

/// Default precision of the contract-reported price.
pub const DEFAULT_PRICE_DECIMALS: u8 = 18;

/// Exchange contract being watched.
#[derive(Clone, Debug)]
pub struct Market {
    exchange: Address,
    quote_decimals: u8,
    base_decimals: u8,
    price_decimals: u8,
}

impl Market {
    /// Market with the default token precisions.
    pub fn new(exchange: Address) -> Self {
        Self::custom(
            exchange,
            DEFAULT_QUOTE_DECIMALS,
            DEFAULT_BASE_DECIMALS,
            DEFAULT_PRICE_DECIMALS,
        )
    }

    pub fn custom(
        exchange: Address,
        quote_decimals: u8,
        base_decimals: u8,
        price_decimals: u8,
    ) -> Self {
        Self {
            exchange,
            quote_decimals,
            base_decimals,
            price_decimals,
        }
    }

    pub fn exchange(&self) -> Address {
        self.exchange
    }

    pub fn quote_decimals(&self) -> u8 {
        self.quote_decimals
    }

    pub fn base_decimals(&self) -> u8 {
        self.base_decimals
    }

    pub fn price_decimals(&self) -> u8 {
        self.price_decimals
    }
}
