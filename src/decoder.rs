//! Raw log to [`TradeEvent`] decoding.

use alloy::{
    primitives::U256,
    sol_types::{SolEvent, SolEventInterface},
};
use fastnum::UD256;

use crate::{
    Market,
    abi::exchange::Exchange::{self, ExchangeEvents},
    error::DecodeError,
    num,
    types::{RawLog, TradeEvent, TradeKind},
};

/// Decodes exchange logs into normalized trade events.
///
/// Pure logic, no async, no I/O.
#[derive(Clone, Copy, Debug)]
pub struct EventDecoder {
    quote_converter: num::Converter,
    base_converter: num::Converter,
    price_converter: num::Converter,
}

impl EventDecoder {
    pub fn new(market: &Market) -> Self {
        Self {
            quote_converter: num::Converter::new(market.quote_decimals()),
            base_converter: num::Converter::new(market.base_decimals()),
            price_converter: num::Converter::new(market.price_decimals()),
        }
    }

    /// Decodes a single raw log.
    ///
    /// Logs without block/transaction context (pending) are rejected,
    /// as they can not be placed in the forwarding order.
    pub fn decode(&self, log: &RawLog) -> Result<TradeEvent, DecodeError> {
        let topic = *log.topic0().ok_or(DecodeError::MissingTopic)?;
        if topic != Exchange::Bought::SIGNATURE_HASH && topic != Exchange::Sold::SIGNATURE_HASH {
            return Err(DecodeError::UnknownTopic(topic));
        }

        let block_number = log
            .block_number
            .ok_or(DecodeError::MissingField("block number"))?;
        let tx_hash = log
            .transaction_hash
            .ok_or(DecodeError::MissingField("transaction hash"))?;
        let log_index = log
            .log_index
            .ok_or(DecodeError::MissingField("log index"))?;

        let event = match ExchangeEvents::decode_log(&log.inner)?.data {
            ExchangeEvents::Bought(e) => TradeEvent {
                kind: TradeKind::Buy,
                trader: e.user,
                token: e.token,
                quote_amount: self.quote(e.usdtIn)?,
                base_amount: self.base(e.tokenOut)?,
                on_chain_price: Some(self.price(e.price)?),
                tx_hash,
                log_index,
                block_number,
                traded_at: e.tdate.saturating_to(),
                is_historical: false,
            },
            ExchangeEvents::Sold(e) => TradeEvent {
                kind: TradeKind::Sell,
                trader: e.user,
                token: e.token,
                quote_amount: self.quote(e.usdtOut)?,
                base_amount: self.base(e.tokenIn)?,
                on_chain_price: Some(self.price(e.price)?),
                tx_hash,
                log_index,
                block_number,
                traded_at: e.tdate.saturating_to(),
                is_historical: false,
            },
        };
        Ok(event)
    }

    fn quote(&self, value: U256) -> Result<UD256, DecodeError> {
        self.quote_converter
            .from_unsigned(value)
            .ok_or(DecodeError::Overflow("quote amount"))
    }

    fn base(&self, value: U256) -> Result<UD256, DecodeError> {
        self.base_converter
            .from_unsigned(value)
            .ok_or(DecodeError::Overflow("base amount"))
    }

    fn price(&self, value: U256) -> Result<UD256, DecodeError> {
        self.price_converter
            .from_unsigned(value)
            .ok_or(DecodeError::Overflow("price"))
    }
}
