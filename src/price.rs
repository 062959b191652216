//! Display price resolution.

use std::time::Duration;

use tracing::debug;

use crate::{
    oracle::PriceOracle,
    types::{PriceQuote, PriceSource, TradeEvent},
};

/// Default bound of a single oracle request.
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(3);

/// Resolves display price of a trade with a fixed fallback order:
///
/// 1. External oracle price, if positive and received within the timeout.
/// 2. Price reported by the contract in the event, if positive.
/// 3. Quote amount divided by base amount, if base amount is positive.
/// 4. Zero, market price unknown.
///
/// Oracle failures never propagate.
#[derive(Clone, Debug)]
pub struct PriceResolver<O> {
    oracle: O,
    timeout: Duration,
}

impl<O: PriceOracle> PriceResolver<O> {
    pub fn new(oracle: O, timeout: Duration) -> Self {
        Self { oracle, timeout }
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub async fn resolve(&self, event: &TradeEvent) -> PriceQuote {
        match tokio::time::timeout(self.timeout, self.oracle.spot_price(event.token())).await {
            Ok(Ok(Some(price))) if !price.is_zero() => {
                return PriceQuote::new(price, PriceSource::External);
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!(%e, token = %event.token(), "external price unavailable"),
            Err(_) => debug!(token = %event.token(), timeout = ?self.timeout, "external price timed out"),
        }

        if let Some(price) = event.on_chain_price().filter(|p| !p.is_zero()) {
            return PriceQuote::new(price, PriceSource::OnChain);
        }

        if !event.base_amount().is_zero() {
            return PriceQuote::new(
                event.quote_amount() / event.base_amount(),
                PriceSource::Computed,
            );
        }

        PriceQuote::unknown()
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::B256;
    use fastnum::{UD256, udec256};

    use super::*;
    use crate::testing::{self, StaticOracle};

    fn event(quote: UD256, base: UD256, price: Option<UD256>) -> TradeEvent {
        let mut builder = testing::LogBuilder::buy(quote, base).at(1, B256::repeat_byte(1), 0);
        if let Some(price) = price {
            builder = builder.price(price);
        }
        let mut event = testing::decode(&builder.build());
        if price.is_none() {
            event.on_chain_price = None;
        }
        event
    }

    #[tokio::test]
    async fn test_computed_ratio_when_oracle_unavailable() {
        let resolver = PriceResolver::new(StaticOracle::failing(), DEFAULT_ORACLE_TIMEOUT);
        let quote = resolver
            .resolve(&event(udec256!(250.00), udec256!(1000.0), None))
            .await;
        assert_eq!(quote, PriceQuote::new(udec256!(0.25), PriceSource::Computed));
    }

    #[tokio::test]
    async fn test_external_price_wins() {
        let resolver = PriceResolver::new(StaticOracle::price(udec256!(0.30)), DEFAULT_ORACLE_TIMEOUT);
        let quote = resolver
            .resolve(&event(udec256!(250), udec256!(1000), Some(udec256!(0.27))))
            .await;
        assert_eq!(quote, PriceQuote::new(udec256!(0.30), PriceSource::External));
        assert_eq!(resolver.oracle().calls(), 1);
    }

    #[tokio::test]
    async fn test_on_chain_price_before_ratio() {
        let resolver = PriceResolver::new(StaticOracle::none(), DEFAULT_ORACLE_TIMEOUT);
        let quote = resolver
            .resolve(&event(udec256!(250), udec256!(1000), Some(udec256!(0.27))))
            .await;
        assert_eq!(quote, PriceQuote::new(udec256!(0.27), PriceSource::OnChain));
    }

    #[tokio::test]
    async fn test_zero_prices_fall_through() {
        let resolver = PriceResolver::new(StaticOracle::price(udec256!(0)), DEFAULT_ORACLE_TIMEOUT);
        let quote = resolver
            .resolve(&event(udec256!(30), udec256!(60), Some(udec256!(0))))
            .await;
        assert_eq!(quote, PriceQuote::new(udec256!(0.5), PriceSource::Computed));
    }

    #[tokio::test]
    async fn test_degenerate_amounts() {
        let resolver = PriceResolver::new(StaticOracle::none(), DEFAULT_ORACLE_TIMEOUT);
        let quote = resolver
            .resolve(&event(udec256!(30), udec256!(0), None))
            .await;
        assert_eq!(quote, PriceQuote::unknown());
        assert!(!quote.is_known());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_oracle_is_bounded_by_timeout() {
        let resolver = PriceResolver::new(StaticOracle::hanging(), Duration::from_secs(3));
        let started = tokio::time::Instant::now();
        let quote = resolver
            .resolve(&event(udec256!(250), udec256!(1000), Some(udec256!(0.26))))
            .await;
        assert_eq!(quote, PriceQuote::new(udec256!(0.26), PriceSource::OnChain));
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
