use std::future::Future;

use alloy::{providers::Provider, rpc::types::Filter, sol_types::SolEvent};
use futures::{StreamExt, stream::BoxStream};

use crate::{
    Market,
    abi::exchange::Exchange,
    error::ChainError,
    types::{BlockNumber, BlockRange, RawLog},
};

/// Stream of logs pushed by the node subscription.
///
/// May silently stop producing on connection loss, the consumer is
/// responsible for staleness detection.
pub type LogStream = BoxStream<'static, RawLog>;

/// Access to the exchange contract logs.
pub trait ChainReader: Send + Sync {
    /// Returns the current block height of the chain.
    fn current_height(&self) -> impl Future<Output = Result<BlockNumber, ChainError>> + Send;

    /// Returns exchange trade logs of the validated block range.
    fn fetch_logs(
        &self,
        range: BlockRange,
    ) -> impl Future<Output = Result<Vec<RawLog>, ChainError>> + Send;

    /// Opens push subscription to exchange trade logs, if supported.
    fn subscribe(&self) -> impl Future<Output = Result<Option<LogStream>, ChainError>> + Send {
        async { Ok(None) }
    }

    /// Returns exchange trade logs emitted within `[from, to]`.
    ///
    /// Fails with [`ChainError::InvalidRange`] before any network call if
    /// `to < from`, and with [`ChainError::RangeTooLarge`] if the node rejects
    /// the span.
    fn get_logs(
        &self,
        from: BlockNumber,
        to: BlockNumber,
    ) -> impl Future<Output = Result<Vec<RawLog>, ChainError>> + Send {
        let range = BlockRange::new(from, to);
        async move { self.fetch_logs(range?).await }
    }
}

/// [`ChainReader`] backed by JSON-RPC [`Provider`].
///
/// It is recommended to setup provider with
/// [`alloy::transports::layers::RetryBackoffLayer`] to smooth out
/// short node hiccups before they reach the engine backoff.
#[derive(Clone, Debug)]
pub struct RpcChainReader<P> {
    provider: P,
    filter: Filter,
    subscriptions: bool,
}

impl<P: Provider> RpcChainReader<P> {
    pub fn new(market: &Market, provider: P) -> Self {
        Self {
            provider,
            filter: trade_filter(market),
            subscriptions: false,
        }
    }

    /// Enables push subscriptions, requires pubsub-capable (WebSocket) transport.
    pub fn with_subscriptions(mut self, enabled: bool) -> Self {
        self.subscriptions = enabled;
        self
    }
}

/// Log filter matching trade events of the market exchange.
pub fn trade_filter(market: &Market) -> Filter {
    Filter::new()
        .address(market.exchange())
        .event_signature(vec![
            Exchange::Bought::SIGNATURE_HASH,
            Exchange::Sold::SIGNATURE_HASH,
        ])
}

impl<P: Provider> ChainReader for RpcChainReader<P> {
    async fn current_height(&self) -> Result<BlockNumber, ChainError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn fetch_logs(&self, range: BlockRange) -> Result<Vec<RawLog>, ChainError> {
        let filter = self
            .filter
            .clone()
            .from_block(range.from())
            .to_block(range.to());
        Ok(self.provider.get_logs(&filter).await?)
    }

    async fn subscribe(&self) -> Result<Option<LogStream>, ChainError> {
        if !self.subscriptions {
            return Ok(None);
        }
        let subscription = self.provider.subscribe_logs(&self.filter).await?;
        Ok(Some(subscription.into_stream().boxed()))
    }
}
