//! Notification delivery.
//!
//! [`NotificationSink`] is the boundary the engine forwards priced trades to.
//! Delivery is best effort: the engine attempts it once per event and never
//! retries, a failing sink never stalls the block cursor.
//!
//! - [`Message`] - Text and link buttons rendered from a trade
//! - [`TelegramSink`] - Telegram Bot API delivery

mod message;
mod telegram;

use std::future::Future;

pub use message::{LinkButton, Message, MessageTemplate};
pub use telegram::TelegramSink;

use crate::{
    error::DeliveryError,
    types::{PriceQuote, TradeEvent},
};

/// Destination of trade notifications.
pub trait NotificationSink: Send + Sync {
    /// Formats and delivers the notification of a single trade.
    ///
    /// Rate limiting is reported as [`DeliveryError::RateLimited`] and must
    /// not be retried inline.
    fn deliver(
        &self,
        event: &TradeEvent,
        quote: &PriceQuote,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}
