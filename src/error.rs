use std::fmt::Display;

use alloy::{primitives::B256, sol_types, transports};

/// Error returned by the [`crate::reader::ChainReader`] for height and log queries.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected empty RPC response")]
    NullResp,

    #[error("block range too large: {0}")]
    RangeTooLarge(String),

    #[error("invalid block range, from: {from}, to: {to}")]
    InvalidRange { from: u64, to: u64 },
}

/// Error produced while decoding raw log into [`crate::types::TradeEvent`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("log has no topics")]
    MissingTopic,

    #[error("unknown event signature: {0}")]
    UnknownTopic(B256),

    #[error("malformed event data: {0}")]
    Abi(String),

    #[error("log is missing {0}")]
    MissingField(&'static str),

    #[error("{0} does not fit into decimal")]
    Overflow(&'static str),
}

/// Error returned by [`crate::oracle::PriceOracle`], never leaves
/// [`crate::price::PriceResolver`].
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Http(String),

    #[error("oracle responded with status {0}")]
    Status(u16),

    #[error("malformed oracle response: {0}")]
    Parse(String),

    #[error("oracle request timed out")]
    Timeout,
}

/// Error returned by [`crate::sink::NotificationSink`].
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("rate limited, retry after: {retry_after:?}s")]
    RateLimited { retry_after: Option<u64> },

    #[error("message rejected with status {status}: {description}")]
    Rejected { status: u16, description: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl DeliveryError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl<E: Display> From<transports::RpcError<E>> for ChainError {
    fn from(value: transports::RpcError<E>) -> Self {
        match value {
            transports::RpcError::ErrorResp(ref resp) => {
                // Heuristic to detect log query span rejections, providers
                // disagree on both codes and wording
                let msg = resp.message.to_ascii_lowercase();
                if resp.code == -32005
                    || msg.contains("block range")
                    || msg.contains("range is too large")
                    || msg.contains("too many results")
                    || msg.contains("query returned more than")
                    || (msg.contains("limit") && msg.contains("exceed"))
                {
                    Self::RangeTooLarge(msg)
                } else {
                    Self::Transport(value.to_string())
                }
            }
            transports::RpcError::NullResp => Self::NullResp,
            _ => Self::Transport(value.to_string()),
        }
    }
}

impl From<sol_types::Error> for DecodeError {
    fn from(value: sol_types::Error) -> Self {
        Self::Abi(value.to_string())
    }
}

impl From<reqwest::Error> for OracleError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            Self::Timeout
        } else if value.is_decode() {
            Self::Parse(value.to_string())
        } else {
            Self::Http(value.to_string())
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use alloy::rpc::json_rpc::ErrorPayload;

    use super::*;

    fn error_resp(code: i64, message: &str) -> transports::TransportError {
        transports::RpcError::ErrorResp(ErrorPayload {
            code,
            message: message.to_string().into(),
            data: None,
        })
    }

    #[test]
    fn test_range_rejections_are_detected() {
        assert!(matches!(
            ChainError::from(error_resp(-32005, "query returned more than 10000 results")),
            ChainError::RangeTooLarge(_)
        ));
        assert!(matches!(
            ChainError::from(error_resp(-32600, "eth_getLogs block range is too large")),
            ChainError::RangeTooLarge(_)
        ));
        assert!(matches!(
            ChainError::from(error_resp(-32000, "Log response size exceeded, limit is 10000")),
            ChainError::RangeTooLarge(_)
        ));
    }

    #[test]
    fn test_other_errors_are_transport() {
        assert!(matches!(
            ChainError::from(error_resp(-32603, "internal error")),
            ChainError::Transport(_)
        ));
        assert!(matches!(
            ChainError::from(transports::TransportError::NullResp),
            ChainError::NullResp
        ));
    }
}
