//! Configuration for the trade watcher.
//!
//! Configuration comes from two sources:
//! - Environment variables (via .env file or shell): endpoints, contract, credentials
//! - CLI arguments: engine tuning parameters

use std::time::Duration;

use alloy::primitives::Address;
use clap::Parser;
use fastnum::{UD256, decimal::Context};
use trade_watch::{Market, engine::EngineConfig};
use url::Url;

/// Default block explorer, the exchange is deployed on Polygon.
const DEFAULT_EXPLORER_URL: &str = "https://polygonscan.com";

/// Default liveness server port.
const DEFAULT_PORT: u16 = 8080;

/// Environment configuration (endpoints, credentials).
#[derive(Debug, serde::Deserialize)]
pub struct EnvConfig {
    /// RPC URL of the node, `ws://` or `wss://` enables push subscriptions
    pub rpc_url: String,

    /// Exchange contract address
    pub contract_address: String,

    /// Telegram bot token
    pub bot_token: String,

    /// Telegram chat receiving alerts (numeric ID or `@channel`)
    pub channel_id: String,

    /// Optional external price API, queried as `{ORACLE_URL}/{token}`
    pub oracle_url: Option<String>,

    /// Optional block explorer (default: Polygonscan)
    pub explorer_url: Option<String>,

    /// Optional exchange site linked from alerts
    pub exchange_url: Option<String>,

    /// Optional last processed block, backfill resumes above it
    pub start_block: Option<u64>,

    /// Optional liveness server port (default: 8080)
    pub port: Option<u16>,
}

impl EnvConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn contract_address(&self) -> Result<Address, ConfigError> {
        self.contract_address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.contract_address.clone()))
    }

    pub fn rpc_url(&self) -> Result<Url, ConfigError> {
        parse_url("RPC_URL", &self.rpc_url)
    }

    pub fn oracle_url(&self) -> Result<Option<Url>, ConfigError> {
        self.oracle_url
            .as_deref()
            .map(|url| parse_url("ORACLE_URL", url))
            .transpose()
    }

    pub fn explorer_url(&self) -> Result<Url, ConfigError> {
        parse_url(
            "EXPLORER_URL",
            self.explorer_url.as_deref().unwrap_or(DEFAULT_EXPLORER_URL),
        )
    }

    pub fn exchange_url(&self) -> Result<Option<Url>, ConfigError> {
        self.exchange_url
            .as_deref()
            .map(|url| parse_url("EXCHANGE_URL", url))
            .transpose()
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

fn parse_url(name: &'static str, url: &str) -> Result<Url, ConfigError> {
    Url::parse(url).map_err(|e| ConfigError::InvalidUrl(name, e))
}

/// CLI arguments for engine tuning.
#[derive(Debug, Parser)]
#[command(name = "trade-watch")]
#[command(about = "Forwards spot exchange trades to a Telegram channel")]
pub struct CliConfig {
    /// Interval between live range polls, in seconds
    #[arg(long, default_value = "15")]
    pub poll_interval: u64,

    /// Number of blocks to backfill on startup
    #[arg(long, default_value = "1000")]
    pub lookback: u64,

    /// Initial retry delay after a node failure, in seconds
    #[arg(long, default_value = "5")]
    pub backoff_floor: u64,

    /// Maximum retry delay after node failures, in seconds
    #[arg(long, default_value = "60")]
    pub backoff_cap: u64,

    /// Number of blocks behind the cursor seen events are remembered for
    #[arg(long, default_value = "256")]
    pub dedupe_retention: u64,

    /// Maximum number of remembered events
    #[arg(long, default_value = "10000")]
    pub dedupe_capacity: usize,

    /// Maximum span of a single log query, in blocks
    #[arg(long, default_value = "2000")]
    pub max_block_range: u64,

    /// Timeout of external price requests, in milliseconds
    #[arg(long, default_value = "3000")]
    pub oracle_timeout_ms: u64,

    /// Resubscribe when push subscription is silent for this long, in seconds
    #[arg(long, default_value = "300")]
    pub push_idle_timeout: u64,

    /// Minimum quote amount of alerted trades (e.g., 100.0)
    #[arg(long, default_value = "0")]
    pub min_alert_amount: String,

    /// Decimals of the quote (stable) token
    #[arg(long, default_value = "6")]
    pub quote_decimals: u8,

    /// Decimals of the traded token
    #[arg(long, default_value = "18")]
    pub base_decimals: u8,

    /// Decimals of the price reported in events
    #[arg(long, default_value = "18")]
    pub price_decimals: u8,

    /// Symbol of the quote token in alerts
    #[arg(long, default_value = "USDT")]
    pub quote_symbol: String,
}

impl CliConfig {
    /// Convert CLI config to the engine configuration.
    pub fn to_engine_config(&self, start_block: Option<u64>) -> Result<EngineConfig, ConfigError> {
        if self.poll_interval == 0 {
            return Err(ConfigError::ZeroDuration("poll_interval"));
        }
        if self.backoff_floor == 0 {
            return Err(ConfigError::ZeroDuration("backoff_floor"));
        }
        if self.backoff_cap < self.backoff_floor {
            return Err(ConfigError::InvalidBackoff);
        }
        if self.max_block_range == 0 {
            return Err(ConfigError::ZeroBlockRange);
        }

        let min_quote_amount = UD256::from_str(&self.min_alert_amount, Context::default())
            .map_err(|_| ConfigError::InvalidAmount(self.min_alert_amount.clone()))?;

        Ok(EngineConfig {
            poll_interval: Duration::from_secs(self.poll_interval),
            lookback: self.lookback,
            start_cursor: start_block,
            max_block_range: self.max_block_range,
            backoff_floor: Duration::from_secs(self.backoff_floor),
            backoff_cap: Duration::from_secs(self.backoff_cap),
            dedupe_retention: self.dedupe_retention,
            dedupe_capacity: self.dedupe_capacity,
            oracle_timeout: Duration::from_millis(self.oracle_timeout_ms),
            min_quote_amount,
            push_idle_timeout: Duration::from_secs(self.push_idle_timeout),
        })
    }

    pub fn to_market(&self, exchange: Address) -> Market {
        Market::custom(
            exchange,
            self.quote_decimals,
            self.base_decimals,
            self.price_decimals,
        )
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid contract address: {0}")]
    InvalidAddress(String),

    #[error("Invalid {0}: {1}")]
    InvalidUrl(&'static str, url::ParseError),

    #[error("Invalid amount value: {0}")]
    InvalidAmount(String),

    #[error("{0} cannot be zero")]
    ZeroDuration(&'static str),

    #[error("backoff_cap must not be less than backoff_floor")]
    InvalidBackoff,

    #[error("max_block_range cannot be zero")]
    ZeroBlockRange,
}
