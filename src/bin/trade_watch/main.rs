//! Trade watcher for the spot exchange.
//!
//! This binary follows `Bought`/`Sold` events of the exchange contract and
//! posts an alert per trade to a Telegram channel.

mod config;
mod error;
mod health;

use std::{fmt::Display, future::Future, process::exit, sync::Arc, time::Duration};

use alloy::{
    providers::{DynProvider, ProviderBuilder},
    rpc::client::RpcClient,
    transports::layers::RetryBackoffLayer,
};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use trade_watch::{
    engine::{Backoff, WatermarkEngine},
    oracle::HttpPriceOracle,
    reader::RpcChainReader,
    sink::{MessageTemplate, TelegramSink},
};

use config::{CliConfig, EnvConfig};
use error::Result;

#[tokio::main]
async fn main() {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Failed to load .env file: {}", e);
    }

    // Parse environment configuration
    let env_config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to parse environment configuration: {}", e);
            exit(1);
        }
    };

    // Parse CLI arguments
    let cli_config = CliConfig::parse();

    // Set up logging
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run(env_config, cli_config).await {
        error!(%e, "Trade watcher encountered an error, shutting down");
        exit(1);
    }
}

async fn run(env_config: EnvConfig, cli_config: CliConfig) -> Result<()> {
    let engine_config = cli_config.to_engine_config(env_config.start_block)?;
    let market = cli_config.to_market(env_config.contract_address()?);
    let rpc_url = env_config.rpc_url()?;
    let subscriptions = matches!(rpc_url.scheme(), "ws" | "wss");

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let mut template = MessageTemplate::new(env_config.explorer_url()?.as_str())
        .with_quote_symbol(&cli_config.quote_symbol);
    if let Some(exchange_url) = env_config.exchange_url()? {
        template = template.with_exchange_url(exchange_url.as_str());
    }
    let sink = TelegramSink::new(
        http.clone(),
        &env_config.bot_token,
        &env_config.channel_id,
        template,
    );
    let oracle = env_config
        .oracle_url()?
        .map(|url| HttpPriceOracle::new(http.clone(), &url));

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, finishing in-flight range");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Dropping the sender would stop the engine
                error!(%e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        }
    });

    let port = env_config.port();
    let liveness_shutdown = shutdown_rx.clone();
    let liveness = tokio::spawn(async move {
        if let Err(e) = health::serve(port, liveness_shutdown).await {
            error!(%e, port, "Liveness server failed");
        }
    });

    info!(
        exchange = %market.exchange(),
        subscriptions,
        oracle = oracle.is_some(),
        "Connecting to {} ...",
        rpc_url.host_str().unwrap_or_default()
    );

    // Build RPC client with retry layer, node failures are retried until shutdown
    let backoff = Backoff::new(engine_config.backoff_floor, engine_config.backoff_cap);
    let endpoint = rpc_url.as_str();
    let connected = connect_with_retry(backoff, &mut shutdown_rx, || {
        RpcClient::builder()
            .layer(RetryBackoffLayer::new(10, 100, 200))
            .connect(endpoint)
    })
    .await;
    let Some(client) = connected else {
        info!("Shutdown requested before the node was reachable");
        if let Err(e) = liveness.await {
            error!(%e, "Liveness server task failed");
        }
        return Ok(());
    };
    let provider = DynProvider::new(ProviderBuilder::new().connect_client(client));
    info!("Connected");

    let reader = RpcChainReader::new(&market, provider).with_subscriptions(subscriptions);
    let engine = Arc::new(WatermarkEngine::new(
        &market,
        reader,
        oracle,
        sink,
        engine_config,
    ));

    engine.run(shutdown_rx, tokio::time::sleep).await;

    if let Err(e) = liveness.await {
        error!(%e, "Liveness server task failed");
    }
    Ok(())
}

/// Calls `connect` until it succeeds, waiting `backoff` between attempts.
/// Returns `None` if shutdown is requested first.
async fn connect_with_retry<T, E, F, Fut>(
    backoff: Backoff,
    shutdown: &mut watch::Receiver<bool>,
    mut connect: F,
) -> Option<T>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut level = 0u32;
    loop {
        if *shutdown.borrow() {
            return None;
        }
        let attempt = tokio::select! {
            attempt = connect() => attempt,
            _ = shutdown.changed() => return None,
        };
        match attempt {
            Ok(connected) => return Some(connected),
            Err(e) => {
                let delay = backoff.delay(level);
                warn!(%e, level, ?delay, "Failed to connect to RPC node, retrying");
                level = level.saturating_add(1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => return None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::Instant;

    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_secs(5), Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_until_node_is_reachable() {
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let attempts = &AtomicUsize::new(0);
        let started = Instant::now();

        let connected = connect_with_retry(backoff(), &mut shutdown_rx, move || async move {
            match attempts.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err("connection refused"),
                n => Ok(n),
            }
        })
        .await;

        assert_eq!(connected, Some(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_on_shutdown() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let attempts = &AtomicUsize::new(0);

        let connecting = connect_with_retry(backoff(), &mut shutdown_rx, move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("connection refused")
        });
        let stop = async {
            tokio::time::sleep(Duration::from_secs(12)).await;
            shutdown_tx.send(true).unwrap();
        };
        let (connected, ()) = tokio::join!(connecting, stop);

        assert_eq!(connected, None);
        // Attempts at 0s and 5s, the retry due at 15s never runs
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
