use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use fastnum::udec256;
use serde_json::{Value, json};
use tokio::sync::watch;
use trade_watch::{
    engine::{EngineConfig, EngineState, WatermarkEngine},
    error::ChainError,
    oracle::HttpPriceOracle,
    reader::ChainReader,
    sink::{MessageTemplate, TelegramSink},
    testing::{self, LogBuilder, MockChainReader, RecordingSink, StaticOracle},
    types::BlockNumber,
};

/// Minimal Bot API and price API server.
#[derive(Clone, Default)]
struct MockApi {
    messages: Arc<Mutex<Vec<Value>>>,
    rate_limited: bool,
}

async fn send_message(State(api): State<MockApi>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    api.messages.lock().unwrap().push(body);
    if api.rate_limited {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "ok": false,
                "error_code": 429,
                "description": "Too Many Requests: retry after 5",
                "parameters": {"retry_after": 5}
            })),
        );
    }
    (StatusCode::OK, Json(json!({"ok": true, "result": {"message_id": 1}})))
}

async fn token_pairs(Path(_token): Path<String>) -> Json<Value> {
    Json(json!({"pairs": [{"chainId": "polygon", "priceUsd": "0.30"}]}))
}

async fn spawn_api(api: MockApi) -> String {
    let app = Router::new()
        .route("/bot123/sendMessage", post(send_message))
        .route("/tokens/:token", get(token_pairs))
        .with_state(api);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    format!("http://{addr}")
}

fn config() -> EngineConfig {
    EngineConfig {
        lookback: 100,
        ..Default::default()
    }
}

fn http_engine(
    reader: MockChainReader,
    base_url: &str,
) -> WatermarkEngine<MockChainReader, HttpPriceOracle, TelegramSink> {
    let client = reqwest::Client::new();
    let oracle = HttpPriceOracle::new(client.clone(), &format!("{base_url}/tokens").parse().unwrap());
    let template = MessageTemplate::new("https://polygonscan.com")
        .with_exchange_url("https://exchange.example");
    let sink = TelegramSink::with_api_url(client, base_url, "123", "@alerts", template);
    WatermarkEngine::new(&testing::market(), reader, oracle, sink, config())
}

/// Backfilled trades are priced by the external oracle and posted to the
/// Bot API in chain order.
#[tokio::test]
async fn test_trades_are_priced_and_posted() {
    let api = MockApi::default();
    let base_url = spawn_api(api.clone()).await;

    let reader = MockChainReader::new(500);
    reader.add_logs([
        LogBuilder::sell(udec256!(1500), udec256!(5000))
            .at(460, testing::tx_hash(2), 0)
            .build(),
        LogBuilder::buy(udec256!(250), udec256!(1000))
            .price(udec256!(0.26))
            .at(450, testing::tx_hash(1), 2)
            .build(),
    ]);
    let engine = http_engine(reader, &base_url);

    assert_eq!(engine.step().await, EngineState::Live);
    assert_eq!(engine.cursor().await, Some(500));
    assert_eq!(engine.stats().delivered, 2);

    let messages = api.messages.lock().unwrap().clone();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["chat_id"], "@alerts");
    assert_eq!(messages[0]["parse_mode"], "Markdown");

    let buy = messages[0]["text"].as_str().unwrap();
    assert!(buy.contains("BUY DETECTED"));
    assert!(buy.contains("`250.00 USDT`"));
    assert!(buy.contains("`1,000`"));
    assert!(buy.contains("`0.300000 USDT`"));
    assert!(buy.contains("Backfilled from block 450"));
    assert_eq!(
        messages[0]["reply_markup"]["inline_keyboard"][0][1]["url"],
        format!("https://polygonscan.com/tx/{}", testing::tx_hash(1))
    );
    assert_eq!(
        messages[0]["reply_markup"]["inline_keyboard"][1][0]["url"],
        "https://exchange.example/trade"
    );

    let sell = messages[1]["text"].as_str().unwrap();
    assert!(sell.contains("SELL DETECTED"));
    assert!(sell.contains("`1500.00 USDT`"));
    assert!(sell.contains("`5,000`"));
}

/// Rate limited deliveries are dropped without blocking the cursor.
#[tokio::test]
async fn test_rate_limited_deliveries_are_dropped() {
    let api = MockApi {
        rate_limited: true,
        ..Default::default()
    };
    let base_url = spawn_api(api.clone()).await;

    let reader = MockChainReader::new(500);
    reader.add_logs([testing::buy_at(450, 0), testing::sell_at(451, 0)]);
    let engine = http_engine(reader, &base_url);

    assert_eq!(engine.step().await, EngineState::Live);
    assert_eq!(engine.cursor().await, Some(500));

    let stats = engine.stats();
    assert_eq!(stats.forwarded, 2);
    assert_eq!(stats.rate_limited, 2);
    assert_eq!(stats.delivered, 0);
    // Single attempt per event
    assert_eq!(api.messages.lock().unwrap().len(), 2);
}

/// Chain height sequence including stalls and a backward glitch, every trade
/// from the backfill start on is forwarded once and in chain order.
#[tokio::test]
async fn test_every_trade_forwarded_once_in_order() {
    let reader = MockChainReader::new(500);
    let mut expected = Vec::new();
    for block in (380..=640u64).step_by(7) {
        reader.add_log(testing::buy_at(block, block % 3));
        if block % 2 == 0 {
            reader.add_log(testing::sell_at(block, 5));
        }
        if block >= 400 {
            expected.push((block, block % 3));
            if block % 2 == 0 {
                expected.push((block, 5));
            }
        }
    }
    let engine = WatermarkEngine::new(
        &testing::market(),
        reader,
        StaticOracle::none(),
        RecordingSink::new(),
        config(),
    );

    engine.step().await;
    for head in [503, 503, 510, 498, 560, 561, 640] {
        engine.reader().set_head(head);
        assert_eq!(engine.step().await, EngineState::Live);
    }

    assert_eq!(engine.cursor().await, Some(640));
    assert_eq!(engine.sink().positions(), expected);
    assert_eq!(engine.stats().duplicates, 0);
}

/// Pushed trades racing ahead of polling are not delivered again by polls,
/// including polls retried after node failures.
#[tokio::test]
async fn test_push_and_poll_overlap_delivers_once() {
    let reader = MockChainReader::new(500);
    let logs = (501..=530u64)
        .map(|block| testing::buy_at(block, 0))
        .collect::<Vec<_>>();
    reader.add_logs(logs.clone());
    let engine = WatermarkEngine::new(
        &testing::market(),
        reader,
        StaticOracle::price(udec256!(1)),
        RecordingSink::new(),
        config(),
    );
    engine.step().await;

    for log in logs.iter().filter(|log| log.block_number.unwrap_or_default() % 3 == 0) {
        assert!(engine.ingest_push(log.clone()).await);
    }

    engine.reader().set_head(515);
    engine
        .reader()
        .fail_logs(ChainError::Transport("connection reset".to_string()));
    assert!(matches!(
        engine.step().await,
        EngineState::Recovering { level: 0, .. }
    ));
    assert_eq!(engine.step().await, EngineState::Live);

    engine.reader().set_head(530);
    engine.step().await;

    let mut positions = engine.sink().positions();
    positions.sort();
    let expected = (501..=530u64)
        .map(|block| (block as BlockNumber, 0))
        .collect::<Vec<_>>();
    assert_eq!(positions, expected);
    assert_eq!(engine.stats().duplicates, 10);
}

#[tokio::test]
async fn test_inverted_range_fails_before_query() {
    let reader = MockChainReader::new(500);
    assert!(matches!(
        reader.get_logs(100, 99).await,
        Err(ChainError::InvalidRange { from: 100, to: 99 })
    ));
    assert!(reader.queries().is_empty());
    assert_eq!(reader.get_logs(100, 100).await.unwrap().len(), 0);
}

/// Node unreachable for the first queries after startup, the run loop backs
/// off and still backfills and goes live.
#[tokio::test(start_paused = true)]
async fn test_node_down_at_startup_recovers_to_live() {
    let reader = MockChainReader::new(500);
    reader.add_log(testing::buy_at(450, 0));
    reader.fail_height(ChainError::Transport("connection refused".to_string()));
    reader.fail_height(ChainError::Transport("connection refused".to_string()));
    let engine = Arc::new(WatermarkEngine::new(
        &testing::market(),
        reader,
        StaticOracle::none(),
        RecordingSink::new(),
        config(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&engine).run(shutdown_rx, tokio::time::sleep));

    // Backoff of 5s then 10s
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(engine.state().await, EngineState::Live);
    assert_eq!(engine.cursor().await, Some(500));
    assert_eq!(engine.sink().positions(), vec![(450, 0)]);
    assert_eq!(engine.stats().chain_errors, 2);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
