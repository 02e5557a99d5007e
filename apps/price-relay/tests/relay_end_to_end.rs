//! Relay End-to-End Integration Tests
//!
//! Runs the full relay against a local mock of the Finnhub stream and
//! drives it with real downstream WebSocket clients.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, connect_async};
use tokio_util::sync::CancellationToken;

use price_relay::application::ports::SymbolDemand;
use price_relay::{
    FeedHandle, FeedState, FinnhubClient, FinnhubClientConfig, FinnhubCredentials,
    InMemoryWatchlistStore, ReconnectConfig, RelayContext, RelayServer, RelayServerState,
    SessionSettings, run_dispatcher,
};

const WAIT: Duration = Duration::from_secs(5);

type Downstream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Mock Finnhub endpoint accepting a single connection.
struct MockUpstream {
    /// Control frames received from the relay.
    received: mpsc::UnboundedReceiver<Value>,
    /// Frames to push to the relay.
    outbound: mpsc::UnboundedSender<String>,
}

async fn spawn_mock_upstream() -> (String, MockUpstream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (received_tx, received) = mpsc::unbounded_channel();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if write.send(Message::text(frame)).await.is_err() {
                        break;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let value: Value = serde_json::from_str(text.as_str()).unwrap();
                            let _ = received_tx.send(value);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(_)) | None => break,
                    }
                }
            }
        }
    });

    (
        format!("ws://{addr}"),
        MockUpstream { received, outbound },
    )
}

struct Harness {
    relay: Arc<RelayContext>,
    feed_state: Arc<FeedState>,
    downstream_url: String,
    cancel: CancellationToken,
}

async fn start_relay(upstream_url: String, store: InMemoryWatchlistStore) -> Harness {
    let cancel = CancellationToken::new();

    let (handle, commands) = FeedHandle::channel();
    let relay = Arc::new(RelayContext::new(Arc::new(handle)));

    let (event_tx, event_rx) = mpsc::channel(1024);
    let mut config =
        FinnhubClientConfig::new(upstream_url, FinnhubCredentials::new("test-key".into()));
    config.reconnect = ReconnectConfig::fixed(Duration::from_millis(50));
    let client = Arc::new(FinnhubClient::new(
        config,
        Arc::clone(&relay) as Arc<dyn SymbolDemand>,
        commands,
        event_tx,
        cancel.clone(),
    ));
    let feed_state = client.state();
    client.connect().unwrap();

    tokio::spawn(run_dispatcher(event_rx, Arc::clone(&relay)));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = RelayServer::new(
        addr.port(),
        Arc::new(RelayServerState::new(
            Arc::clone(&relay),
            Arc::new(store),
            SessionSettings::default(),
        )),
        cancel.clone(),
    );
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });

    Harness {
        relay,
        feed_state,
        downstream_url: format!("ws://{addr}/ws"),
        cancel,
    }
}

async fn wait_until_connected(feed_state: &FeedState) {
    timeout(WAIT, async {
        while !feed_state.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("upstream never connected");
}

async fn wait_for_subscriptions(relay: &RelayContext, expected: usize) {
    timeout(WAIT, async {
        while relay.stats().subscriptions != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscription count never reached");
}

async fn connect_downstream(url: &str) -> Downstream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn send_json(ws: &mut Downstream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn next_json(ws: &mut Downstream) -> Value {
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str::<Value>(text.as_str()).unwrap();
                }
                Some(Ok(_)) => {}
                other => panic!("downstream closed: {other:?}"),
            }
        }
    })
    .await
    .expect("no downstream message")
}

async fn next_upstream(mock: &mut MockUpstream) -> Value {
    timeout(WAIT, mock.received.recv())
        .await
        .expect("no upstream frame")
        .expect("upstream mock stopped")
}

fn trade_frame(symbol: &str, price: f64) -> String {
    json!({
        "type": "trade",
        "data": [{"s": symbol, "p": price, "v": 100, "t": 1_700_000_000_000_i64}]
    })
    .to_string()
}

#[tokio::test]
async fn test_session_lifecycle_drives_upstream_and_receives_ticks() {
    let (upstream_url, mut mock) = spawn_mock_upstream().await;
    let store = InMemoryWatchlistStore::new().with_watchlist("s1", ["AAPL"]);
    let harness = start_relay(upstream_url, store).await;
    wait_until_connected(&harness.feed_state).await;

    let mut client = connect_downstream(&harness.downstream_url).await;

    // Init loads the saved watchlist
    send_json(&mut client, json!({"type": "init", "sessionId": "s1"})).await;
    let init = next_json(&mut client).await;
    assert_eq!(init["type"], "init-complete");
    assert_eq!(init["symbols"], json!(["AAPL"]));

    let frame = next_upstream(&mut mock).await;
    assert_eq!(frame, json!({"type": "subscribe", "symbol": "AAPL"}));

    // Trades fan out as price updates
    mock.outbound.send(trade_frame("AAPL", 172.50)).unwrap();
    let update = next_json(&mut client).await;
    assert_eq!(update["type"], "price-update");
    assert_eq!(update["data"]["symbol"], "AAPL");
    assert_eq!(update["data"]["price"], 172.5);
    assert_eq!(update["data"]["timestamp"], 1_700_000_000_000_i64);

    // New symbol opens an upstream subscription
    send_json(&mut client, json!({"type": "subscribe", "symbol": "msft"})).await;
    let frame = next_upstream(&mut mock).await;
    assert_eq!(frame, json!({"type": "subscribe", "symbol": "MSFT"}));

    // Disconnect releases every symbol
    client.close(None).await.unwrap();
    let mut released = HashSet::new();
    for _ in 0..2 {
        let frame = next_upstream(&mut mock).await;
        assert_eq!(frame["type"], "unsubscribe");
        released.insert(frame["symbol"].as_str().unwrap().to_string());
    }
    assert_eq!(
        released,
        HashSet::from(["AAPL".to_string(), "MSFT".to_string()])
    );

    assert_eq!(harness.relay.stats().connections, 0);
    harness.cancel.cancel();
}

#[tokio::test]
async fn test_shared_symbol_subscribes_upstream_once() {
    let (upstream_url, mut mock) = spawn_mock_upstream().await;
    let harness = start_relay(upstream_url, InMemoryWatchlistStore::new()).await;
    wait_until_connected(&harness.feed_state).await;

    let mut first = connect_downstream(&harness.downstream_url).await;
    let mut second = connect_downstream(&harness.downstream_url).await;

    send_json(&mut first, json!({"type": "init", "sessionId": "a"})).await;
    assert_eq!(next_json(&mut first).await["symbols"], json!([]));
    send_json(&mut second, json!({"type": "init", "sessionId": "b"})).await;
    assert_eq!(next_json(&mut second).await["symbols"], json!([]));

    send_json(&mut first, json!({"type": "subscribe", "symbol": "TSLA"})).await;
    assert_eq!(
        next_upstream(&mut mock).await,
        json!({"type": "subscribe", "symbol": "TSLA"})
    );
    send_json(&mut second, json!({"type": "subscribe", "symbol": "TSLA"})).await;
    wait_for_subscriptions(&harness.relay, 2).await;

    // Both sessions receive the same tick
    mock.outbound.send(trade_frame("TSLA", 250.0)).unwrap();
    assert_eq!(next_json(&mut first).await["data"]["symbol"], "TSLA");
    assert_eq!(next_json(&mut second).await["data"]["symbol"], "TSLA");

    // Last holder leaving closes the upstream subscription
    send_json(&mut first, json!({"type": "unsubscribe", "symbol": "TSLA"})).await;
    send_json(&mut second, json!({"type": "unsubscribe", "symbol": "TSLA"})).await;
    assert_eq!(
        next_upstream(&mut mock).await,
        json!({"type": "unsubscribe", "symbol": "TSLA"})
    );

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_commands_before_init_are_ignored() {
    let (upstream_url, mut mock) = spawn_mock_upstream().await;
    let harness = start_relay(upstream_url, InMemoryWatchlistStore::new()).await;
    wait_until_connected(&harness.feed_state).await;

    let mut client = connect_downstream(&harness.downstream_url).await;

    send_json(&mut client, json!({"type": "subscribe", "symbol": "NVDA"})).await;
    send_json(&mut client, json!({"type": "bogus"})).await;
    client.send(Message::text("not json")).await.unwrap();

    send_json(&mut client, json!({"type": "init", "sessionId": "late"})).await;
    let init = next_json(&mut client).await;
    assert_eq!(init["type"], "init-complete");
    assert_eq!(init["symbols"], json!([]));

    // A repeated init does not produce a second init-complete
    send_json(&mut client, json!({"type": "init", "sessionId": "late"})).await;
    send_json(&mut client, json!({"type": "subscribe", "symbol": "AMD"})).await;
    assert_eq!(
        next_upstream(&mut mock).await,
        json!({"type": "subscribe", "symbol": "AMD"})
    );

    mock.outbound.send(trade_frame("AMD", 120.0)).unwrap();
    let update = next_json(&mut client).await;
    assert_eq!(update["type"], "price-update");
    assert_eq!(update["data"]["symbol"], "AMD");

    assert!(!harness.relay.demanded_symbols().iter().any(|s| s.as_str() == "NVDA"));
    harness.cancel.cancel();
}
