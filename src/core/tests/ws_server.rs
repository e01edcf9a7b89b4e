use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gateway_core::{AuthConfig, BuiltInUserStore, GatewayConfig, HeartbeatConfig, MemoryRuleEngine, MemoryStore};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite;

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

async fn start_server(config: GatewayConfig) -> (SocketAddr, gateway_core::GatewayHandle) {
    let (handle, _serve_task) = gateway_core::serve(config).await.unwrap();
    (handle.local_addr(), handle)
}

fn base_config(store: Arc<MemoryStore>) -> GatewayConfig {
    let mut config = GatewayConfig::new(store);
    let rules: Arc<dyn gateway_core::RuleEngine> = Arc::new(MemoryRuleEngine::new());
    config.rules = Some(rules);
    config
}

async fn connect_ws(addr: SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/");
    let (stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    stream
}

fn text_msg(v: Value) -> tungstenite::Message {
    tungstenite::Message::Text(v.to_string().into())
}

/// Read the next text frame, replying to pings so the server sees a live
/// client while tests only care about RPC traffic.
async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(tungstenite::Message::Text(t))) => return serde_json::from_str(&t).unwrap(),
            Some(Ok(tungstenite::Message::Ping(data))) => {
                let _ = ws.send(tungstenite::Message::Pong(data)).await;
            }
            Some(Ok(tungstenite::Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("unexpected message: {other:?}"),
            Some(Err(e)) => panic!("ws error: {e}"),
            None => panic!("ws stream ended unexpectedly"),
        }
    }
}

async fn expect_close(ws: &mut WsStream, timeout: Duration) -> Option<Option<u16>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        tokio::select! {
            msg = ws.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        return Some(frame.map(|f| f.code.into()));
                    }
                    None => return Some(None),
                    Some(Err(_)) => return Some(None),
                    Some(Ok(tungstenite::Message::Ping(_))) | Some(Ok(tungstenite::Message::Pong(_))) => continue,
                    Some(Ok(_)) => continue,
                }
            }
            _ = tokio::time::sleep_until(deadline) => return None,
        }
    }
}

#[tokio::test]
async fn health_endpoint() {
    let store = Arc::new(MemoryStore::new());
    let (addr, _handle) = start_server(base_config(store)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let req = format!("GET /health HTTP/1.1\r\nHost: {addr}\r\n\r\n");
    stream.write_all(req.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await.unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.contains("200"));
    assert!(response.contains("ok"));
}

/// End-to-end scenario 1 (spec.md §8): welcome + insert + get.
#[tokio::test]
async fn welcome_insert_and_get() {
    let store = Arc::new(MemoryStore::new());
    let (addr, _handle) = start_server(base_config(store)).await;
    let mut ws = connect_ws(addr).await;

    let welcome = next_json(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["version"], "1.0.0");
    assert_eq!(welcome["requiresAuth"], false);

    ws.send(text_msg(json!({"id": 1, "type": "store.insert", "bucket": "users", "data": {"name": "Alice"}})))
        .await
        .unwrap();
    let resp = next_json(&mut ws).await;
    assert_eq!(resp["id"], 1);
    assert_eq!(resp["type"], "result");
    assert_eq!(resp["data"]["name"], "Alice");
    assert_eq!(resp["data"]["_version"], 1);
    let key = resp["data"]["id"].as_str().unwrap().to_string();

    ws.send(text_msg(json!({"id": 2, "type": "store.get", "bucket": "users", "key": key})))
        .await
        .unwrap();
    let resp = next_json(&mut ws).await;
    assert_eq!(resp["id"], 2);
    assert_eq!(resp["data"]["name"], "Alice");
}

/// End-to-end scenario 2 (spec.md §8): subscribe, then a push on insert.
#[tokio::test]
async fn subscribe_then_push_on_insert() {
    let store = Arc::new(MemoryStore::new());
    store.define_query("all-users", |s, _params| Value::Array(s.snapshot("users")));
    let (addr, _handle) = start_server(base_config(store)).await;
    let mut ws = connect_ws(addr).await;

    let _welcome = next_json(&mut ws).await;

    ws.send(text_msg(json!({"id": 1, "type": "store.subscribe", "query": "all-users"})))
        .await
        .unwrap();
    let resp = next_json(&mut ws).await;
    assert_eq!(resp["id"], 1);
    assert_eq!(resp["data"]["data"], json!([]));
    let sub_id = resp["data"]["subscriptionId"].as_str().unwrap().to_string();

    ws.send(text_msg(json!({"id": 2, "type": "store.insert", "bucket": "users", "data": {"name": "Alice"}})))
        .await
        .unwrap();
    let insert_resp = next_json(&mut ws).await;
    assert_eq!(insert_resp["id"], 2);

    let push = next_json(&mut ws).await;
    assert_eq!(push["type"], "push");
    assert_eq!(push["channel"], "subscription");
    assert_eq!(push["subscriptionId"], sub_id);
    assert_eq!(push["data"].as_array().unwrap().len(), 1);
    assert_eq!(push["data"][0]["name"], "Alice");
}

/// Unsubscribe is idempotent from the client's perspective: first call
/// confirms, the second is `NOT_FOUND` (spec.md §8 round-trip laws).
#[tokio::test]
async fn double_unsubscribe_returns_not_found() {
    let store = Arc::new(MemoryStore::new());
    store.define_query("all-users", |s, _p| Value::Array(s.snapshot("users")));
    let (addr, _handle) = start_server(base_config(store)).await;
    let mut ws = connect_ws(addr).await;
    let _welcome = next_json(&mut ws).await;

    ws.send(text_msg(json!({"id": 1, "type": "store.subscribe", "query": "all-users"})))
        .await
        .unwrap();
    let resp = next_json(&mut ws).await;
    let sub_id = resp["data"]["subscriptionId"].as_str().unwrap().to_string();

    ws.send(text_msg(json!({"id": 2, "type": "store.unsubscribe", "subscriptionId": sub_id})))
        .await
        .unwrap();
    let resp = next_json(&mut ws).await;
    assert_eq!(resp["data"]["unsubscribed"], true);

    ws.send(text_msg(json!({"id": 3, "type": "store.unsubscribe", "subscriptionId": sub_id})))
        .await
        .unwrap();
    let resp = next_json(&mut ws).await;
    assert_eq!(resp["type"], "error");
    assert_eq!(resp["code"], "NOT_FOUND");
}

/// End-to-end scenario 4 (spec.md §8): rate limit with a key switch on login.
#[tokio::test]
async fn rate_limit_switches_key_on_login() {
    let store = Arc::new(MemoryStore::new());
    let mut config = base_config(store);
    config.rate_limit = Some((3, Duration::from_secs(60)));
    config.auth.built_in = Some(Arc::new(BuiltInUserStore::new(None)));
    config.auth.built_in.as_ref().unwrap().register(
        "alice",
        BuiltInUserStore::hash_password("s3cret").unwrap(),
        vec!["user".into()],
    );
    let (addr, _handle) = start_server(config).await;
    let mut ws = connect_ws(addr).await;
    let _welcome = next_json(&mut ws).await;

    // Consumes 1 from the IP bucket.
    ws.send(text_msg(json!({
        "id": 1, "type": "auth.login", "username": "alice", "password": "s3cret"
    })))
    .await
    .unwrap();
    let resp = next_json(&mut ws).await;
    assert_eq!(resp["type"], "result");

    // Three subsequent authenticated requests succeed from a fresh bucket.
    for i in 0..3 {
        ws.send(text_msg(json!({"id": 2 + i, "type": "auth.whoami"}))).await.unwrap();
        let resp = next_json(&mut ws).await;
        assert_eq!(resp["type"], "result", "request {i} should succeed");
    }

    // The fourth is rate limited.
    ws.send(text_msg(json!({"id": 10, "type": "auth.whoami"}))).await.unwrap();
    let resp = next_json(&mut ws).await;
    assert_eq!(resp["type"], "error");
    assert_eq!(resp["code"], "RATE_LIMITED");
    let retry_after = resp["details"]["retryAfterMs"].as_u64().unwrap();
    assert!(retry_after > 0 && retry_after <= 60_000);
}

/// spec.md §4.5: a missed pong closes the connection with 4001.
#[tokio::test]
async fn heartbeat_timeout_closes_connection() {
    let store = Arc::new(MemoryStore::new());
    let mut config = base_config(store);
    config.heartbeat = HeartbeatConfig {
        interval: Duration::from_millis(80),
        timeout_ms: None,
    };
    let (addr, _handle) = start_server(config).await;
    let mut ws = connect_ws(addr).await;
    let _welcome = next_json(&mut ws).await;

    // Don't reply to pings: the server should see the connection as dead
    // after one missed tick and close with 4001.
    let closed = expect_close(&mut ws, Duration::from_secs(2)).await;
    assert_eq!(closed, Some(Some(4001)));
}

/// spec.md §8 scenario 6: graceful shutdown notifies clients, lets an
/// in-flight request finish, then force-closes within the grace window.
#[tokio::test]
async fn graceful_shutdown_notifies_then_closes() {
    let store = Arc::new(MemoryStore::new());
    store.define_query("all-users", |s, _p| Value::Array(s.snapshot("users")));
    let (addr, handle) = start_server(base_config(store)).await;
    let mut ws = connect_ws(addr).await;
    let _welcome = next_json(&mut ws).await;

    ws.send(text_msg(json!({"id": 1, "type": "store.subscribe", "query": "all-users"})))
        .await
        .unwrap();
    let _ = next_json(&mut ws).await;

    let stop = tokio::spawn(async move {
        handle.stop(2_000).await;
    });

    let notice = next_json(&mut ws).await;
    assert_eq!(notice["type"], "system");
    assert_eq!(notice["event"], "shutdown");
    assert_eq!(notice["gracePeriodMs"], 2000);

    ws.send(text_msg(json!({"id": 2, "type": "store.insert", "bucket": "users", "data": {"name": "Bob"}})))
        .await
        .unwrap();
    let resp = next_json(&mut ws).await;
    assert_eq!(resp["id"], 2);
    assert_eq!(resp["type"], "result");

    let start = tokio::time::Instant::now();
    stop.await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(2000));
}

/// An unauthenticated, unknown operation still survives as a single error
/// response rather than closing the socket (spec.md §7).
#[tokio::test]
async fn unknown_operation_does_not_close_connection() {
    let store = Arc::new(MemoryStore::new());
    let (addr, _handle) = start_server(base_config(store)).await;
    let mut ws = connect_ws(addr).await;
    let _welcome = next_json(&mut ws).await;

    ws.send(text_msg(json!({"id": 1, "type": "bogus.op"}))).await.unwrap();
    let resp = next_json(&mut ws).await;
    assert_eq!(resp["code"], "UNKNOWN_OPERATION");

    ws.send(text_msg(json!({"id": 2, "type": "store.all", "bucket": "users"})))
        .await
        .unwrap();
    let resp = next_json(&mut ws).await;
    assert_eq!(resp["type"], "result");
}
