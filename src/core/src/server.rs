use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::connection::{run_connection, ConnectionParams};
use crate::registry::{ConnectionIdGenerator, ConnectionRegistry};

/// Message broadcast to every live connection by the Shutdown Coordinator
/// (spec.md §4.8). `Notify` announces the grace window; `Force` tells the
/// connection actor to close immediately once the window elapses.
#[derive(Debug, Clone, Copy)]
pub enum ShutdownEvent {
    Notify { grace_period_ms: u64 },
    Force,
}

/// Shared state reachable from the upgrade handler.
#[derive(Clone)]
struct AppState {
    config: Arc<GatewayConfig>,
    registry: Arc<ConnectionRegistry>,
    rate_limiter: Arc<crate::ratelimit::RateLimiter>,
    id_gen: Arc<ConnectionIdGenerator>,
    shutdown_tx: broadcast::Sender<ShutdownEvent>,
    per_ip: Arc<Mutex<HashMap<IpAddr, usize>>>,
    accepting: Arc<AtomicBool>,
}

/// Handle returned to the caller that started the gateway. Drives the
/// Shutdown Coordinator sequence of spec.md §4.8.
pub struct GatewayHandle {
    shutdown_tx: broadcast::Sender<ShutdownEvent>,
    registry: Arc<ConnectionRegistry>,
    accepting: Arc<AtomicBool>,
    stopped: AtomicBool,
    local_addr: SocketAddr,
}

impl GatewayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the full shutdown sequence (spec.md §4.8, steps 1-5). Idempotent:
    /// a second call is a no-op.
    pub async fn stop(&self, grace_period_ms: u64) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        // Step 1: stop accepting new connections.
        self.accepting.store(false, Ordering::SeqCst);

        // Step 2: announce the grace window, if there is anyone to tell.
        if grace_period_ms > 0 && self.registry.count() > 0 {
            let _ = self.shutdown_tx.send(ShutdownEvent::Notify { grace_period_ms });
        }

        // Step 3: await the earlier of "everyone's gone" or the grace window.
        let deadline = tokio::time::sleep(Duration::from_millis(grace_period_ms));
        tokio::pin!(deadline);
        loop {
            if self.registry.count() == 0 {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(25)) => {}
                _ = &mut deadline => break,
            }
        }

        // Step 4: force-close whatever remains; each connection's own
        // teardown path cancels its subscriptions before the socket closes.
        if self.registry.count() > 0 {
            let _ = self.shutdown_tx.send(ShutdownEvent::Force);
            let hard_deadline = tokio::time::sleep(Duration::from_secs(5));
            tokio::pin!(hard_deadline);
            loop {
                if self.registry.count() == 0 {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(25)) => {}
                    _ = &mut hard_deadline => break,
                }
            }
        }

        // Step 5: the rate limiter and registry have no background tasks
        // of their own to stop; the listener is dropped once `serve`'s
        // task completes (triggered by `axum::serve` returning).
    }
}

/// Build the axum router for the gateway's WebSocket endpoint (spec.md §6,
/// "Listener & Upgrader" in §2). Exposes `config.path` for the WS upgrade
/// and `/health` for liveness probes.
fn build_router(
    config: Arc<GatewayConfig>,
    registry: Arc<ConnectionRegistry>,
    rate_limiter: Arc<crate::ratelimit::RateLimiter>,
    shutdown_tx: broadcast::Sender<ShutdownEvent>,
    accepting: Arc<AtomicBool>,
) -> Router {
    let state = AppState {
        config: config.clone(),
        registry,
        rate_limiter,
        id_gen: Arc::new(ConnectionIdGenerator::default()),
        shutdown_tx,
        per_ip: Arc::new(Mutex::new(HashMap::new())),
        accepting,
    };

    Router::new()
        .route(&config.path, get(ws_upgrade))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Validate `Origin` against `config.allowed_origins` (spec.md §6). `None`
/// allows any origin; a missing header is treated as allowed, matching
/// non-browser clients that never send one.
fn origin_allowed(headers: &HeaderMap, allowed: &Option<Vec<String>>) -> bool {
    let Some(allowed) = allowed else { return true };
    match headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok()) {
        Some(origin) => allowed.iter().any(|a| a == origin),
        None => true,
    }
}

async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let remote_addr = remote.ip();

    if !state.accepting.load(Ordering::SeqCst) {
        // spec.md §4.8 step 1: new upgrades during shutdown are refused by
        // closing immediately with the shutdown-specific code.
        return ws
            .on_upgrade(move |socket| async move {
                let _ = close_immediately(socket, 1001, "server_shutting_down").await;
            })
            .into_response();
    }

    if !origin_allowed(&headers, &state.config.allowed_origins) {
        tracing::warn!(%remote_addr, "ws upgrade rejected: origin not allowed");
        return StatusCode::FORBIDDEN.into_response();
    }

    if let Some(max) = state.config.max_connections_per_ip {
        let mut per_ip = state.per_ip.lock().expect("per-ip map poisoned");
        let count = per_ip.entry(remote_addr).or_insert(0);
        if *count >= max {
            tracing::warn!(%remote_addr, max, "ws upgrade rejected: per-ip connection cap reached");
            return StatusCode::TOO_MANY_REQUESTS.into_response();
        }
        *count += 1;
    }

    let config = state.config.clone();
    let registry = state.registry.clone();
    let rate_limiter = state.rate_limiter.clone();
    let id_gen = state.id_gen.clone();
    let shutdown_rx = state.shutdown_tx.subscribe();
    let per_ip = state.per_ip.clone();
    let max_per_ip = state.config.max_connections_per_ip;

    ws.on_upgrade(move |socket| async move {
        let params = ConnectionParams {
            config,
            registry,
            rate_limiter,
            id_gen,
            shutdown_rx,
        };
        run_connection(socket, remote_addr, params).await;
        if max_per_ip.is_some() {
            let mut per_ip = per_ip.lock().expect("per-ip map poisoned");
            if let Some(count) = per_ip.get_mut(&remote_addr) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    per_ip.remove(&remote_addr);
                }
            }
        }
    })
    .into_response()
}

/// Close a just-upgraded socket without ever entering the connection
/// actor's loop — used only for the "server is shutting down" rejection.
async fn close_immediately(
    mut socket: axum::extract::ws::WebSocket,
    code: u16,
    reason: &'static str,
) -> Result<(), axum::Error> {
    use axum::extract::ws::{CloseFrame, Message};
    use futures::SinkExt;
    socket
        .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
        .await
}

/// Bind and serve the gateway (spec.md §6's `port`/`host`/`path` binding;
/// `port` 0 means ephemeral). Returns a [`GatewayHandle`] for graceful
/// shutdown alongside the server's background task.
pub async fn serve(config: GatewayConfig) -> std::io::Result<(GatewayHandle, tokio::task::JoinHandle<()>)> {
    let config = Arc::new(config);
    let registry = Arc::new(ConnectionRegistry::new());
    let rate_limiter = Arc::new(match config.rate_limit {
        Some((max_requests, window)) => crate::ratelimit::RateLimiter::new(max_requests, window),
        None => crate::ratelimit::RateLimiter::disabled(),
    });
    let (shutdown_tx, _rx) = broadcast::channel(16);
    let accepting = Arc::new(AtomicBool::new(true));

    let listener = TcpListener::bind(config.bind).await?;
    let local_addr = listener.local_addr()?;

    let router = build_router(
        config.clone(),
        registry.clone(),
        rate_limiter.clone(),
        shutdown_tx.clone(),
        accepting.clone(),
    );

    let serve_task = tokio::spawn(async move {
        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "gateway server error");
        }
    });

    let handle = GatewayHandle {
        shutdown_tx,
        registry,
        accepting,
        stopped: AtomicBool::new(false),
        local_addr,
    };

    Ok((handle, serve_task))
}
