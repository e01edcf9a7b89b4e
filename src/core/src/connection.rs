use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use gateway_protocol::{error_codes, parse_frame, ParseOutcome, ParsedRequest, ResponseFrame, SystemFrame, PROTOCOL_VERSION};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::audit::{AuditKind, AuditRecord};
use crate::auth::AuthService;
use crate::authz::extract_resource;
use crate::backpressure::BackpressureGate;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::heartbeat::{Heartbeat, TickOutcome};
use crate::outbound::OutboundMessage;
use crate::ratelimit::{Consume, RateLimiter};
use crate::registry::{ConnectionIdGenerator, ConnectionRegistry, RegistryEntry};
use crate::router::{self, Namespace, SubscribeTarget, SubscriptionManager};
use crate::server::ShutdownEvent;
use crate::session::Session;

/// The process-wide collaborators a connection actor borrows for its
/// lifetime. One instance is built (mostly `Arc` clones) per accepted
/// connection.
pub struct ConnectionParams {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub id_gen: Arc<ConnectionIdGenerator>,
    pub shutdown_rx: broadcast::Receiver<ShutdownEvent>,
}

/// Run one connection's full lifecycle (spec.md §4.2): register, welcome,
/// the request pipeline, heartbeat, and teardown. Returns once the socket
/// closes for any reason.
pub async fn run_connection(socket: WebSocket, remote_addr: IpAddr, params: ConnectionParams) {
    let ConnectionParams {
        config,
        registry,
        rate_limiter,
        id_gen,
        mut shutdown_rx,
    } = params;

    let id = id_gen.next();
    let span = tracing::info_span!("conn", id);
    let _enter = span.enter();

    let (sink, mut stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(256);

    let backpressure = BackpressureGate::new(
        config.backpressure.max_buffered_bytes,
        config.backpressure.high_water_mark,
    );
    let mut subscriptions = SubscriptionManager::with_backpressure(
        config.store.clone(),
        config.rules.clone(),
        config.max_subscriptions_per_connection,
        backpressure,
    );
    let pending_push_bytes = subscriptions.pending_push_bytes();

    registry.insert(RegistryEntry {
        id,
        address: remote_addr,
        connected_at: chrono::Utc::now(),
        authenticated: false,
        user_id: None,
        store_subscriptions: 0,
        rules_subscriptions: 0,
    });

    let writer = tokio::spawn(run_writer(
        sink,
        outbound_rx,
        config.expose_error_details,
        pending_push_bytes,
    ));

    let welcome = SystemFrame::Welcome {
        version: PROTOCOL_VERSION,
        server_time: chrono::Utc::now().timestamp_millis(),
        requires_auth: config.requires_auth(),
    };
    if outbound_tx.send(OutboundMessage::System(welcome)).await.is_err() {
        registry.remove(id);
        let _ = writer.await;
        return;
    }

    let auth_service = AuthService::new(
        config.auth.validator.clone(),
        config.auth.built_in.clone(),
        config.auth.session_ttl,
    );

    let mut heartbeat = Heartbeat::new();
    let mut ticker = tokio::time::interval(config.heartbeat.interval);
    ticker.tick().await; // the first tick fires immediately; consume it

    let mut session: Option<Session> = None;
    let mut rate_limit_key = remote_addr.to_string();
    let mut close_reason = (1000u16, "normal_closure");

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > config.max_payload_bytes {
                            close_reason = (1009, "payload_too_large");
                            break;
                        }
                        let mut st = PipelineState {
                            config: &config,
                            auth_service: &auth_service,
                            rate_limiter: &rate_limiter,
                            registry: &registry,
                            conn_id: id,
                            session: &mut session,
                            rate_limit_key: &mut rate_limit_key,
                            heartbeat: &mut heartbeat,
                            subscriptions: &mut subscriptions,
                            outbound: &outbound_tx,
                        };
                        handle_frame(&text, &mut st).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            _ = ticker.tick() => {
                match heartbeat.on_tick(tokio::time::Instant::now()) {
                    TickOutcome::SendPing => {
                        let ping = SystemFrame::Ping { timestamp: chrono::Utc::now().timestamp_millis() };
                        if outbound_tx.send(OutboundMessage::System(ping)).await.is_err() {
                            break;
                        }
                    }
                    TickOutcome::TimedOut => {
                        close_reason = (4001, "heartbeat_timeout");
                        break;
                    }
                }
            }
            signal = shutdown_rx.recv() => {
                match signal {
                    Ok(ShutdownEvent::Notify { grace_period_ms }) => {
                        let frame = SystemFrame::Shutdown { grace_period_ms };
                        let _ = outbound_tx.send(OutboundMessage::System(frame)).await;
                    }
                    Ok(ShutdownEvent::Force) => {
                        close_reason = (1000, "server_shutdown");
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {}
                }
            }
        }
    }

    // Teardown (spec.md §4.2): cancel every owned subscription, clear the
    // registry entry and rate-limit bucket, then close with the
    // reason-specific code. Timers stop implicitly as this scope ends.
    subscriptions.cancel_all();
    registry.remove(id);
    rate_limiter.clear(&rate_limit_key);

    let (code, reason) = close_reason;
    let _ = outbound_tx.send(OutboundMessage::Close { code, reason }).await;
    drop(outbound_tx);
    let _ = writer.await;
}

/// Mutable, per-request pipeline context (spec.md §4.2 steps 3-7). Built
/// fresh for each inbound frame since `session`/`rate_limit_key` can
/// change mid-connection (login, logout, expiry).
struct PipelineState<'a> {
    config: &'a GatewayConfig,
    auth_service: &'a AuthService,
    rate_limiter: &'a RateLimiter,
    registry: &'a ConnectionRegistry,
    conn_id: u64,
    session: &'a mut Option<Session>,
    rate_limit_key: &'a mut String,
    heartbeat: &'a mut Heartbeat,
    subscriptions: &'a mut SubscriptionManager,
    outbound: &'a mpsc::Sender<OutboundMessage>,
}

async fn handle_frame(text: &str, st: &mut PipelineState<'_>) {
    match parse_frame(text) {
        ParseOutcome::Pong { .. } => {
            st.heartbeat.record_pong(tokio::time::Instant::now());
        }
        ParseOutcome::Error { id, code, message } => {
            let _ = st
                .outbound
                .send(OutboundMessage::Response(ResponseFrame::error(id, code, message)))
                .await;
        }
        ParseOutcome::Request(req) => {
            let response = dispatch_request(req, st).await;
            let _ = st.outbound.send(OutboundMessage::Response(response)).await;
        }
    }
}

async fn dispatch_request(req: ParsedRequest, st: &mut PipelineState<'_>) -> ResponseFrame {
    let operation = req.kind.as_str();

    // Step 3: auth gate. An elapsed session is cleared before evaluation
    // so the rest of the pipeline sees it exactly as if it never existed.
    if let Some(session) = st.session.as_ref() {
        if session.is_expired(chrono::Utc::now()) {
            *st.session = None;
            st.registry.set_authenticated(st.conn_id, None);
        }
    }
    if st.config.requires_auth() && !operation.starts_with("auth.") && st.session.is_none() {
        return ResponseFrame::error(req.id, error_codes::UNAUTHORIZED, "authentication required");
    }

    // Step 4: rate limit.
    match st.rate_limiter.consume(st.rate_limit_key) {
        Consume::Allow => {}
        Consume::Deny { retry_after_ms } => {
            return ResponseFrame::error_with_details(
                req.id,
                error_codes::RATE_LIMITED,
                "rate limit exceeded",
                serde_json::json!({ "retryAfterMs": retry_after_ms }),
            );
        }
    }

    // Step 5: permission. An unauthenticated connection is evaluated as
    // an anonymous, role-less session so declarative rules and the
    // configured default still apply whether or not auth is required.
    let anonymous = Session::new(String::new(), Vec::new());
    let effective = st.session.as_ref().unwrap_or(&anonymous);
    let resource = extract_resource(operation, &req.payload);
    if !st.config.auth.permissions.check(effective, operation, &resource) {
        st.config.audit.record(AuditRecord {
            at: chrono::Utc::now(),
            kind: AuditKind::PermissionDenied,
            user_id: st.session.as_ref().map(|s| s.user_id.clone()),
            operation: Some(operation.to_string()),
            detail: None,
        });
        return ResponseFrame::error(req.id, error_codes::FORBIDDEN, "forbidden");
    }

    // Steps 6-7: route by operation prefix, dispatch, translate the
    // outcome into a response.
    let outcome = match router::classify(operation) {
        Some(Namespace::Store) => dispatch_store_op(operation, &req.payload, st).await,
        Some(Namespace::Rules) => dispatch_rules_op(operation, &req.payload, st).await,
        Some(Namespace::Auth) => dispatch_auth_op(operation, &req.payload, st).await,
        Some(Namespace::Server) => dispatch_server_op(operation, st).await,
        Some(Namespace::Procedures) => {
            router::dispatch_procedures(operation, &req.payload, st.config.procedures.as_deref()).await
        }
        Some(Namespace::Audit) => router::dispatch_audit(operation, st.config.audit.as_ref()).await,
        None => Err(GatewayError::UnknownOperation(operation.to_string())),
    };

    match outcome {
        Ok(data) => ResponseFrame::result(req.id, data),
        Err(err) => match err.details() {
            Some(details) => ResponseFrame::error_with_details(req.id, err.code(), err.message(), details),
            None => ResponseFrame::error(req.id, err.code(), err.message()),
        },
    }
}

async fn dispatch_store_op(
    operation: &str,
    payload: &Map<String, Value>,
    st: &mut PipelineState<'_>,
) -> Result<Value, GatewayError> {
    match operation {
        "store.subscribe" => {
            let query = payload
                .get("query")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| GatewayError::Validation("\"query\" is required".into()))?;
            let params = payload.get("params").cloned().unwrap_or(Value::Null);
            let (sub_id, initial) = st
                .subscriptions
                .subscribe(
                    SubscribeTarget::Query { name: query.to_string(), params },
                    st.outbound.clone(),
                )
                .await?;
            sync_subscription_counts(st);
            Ok(serde_json::json!({ "subscriptionId": sub_id.to_string(), "data": initial }))
        }
        "store.unsubscribe" => unsubscribe(payload, st),
        other => router::dispatch_store(other, payload, st.config.store.as_ref()).await,
    }
}

async fn dispatch_rules_op(
    operation: &str,
    payload: &Map<String, Value>,
    st: &mut PipelineState<'_>,
) -> Result<Value, GatewayError> {
    match operation {
        "rules.subscribe" => {
            let pattern = payload
                .get("pattern")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| GatewayError::Validation("\"pattern\" is required".into()))?;
            let (sub_id, _) = st
                .subscriptions
                .subscribe(SubscribeTarget::Event { pattern: pattern.to_string() }, st.outbound.clone())
                .await?;
            sync_subscription_counts(st);
            Ok(serde_json::json!({ "subscriptionId": sub_id.to_string() }))
        }
        "rules.unsubscribe" => unsubscribe(payload, st),
        other => {
            let rules = st.config.rules.as_deref().ok_or(GatewayError::RulesNotAvailable)?;
            router::dispatch_rules(other, payload, rules).await
        }
    }
}

/// Shared by `store.unsubscribe` and `rules.unsubscribe` — subscription
/// ids are flat across kinds (spec.md §3), so either namespace's
/// unsubscribe resolves against the same id space.
fn unsubscribe(payload: &Map<String, Value>, st: &mut PipelineState<'_>) -> Result<Value, GatewayError> {
    let sub_id = payload
        .get("subscriptionId")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::Validation("\"subscriptionId\" is required".into()))?;
    let uuid = Uuid::parse_str(sub_id).map_err(|_| GatewayError::NotFound)?;
    st.subscriptions.unsubscribe(uuid)?;
    sync_subscription_counts(st);
    Ok(serde_json::json!({ "unsubscribed": true }))
}

fn sync_subscription_counts(st: &mut PipelineState<'_>) {
    st.registry.set_subscription_counts(
        st.conn_id,
        st.subscriptions.store_subscription_count(),
        st.subscriptions.rules_subscription_count(),
    );
}

async fn dispatch_auth_op(
    operation: &str,
    payload: &Map<String, Value>,
    st: &mut PipelineState<'_>,
) -> Result<Value, GatewayError> {
    match operation {
        "auth.login" => match router::auth_login(payload, st.auth_service).await {
            Ok(session) => {
                st.config.audit.record(AuditRecord {
                    at: chrono::Utc::now(),
                    kind: AuditKind::Login,
                    user_id: Some(session.user_id.clone()),
                    operation: None,
                    detail: None,
                });
                *st.rate_limit_key = session.user_id.clone();
                st.registry.set_authenticated(st.conn_id, Some(session.user_id.clone()));
                let response = router::session_to_json(&session);
                *st.session = Some(session);
                Ok(response)
            }
            Err(err) => {
                st.config.audit.record(AuditRecord {
                    at: chrono::Utc::now(),
                    kind: AuditKind::LoginFailed,
                    user_id: None,
                    operation: None,
                    detail: None,
                });
                Err(err)
            }
        },
        "auth.logout" => {
            if let Some(session) = st.session.take() {
                st.config.audit.record(AuditRecord {
                    at: chrono::Utc::now(),
                    kind: AuditKind::Logout,
                    user_id: Some(session.user_id),
                    operation: None,
                    detail: None,
                });
            }
            st.registry.set_authenticated(st.conn_id, None);
            Ok(serde_json::json!({ "loggedOut": true }))
        }
        "auth.whoami" => Ok(st.session.as_ref().map(router::session_to_json).unwrap_or(Value::Null)),
        other => Err(GatewayError::UnknownOperation(other.to_string())),
    }
}

async fn dispatch_server_op(operation: &str, st: &mut PipelineState<'_>) -> Result<Value, GatewayError> {
    match operation {
        "server.stats" => router::server_stats(st.registry, st.config.store.as_ref(), st.config.rules.as_deref()).await,
        "server.connections" => router::server_connections(st.registry),
        other => Err(GatewayError::UnknownOperation(other.to_string())),
    }
}

/// The connection's single writer task: every outbound frame — responses,
/// pushes, system frames, and the final close — funnels through here so
/// concurrent producers never race on the socket (spec.md §9).
async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<OutboundMessage>,
    expose_error_details: bool,
    pending_push_bytes: Arc<AtomicUsize>,
) {
    while let Some(msg) = outbound_rx.recv().await {
        match msg {
            OutboundMessage::Response(resp) => {
                let text = resp.to_json(expose_error_details).to_string();
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            OutboundMessage::Push(push) => {
                let json = push.to_json().to_string();
                let _ = pending_push_bytes.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                    Some(v.saturating_sub(json.len()))
                });
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            OutboundMessage::System(frame) => {
                let text = frame.to_json().to_string();
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            OutboundMessage::Close { code, reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
                    .await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}
