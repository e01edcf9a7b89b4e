use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use gateway_protocol::{PushChannel, PushFrame};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backpressure::BackpressureGate;
use crate::error::{GatewayError, GatewayResult};
use crate::outbound::OutboundMessage;
use crate::rules::RuleEngine;
use crate::store::Store;

#[derive(Debug, Clone)]
pub enum SubscribeTarget {
    Query { name: String, params: Value },
    Event { pattern: String },
}

struct Handle {
    kind: Kind,
    forwarder: JoinHandle<()>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Query,
    Event,
}

/// Per-connection subscription bookkeeping (spec §4.3). One instance is
/// owned by each connection actor; the process-wide sharing the spec
/// describes ("sharded only by connection for locality") comes from each
/// connection holding its own manager over shared `Store`/`RuleEngine`
/// handles rather than a single global map.
pub struct SubscriptionManager {
    store: Arc<dyn Store>,
    rules: Option<Arc<dyn RuleEngine>>,
    max_per_connection: usize,
    backpressure: BackpressureGate,
    pending_push_bytes: Arc<AtomicUsize>,
    subs: HashMap<Uuid, Handle>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn Store>, rules: Option<Arc<dyn RuleEngine>>, max_per_connection: usize) -> Self {
        Self::with_backpressure(store, rules, max_per_connection, BackpressureGate::unbounded())
    }

    /// `backpressure` gates only the pushes this manager's forwarders emit
    /// (spec §4.6) — request/response writes never pass through here.
    pub fn with_backpressure(
        store: Arc<dyn Store>,
        rules: Option<Arc<dyn RuleEngine>>,
        max_per_connection: usize,
        backpressure: BackpressureGate,
    ) -> Self {
        Self {
            store,
            rules,
            max_per_connection,
            backpressure,
            pending_push_bytes: Arc::new(AtomicUsize::new(0)),
            subs: HashMap::new(),
        }
    }

    /// Shared counter the connection's writer task decrements once a push
    /// it tracked has actually been written to the socket.
    pub fn pending_push_bytes(&self) -> Arc<AtomicUsize> {
        self.pending_push_bytes.clone()
    }

    pub fn store_subscription_count(&self) -> usize {
        self.subs.values().filter(|h| h.kind == Kind::Query).count()
    }

    pub fn rules_subscription_count(&self) -> usize {
        self.subs.values().filter(|h| h.kind == Kind::Event).count()
    }

    pub fn total_count(&self) -> usize {
        self.subs.len()
    }

    /// Register a subscription atomically: the source registration and
    /// this manager's bookkeeping both complete before the initial value
    /// is handed back to the caller.
    pub async fn subscribe(
        &mut self,
        target: SubscribeTarget,
        outbound: mpsc::Sender<OutboundMessage>,
    ) -> GatewayResult<(Uuid, Value)> {
        if self.subs.len() >= self.max_per_connection {
            return Err(GatewayError::SubscriptionLimitExceeded);
        }

        match target {
            SubscribeTarget::Query { name, params } => {
                let (raw_tx, raw_rx) = mpsc::channel(64);
                let (id, initial) = self.store.subscribe_query(&name, params, raw_tx).await?;
                let forwarder = spawn_query_forwarder(
                    raw_rx,
                    outbound,
                    id,
                    initial.clone(),
                    self.backpressure,
                    self.pending_push_bytes.clone(),
                );
                self.subs.insert(id, Handle { kind: Kind::Query, forwarder });
                Ok((id, initial))
            }
            SubscribeTarget::Event { pattern } => {
                let rules = self.rules.as_ref().ok_or(GatewayError::RulesNotAvailable)?;
                let (raw_tx, raw_rx) = mpsc::channel(64);
                let id = rules.subscribe(&pattern, raw_tx).await?;
                let forwarder = spawn_event_forwarder(
                    raw_rx,
                    outbound,
                    id,
                    self.backpressure,
                    self.pending_push_bytes.clone(),
                );
                self.subs.insert(id, Handle { kind: Kind::Event, forwarder });
                Ok((id, Value::Null))
            }
        }
    }

    /// Idempotent at the connection level: double-unsubscribe returns
    /// `NotFound` (mapped to the `NOT_FOUND` wire code by the router).
    pub fn unsubscribe(&mut self, id: Uuid) -> GatewayResult<()> {
        let Some(handle) = self.subs.remove(&id) else {
            return Err(GatewayError::NotFound);
        };
        handle.forwarder.abort();
        match handle.kind {
            Kind::Query => self.store.cancel_query_subscription(id),
            Kind::Event => {
                if let Some(rules) = &self.rules {
                    rules.cancel_subscription(id);
                }
            }
        }
        Ok(())
    }

    /// Cancel every owned subscription exactly once (spec §4.3's cleanup
    /// guarantee). Called on connection teardown.
    pub fn cancel_all(&mut self) {
        for (id, handle) in self.subs.drain() {
            handle.forwarder.abort();
            match handle.kind {
                Kind::Query => self.store.cancel_query_subscription(id),
                Kind::Event => {
                    if let Some(rules) = &self.rules {
                        rules.cancel_subscription(id);
                    }
                }
            }
        }
    }
}

/// Deep structural equality for query-push dedupe (spec §9): arrays are
/// ordered, objects are unordered, numbers compare by value, strings by
/// code units, and `null` is distinct from an absent field. `Value::Object`
/// and `Value::Array` get this shape from `serde_json`'s derived
/// `PartialEq` (a `Map` compared key-by-key regardless of insertion order,
/// elements compared in order), so those recurse into this function rather
/// than reserializing. Numbers are the one case `serde_json::Number`'s own
/// `PartialEq` gets wrong for spec purposes — it is representation-
/// sensitive, so `json!(6) != json!(6.0)` even though both are the value
/// 6 — so numbers are compared as `f64` here instead.
fn deep_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(xi, yi)| deep_eq(xi, yi))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).is_some_and(|yv| deep_eq(v, yv)))
        }
        _ => a == b,
    }
}

fn spawn_query_forwarder(
    mut raw_rx: mpsc::Receiver<Value>,
    outbound: mpsc::Sender<OutboundMessage>,
    id: Uuid,
    initial: Value,
    backpressure: BackpressureGate,
    pending_push_bytes: Arc<AtomicUsize>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = initial;
        while let Some(new_value) = raw_rx.recv().await {
            if deep_eq(&last, &new_value) {
                continue;
            }
            last = new_value.clone();
            let push = PushFrame::new(PushChannel::Subscription, id.to_string(), new_value);
            if send_push(&outbound, push, &backpressure, &pending_push_bytes).await.is_err() {
                break;
            }
        }
    })
}

fn spawn_event_forwarder(
    mut raw_rx: mpsc::Receiver<Value>,
    outbound: mpsc::Sender<OutboundMessage>,
    id: Uuid,
    backpressure: BackpressureGate,
    pending_push_bytes: Arc<AtomicUsize>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(data) = raw_rx.recv().await {
            let push = PushFrame::new(PushChannel::Event, id.to_string(), data);
            if send_push(&outbound, push, &backpressure, &pending_push_bytes).await.is_err() {
                break;
            }
        }
    })
}

/// Gate a push against the backpressure threshold before it ever reaches
/// the outbound channel (spec §4.6): at or above the high-water mark the
/// push is dropped silently, never surfaced as an error. Below it, the
/// push's serialized size is added to the shared pending counter; the
/// connection's writer task subtracts it back out once actually written.
async fn send_push(
    outbound: &mpsc::Sender<OutboundMessage>,
    push: PushFrame,
    backpressure: &BackpressureGate,
    pending_push_bytes: &Arc<AtomicUsize>,
) -> Result<(), ()> {
    let pending = pending_push_bytes.load(Ordering::Relaxed);
    if backpressure.should_drop(pending) {
        return Ok(());
    }
    let size = push.to_json().to_string().len();
    pending_push_bytes.fetch_add(size, Ordering::Relaxed);
    outbound
        .send(OutboundMessage::Push(push))
        .await
        .map_err(|_| ())
}
