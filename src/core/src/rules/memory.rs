use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{segments_match, RuleEngine};
use crate::error::{GatewayError, GatewayResult};

struct EventSubscription {
    pattern: String,
    sink: mpsc::Sender<Value>,
}

/// In-memory reference implementation of [`RuleEngine`] — the gateway
/// binary's default standalone backend and the test suite's double, not
/// the product described by spec §1's Non-goals.
#[derive(Default)]
pub struct MemoryRuleEngine {
    facts: DashMap<String, Value>,
    subscriptions: DashMap<Uuid, EventSubscription>,
}

impl MemoryRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RuleEngine for MemoryRuleEngine {
    async fn emit(
        &self,
        topic: &str,
        data: Value,
        correlation_id: Option<String>,
        causation_id: Option<String>,
    ) -> GatewayResult<Value> {
        if topic.is_empty() {
            return Err(GatewayError::Validation("topic is required".into()));
        }
        let mut event = json!({
            "id": Uuid::new_v4().to_string(),
            "topic": topic,
            "data": data,
            "timestamp": Utc::now().timestamp_millis(),
        });
        if let Some(cid) = correlation_id {
            event["correlationId"] = json!(cid);
        }
        if let Some(cid) = causation_id {
            event["causationId"] = json!(cid);
        }

        let targets: Vec<mpsc::Sender<Value>> = self
            .subscriptions
            .iter()
            .filter(|e| segments_match(&e.value().pattern, topic, '.'))
            .map(|e| e.value().sink.clone())
            .collect();

        let push = json!({ "topic": topic, "event": event.clone() });
        for sink in targets {
            let _ = sink.send(push.clone()).await;
        }

        Ok(event)
    }

    async fn set_fact(&self, key: &str, value: Value) -> GatewayResult<Value> {
        if key.is_empty() {
            return Err(GatewayError::Validation("key is required".into()));
        }
        self.facts.insert(key.to_string(), value.clone());
        Ok(value)
    }

    async fn get_fact(&self, key: &str) -> GatewayResult<Value> {
        Ok(self.facts.get(key).map(|v| v.clone()).unwrap_or(Value::Null))
    }

    async fn delete_fact(&self, key: &str) -> GatewayResult<Value> {
        let existed = self.facts.remove(key).is_some();
        Ok(json!({ "deleted": existed }))
    }

    async fn query_facts(&self, pattern: &str) -> GatewayResult<Value> {
        let matched: serde_json::Map<String, Value> = self
            .facts
            .iter()
            .filter(|e| segments_match(pattern, e.key(), ':'))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        Ok(Value::Object(matched))
    }

    async fn get_all_facts(&self) -> GatewayResult<Value> {
        let all: serde_json::Map<String, Value> = self
            .facts
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        Ok(Value::Object(all))
    }

    async fn stats(&self) -> GatewayResult<Value> {
        Ok(json!({
            "facts": self.facts.len(),
            "subscriptions": self.subscriptions.len(),
        }))
    }

    async fn subscribe(&self, pattern: &str, sink: mpsc::Sender<Value>) -> GatewayResult<Uuid> {
        let id = Uuid::new_v4();
        self.subscriptions.insert(id, EventSubscription { pattern: pattern.to_string(), sink });
        Ok(id)
    }

    fn cancel_subscription(&self, id: Uuid) {
        self.subscriptions.remove(&id);
    }

    fn healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_without_subscribers_still_returns_event() {
        let engine = MemoryRuleEngine::new();
        let event = engine.emit("orders.created", json!({"id": 1}), None, None).await.unwrap();
        assert_eq!(event["topic"], "orders.created");
    }

    #[tokio::test]
    async fn subscribe_receives_matching_emits_only() {
        let engine = MemoryRuleEngine::new();
        let (tx, mut rx) = mpsc::channel(8);
        engine.subscribe("orders.*", tx).await.unwrap();

        engine.emit("orders.created", json!({"id": 1}), None, None).await.unwrap();
        engine.emit("users.created", json!({"id": 2}), None, None).await.unwrap();

        let push = rx.recv().await.unwrap();
        assert_eq!(push["topic"], "orders.created");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn facts_round_trip_and_delete_is_idempotent() {
        let engine = MemoryRuleEngine::new();
        engine.set_fact("session:1", json!({"active": true})).await.unwrap();
        assert_eq!(engine.get_fact("session:1").await.unwrap()["active"], true);

        let first = engine.delete_fact("session:1").await.unwrap();
        assert_eq!(first, json!({"deleted": true}));
        let second = engine.delete_fact("session:1").await.unwrap();
        assert_eq!(second, json!({"deleted": false}));
    }

    #[tokio::test]
    async fn query_facts_matches_colon_pattern() {
        let engine = MemoryRuleEngine::new();
        engine.set_fact("user:1:profile", json!("a")).await.unwrap();
        engine.set_fact("user:2:profile", json!("b")).await.unwrap();
        engine.set_fact("user:1:settings", json!("c")).await.unwrap();

        let matched = engine.query_facts("user:*:profile").await.unwrap();
        assert_eq!(matched.as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancel_subscription_stops_delivery() {
        let engine = MemoryRuleEngine::new();
        let (tx, mut rx) = mpsc::channel(8);
        let id = engine.subscribe("*", tx).await.unwrap();
        engine.cancel_subscription(id);
        engine.emit("anything", Value::Null, None, None).await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
