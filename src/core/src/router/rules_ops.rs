use serde_json::{Map, Value};

use crate::error::{GatewayError, GatewayResult};
use crate::rules::RuleEngine;

fn require_str<'a>(payload: &'a Map<String, Value>, field: &str) -> GatewayResult<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::Validation(format!("\"{field}\" is required")))
}

/// Dispatch every non-subscription `rules.*` operation (spec.md §6).
/// `rules.subscribe`/`rules.unsubscribe` go through the connection's
/// `SubscriptionManager` instead, same as the store side.
pub async fn dispatch(
    operation: &str,
    payload: &Map<String, Value>,
    rules: &dyn RuleEngine,
) -> GatewayResult<Value> {
    match operation {
        "rules.emit" => {
            let topic = require_str(payload, "topic")?;
            let data = payload.get("data").cloned().unwrap_or(Value::Null);
            let correlation_id = payload
                .get("correlationId")
                .and_then(Value::as_str)
                .map(str::to_string);
            let causation_id = payload
                .get("causationId")
                .and_then(Value::as_str)
                .map(str::to_string);
            rules.emit(topic, data, correlation_id, causation_id).await
        }
        "rules.setFact" => {
            let key = require_str(payload, "key")?;
            let value = payload
                .get("value")
                .cloned()
                .ok_or_else(|| GatewayError::Validation("\"value\" is required".into()))?;
            rules.set_fact(key, value).await
        }
        "rules.getFact" => {
            let key = require_str(payload, "key")?;
            rules.get_fact(key).await
        }
        "rules.deleteFact" => {
            let key = require_str(payload, "key")?;
            rules.delete_fact(key).await
        }
        "rules.queryFacts" => {
            let pattern = require_str(payload, "pattern")?;
            rules.query_facts(pattern).await
        }
        "rules.getAllFacts" => rules.get_all_facts().await,
        "rules.stats" => rules.stats().await,
        // Rule definitions are out of scope internals (spec.md §1); these
        // stay admin-tier in the closed table but have no runtime effect.
        "rules.defineRule" | "rules.registerRule" => Err(GatewayError::Validation(
            "rules are registered out of process, not over the wire".into(),
        )),
        other => Err(GatewayError::UnknownOperation(other.to_string())),
    }
}
