mod memory;

pub use memory::MemoryRuleEngine;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::GatewayResult;

/// The topic-event / keyed-fact surface the core depends on (spec §6).
/// Rule evaluation internals are out of scope — the engine is consumed
/// only through `emit`, fact CRUD, and pattern subscriptions.
#[async_trait]
pub trait RuleEngine: Send + Sync + 'static {
    async fn emit(
        &self,
        topic: &str,
        data: Value,
        correlation_id: Option<String>,
        causation_id: Option<String>,
    ) -> GatewayResult<Value>;

    async fn set_fact(&self, key: &str, value: Value) -> GatewayResult<Value>;
    async fn get_fact(&self, key: &str) -> GatewayResult<Value>;
    async fn delete_fact(&self, key: &str) -> GatewayResult<Value>;
    async fn query_facts(&self, pattern: &str) -> GatewayResult<Value>;
    async fn get_all_facts(&self) -> GatewayResult<Value>;
    async fn stats(&self) -> GatewayResult<Value>;

    /// Subscribe to topic events matching `pattern` (`.`-segmented,
    /// `*` wildcards a single segment). Delivers the full event envelope
    /// for every later `emit` whose topic matches.
    async fn subscribe(
        &self,
        pattern: &str,
        sink: tokio::sync::mpsc::Sender<Value>,
    ) -> GatewayResult<Uuid>;

    fn cancel_subscription(&self, id: Uuid);

    fn healthy(&self) -> bool;
}

/// Segment-wise pattern match shared by topic (`.`) and fact-key (`:`)
/// matching. `*` matches exactly one segment; there is no multi-segment
/// wildcard.
pub(crate) fn segments_match(pattern: &str, value: &str, separator: char) -> bool {
    let pattern_segs: Vec<&str> = pattern.split(separator).collect();
    let value_segs: Vec<&str> = value.split(separator).collect();
    if pattern_segs.len() != value_segs.len() {
        return false;
    }
    pattern_segs
        .iter()
        .zip(value_segs.iter())
        .all(|(p, v)| *p == "*" || p == v)
}

#[cfg(test)]
mod pattern_tests {
    use super::*;

    #[test]
    fn exact_topic_matches() {
        assert!(segments_match("orders.created", "orders.created", '.'));
        assert!(!segments_match("orders.created", "orders.updated", '.'));
    }

    #[test]
    fn wildcard_matches_single_segment_only() {
        assert!(segments_match("orders.*", "orders.created", '.'));
        assert!(!segments_match("orders.*", "orders.created.v2", '.'));
    }

    #[test]
    fn fact_pattern_uses_colon_separator() {
        assert!(segments_match("user:*:profile", "user:42:profile", ':'));
        assert!(!segments_match("user:*:profile", "user:42:settings", ':'));
    }
}
