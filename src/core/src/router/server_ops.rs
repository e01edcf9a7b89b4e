use serde_json::{json, Value};

use crate::error::{GatewayError, GatewayResult};
use crate::registry::ConnectionRegistry;
use crate::rules::RuleEngine;
use crate::store::Store;

/// `server.stats` (SPEC_FULL.md §D): registry aggregate metrics plus
/// collaborator health, both admin-tier per spec.md §4.2's closed table.
pub async fn stats(
    registry: &ConnectionRegistry,
    store: &dyn Store,
    rules: Option<&dyn RuleEngine>,
) -> GatewayResult<Value> {
    let metrics = registry.metrics();
    Ok(json!({
        "activeConnections": metrics.active_connections,
        "authenticatedConnections": metrics.authenticated_connections,
        "totalStoreSubscriptions": metrics.total_store_subscriptions,
        "totalRulesSubscriptions": metrics.total_rules_subscriptions,
        "storeHealthy": store.healthy(),
        "rulesAvailable": rules.is_some(),
        "rulesHealthy": rules.map(RuleEngine::healthy),
    }))
}

/// `server.connections`: the registry's live snapshot.
pub fn connections(registry: &ConnectionRegistry) -> GatewayResult<Value> {
    serde_json::to_value(registry.snapshot())
        .map_err(|e| GatewayError::Internal(format!("failed to serialize registry snapshot: {e}")))
}
