use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Exported snapshot of a connection, as enumerated by `server.connections`
/// (spec §3, "Connection registry entry").
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryEntry {
    pub id: u64,
    pub address: IpAddr,
    pub connected_at: DateTime<Utc>,
    pub authenticated: bool,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub store_subscriptions: usize,
    pub rules_subscriptions: usize,
}

/// Process-wide live-connection snapshot map (spec §4.7). Updated at
/// accept, `auth.login`/`auth.logout`, subscription add/remove, and
/// disconnect; `count()` and `snapshot()` are the two read paths.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: DashMap<u64, RegistryEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: RegistryEntry) {
        self.entries.insert(entry.id, entry);
    }

    pub fn remove(&self, id: u64) {
        self.entries.remove(&id);
    }

    pub fn set_authenticated(&self, id: u64, user_id: Option<String>) {
        if let Some(mut entry) = self.entries.get_mut(&id) {
            entry.authenticated = user_id.is_some();
            entry.user_id = user_id;
        }
    }

    pub fn set_subscription_counts(&self, id: u64, store: usize, rules: usize) {
        if let Some(mut entry) = self.entries.get_mut(&id) {
            entry.store_subscriptions = store;
            entry.rules_subscriptions = rules;
        }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    /// Aggregate metrics backing `server.stats` (spec §4.7).
    pub fn metrics(&self) -> RegistryMetrics {
        let mut metrics = RegistryMetrics::default();
        for entry in self.entries.iter() {
            metrics.active_connections += 1;
            if entry.authenticated {
                metrics.authenticated_connections += 1;
            }
            metrics.total_store_subscriptions += entry.store_subscriptions;
            metrics.total_rules_subscriptions += entry.rules_subscriptions;
        }
        metrics
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RegistryMetrics {
    #[serde(rename = "activeConnections")]
    pub active_connections: usize,
    #[serde(rename = "authenticatedConnections")]
    pub authenticated_connections: usize,
    #[serde(rename = "totalStoreSubscriptions")]
    pub total_store_subscriptions: usize,
    #[serde(rename = "totalRulesSubscriptions")]
    pub total_rules_subscriptions: usize,
}

/// Monotonic connection id generator, shared process-wide.
#[derive(Default)]
pub struct ConnectionIdGenerator(AtomicU64);

impl ConnectionIdGenerator {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}
