use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::audit::{AuditLog, NoopAuditLog};
use crate::auth::{AuthValidator, BuiltInUserStore};
use crate::authz::PermissionPolicy;
use crate::procedures::ProcedureOrchestrator;
use crate::rules::RuleEngine;
use crate::store::Store;

/// Heartbeat cadence (spec.md §4.5 / §6's `heartbeat` config table).
/// `timeout_ms` is accepted for wire compatibility but reserved — the
/// effective timeout is always one `interval` tick.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub timeout_ms: Option<u64>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout_ms: None,
        }
    }
}

/// Outbound drop threshold (spec.md §4.6 / §6's `backpressure` table).
#[derive(Debug, Clone, Copy)]
pub struct BackpressureConfig {
    pub max_buffered_bytes: usize,
    pub high_water_mark: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_buffered_bytes: 4 * 1024 * 1024,
            high_water_mark: 0.8,
        }
    }
}

/// The two session sources of spec.md §4.9, plus the RBAC policy and
/// session TTL.
#[derive(Clone)]
pub struct AuthConfig {
    pub validator: Option<Arc<dyn AuthValidator>>,
    pub built_in: Option<Arc<BuiltInUserStore>>,
    pub required: bool,
    pub permissions: PermissionPolicy,
    pub session_ttl: Option<ChronoDuration>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            validator: None,
            built_in: None,
            required: false,
            permissions: PermissionPolicy::default(),
            session_ttl: None,
        }
    }
}

impl AuthConfig {
    /// `welcome.requiresAuth` is true only when some session source is
    /// configured and auth is not explicitly marked optional (spec.md §4.2
    /// step 2 / GLOSSARY "Session").
    pub fn is_configured(&self) -> bool {
        self.validator.is_some() || self.built_in.is_some()
    }
}

/// The single configuration object consumed at startup (spec.md §6).
#[derive(Clone)]
pub struct GatewayConfig {
    pub store: Arc<dyn Store>,
    pub rules: Option<Arc<dyn RuleEngine>>,
    pub bind: SocketAddr,
    pub path: String,
    pub max_payload_bytes: usize,
    pub auth: AuthConfig,
    pub rate_limit: Option<(usize, Duration)>,
    pub heartbeat: HeartbeatConfig,
    pub backpressure: BackpressureConfig,
    pub max_subscriptions_per_connection: usize,
    pub expose_error_details: bool,
    pub allowed_origins: Option<Vec<String>>,
    pub max_connections_per_ip: Option<usize>,
    pub audit: Arc<dyn AuditLog>,
    pub procedures: Option<Arc<dyn ProcedureOrchestrator>>,
}

impl GatewayConfig {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            rules: None,
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            path: "/".to_string(),
            max_payload_bytes: 1024 * 1024,
            auth: AuthConfig::default(),
            rate_limit: None,
            heartbeat: HeartbeatConfig::default(),
            backpressure: BackpressureConfig::default(),
            max_subscriptions_per_connection: 100,
            expose_error_details: true,
            allowed_origins: None,
            max_connections_per_ip: None,
            audit: Arc::new(NoopAuditLog),
            procedures: None,
        }
    }

    /// `welcome.requiresAuth` (spec.md §4.2 step 2): true iff some session
    /// source is configured and auth is required.
    pub fn requires_auth(&self) -> bool {
        self.auth.required && self.auth.is_configured()
    }
}
