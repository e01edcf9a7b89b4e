//! Connection, subscription, and resilience core for the real-time
//! subscription gateway.
//!
//! This crate owns everything the protocol spec calls "the core": the
//! per-connection protocol machine, the subscription multiplexer, and the
//! cross-cutting resilience fabric (rate limiting, heartbeat, backpressure,
//! registry, shutdown). Storage and rule evaluation are external
//! collaborators consumed through the [`store::Store`] and [`rules::RuleEngine`]
//! traits; the gateway binary supplies concrete implementations.

pub mod audit;
pub mod auth;
pub mod authz;
pub mod backpressure;
pub mod config;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod outbound;
pub mod procedures;
pub mod ratelimit;
pub mod registry;
pub mod router;
pub mod rules;
pub mod server;
pub mod session;
pub mod store;

pub use audit::{AuditLog, AuditRecord, MemoryAuditLog, NoopAuditLog};
pub use auth::{AuthService, AuthValidator, BuiltInUserStore};
pub use authz::{DefaultDecision, PermissionPolicy, PermissionRule, Tier};
pub use config::{AuthConfig, BackpressureConfig, GatewayConfig, HeartbeatConfig};
pub use error::{GatewayError, GatewayResult};
pub use procedures::ProcedureOrchestrator;
pub use rules::{MemoryRuleEngine, RuleEngine};
pub use server::{serve, GatewayHandle, ShutdownEvent};
pub use session::Session;
pub use store::{MemoryStore, Store};
