mod audit_ops;
mod auth_ops;
mod procedures_ops;
mod rules_ops;
mod server_ops;
mod store_ops;
mod subscriptions;

pub use audit_ops::dispatch as dispatch_audit;
pub use auth_ops::{login as auth_login, session_to_json};
pub use procedures_ops::dispatch as dispatch_procedures;
pub use rules_ops::dispatch as dispatch_rules;
pub use server_ops::{connections as server_connections, stats as server_stats};
pub use store_ops::dispatch as dispatch_store;
pub use subscriptions::{SubscribeTarget, SubscriptionManager};

/// Which collaborator a request is routed to, by operation prefix (spec.md
/// §4.2 step 6). Operations matching none of these prefixes are
/// `UNKNOWN_OPERATION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Store,
    Rules,
    Auth,
    Server,
    Procedures,
    Audit,
}

pub fn classify(operation: &str) -> Option<Namespace> {
    if operation.starts_with("store.") {
        Some(Namespace::Store)
    } else if operation.starts_with("rules.") {
        Some(Namespace::Rules)
    } else if operation.starts_with("auth.") {
        Some(Namespace::Auth)
    } else if operation.starts_with("server.") {
        Some(Namespace::Server)
    } else if operation.starts_with("procedures.") {
        Some(Namespace::Procedures)
    } else if operation.starts_with("audit.") {
        Some(Namespace::Audit)
    } else {
        None
    }
}
