use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use gateway_core::{
    AuthConfig, BackpressureConfig, BuiltInUserStore, GatewayConfig, HeartbeatConfig, MemoryAuditLog,
    MemoryRuleEngine, MemoryStore, NoopAuditLog, PermissionPolicy,
};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter())
        .init();

    let host = parse_ip("GATEWAY_HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let port = parse_u16("GATEWAY_PORT", 8080);
    let path = env::var("GATEWAY_PATH").unwrap_or_else(|_| "/".to_string());
    let max_payload_bytes = parse_usize("GATEWAY_MAX_PAYLOAD_BYTES", 1024 * 1024);
    let max_subscriptions = parse_usize("GATEWAY_MAX_SUBSCRIPTIONS_PER_CONNECTION", 100);
    let expose_error_details = parse_bool("GATEWAY_EXPOSE_ERROR_DETAILS", true);
    let max_connections_per_ip = env::var("GATEWAY_MAX_CONNECTIONS_PER_IP")
        .ok()
        .and_then(|v| v.parse().ok());
    let enable_rules = parse_bool("GATEWAY_ENABLE_RULES", true);
    let enable_audit = parse_bool("GATEWAY_ENABLE_AUDIT", false);
    let auth_required = parse_bool("GATEWAY_AUTH_REQUIRED", false);
    let admin_secret = env::var("GATEWAY_ADMIN_SECRET").ok();
    let rate_limit_max = env::var("GATEWAY_RATE_LIMIT_MAX_REQUESTS").ok().and_then(|v| v.parse().ok());
    let rate_limit_window_ms = parse_u64("GATEWAY_RATE_LIMIT_WINDOW_MS", 60_000);
    let heartbeat_interval_secs = parse_u64("GATEWAY_HEARTBEAT_INTERVAL_SECS", 30);

    // Store and Rule Engine are external collaborators (spec.md §1); this
    // binary wires in the in-memory implementations so the gateway can run
    // standalone. A production deployment swaps these for adapters backed
    // by the real services without touching `gateway-core`.
    let store = Arc::new(MemoryStore::new());

    let rules = if enable_rules {
        Some(Arc::new(MemoryRuleEngine::new()) as Arc<dyn gateway_core::RuleEngine>)
    } else {
        None
    };

    let audit: Arc<dyn gateway_core::AuditLog> = if enable_audit {
        Arc::new(MemoryAuditLog::default())
    } else {
        Arc::new(NoopAuditLog)
    };

    let built_in = BuiltInUserStore::new(admin_secret);

    let mut config = GatewayConfig::new(store);
    config.rules = rules;
    config.bind = SocketAddr::new(host, port);
    config.path = path;
    config.max_payload_bytes = max_payload_bytes;
    config.max_subscriptions_per_connection = max_subscriptions;
    config.expose_error_details = expose_error_details;
    config.max_connections_per_ip = max_connections_per_ip;
    config.audit = audit;
    config.auth = AuthConfig {
        validator: None,
        built_in: Some(Arc::new(built_in)),
        required: auth_required,
        permissions: PermissionPolicy::default(),
        session_ttl: None,
    };
    config.rate_limit = rate_limit_max.map(|max| (max, Duration::from_millis(rate_limit_window_ms)));
    config.heartbeat = HeartbeatConfig {
        interval: Duration::from_secs(heartbeat_interval_secs),
        timeout_ms: None,
    };
    config.backpressure = BackpressureConfig::default();

    let (handle, serve_task) = gateway_core::serve(config).await?;
    tracing::info!(addr = %handle.local_addr(), "gateway listening");

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining connections");
    handle.stop(5_000).await;
    serve_task.abort();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn parse_ip(key: &str, default: IpAddr) -> IpAddr {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_u16(key: &str, default: u16) -> u16 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => default,
    }
}

fn tracing_filter() -> tracing_subscriber::EnvFilter {
    if let Ok(filter) = env::var("RUST_LOG") {
        return tracing_subscriber::EnvFilter::new(filter);
    }
    tracing_subscriber::EnvFilter::new("info")
}
