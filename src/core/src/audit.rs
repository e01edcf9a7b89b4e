use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// A single security-relevant event recorded when `audit` is enabled
/// (spec.md §6's `audit` config option; shape supplemented per
/// SPEC_FULL.md §D).
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    pub kind: AuditKind,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AuditKind {
    Login,
    LoginFailed,
    Logout,
    PermissionDenied,
}

/// Append-only sink for audit records, injected into the gateway the same
/// way the teacher injects its identity lookup: a trait object built at
/// startup and shared read-only across connections.
pub trait AuditLog: Send + Sync + 'static {
    fn record(&self, record: AuditRecord);

    /// Backing `audit.query` (spec.md §4.2's closed tier table names it
    /// admin-tier without shaping a response; sinks with no queryable
    /// history — the no-op default, or an external write-only log —
    /// answer with an empty list).
    fn query(&self) -> Vec<AuditRecord> {
        Vec::new()
    }
}

/// Default sink when `audit` is not configured — every record is dropped.
pub struct NoopAuditLog;

impl AuditLog for NoopAuditLog {
    fn record(&self, _record: AuditRecord) {}
}

/// In-process audit log used by tests and by a standalone deployment that
/// wants in-memory introspection without an external sink.
#[derive(Default)]
pub struct MemoryAuditLog {
    records: dashmap::DashMap<u64, AuditRecord>,
    next: std::sync::atomic::AtomicU64,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<AuditRecord> {
        let mut entries: Vec<(u64, AuditRecord)> =
            self.records.iter().map(|e| (*e.key(), e.value().clone())).collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, r)| r).collect()
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, record: AuditRecord) {
        let seq = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.records.insert(seq, record);
    }

    fn query(&self) -> Vec<AuditRecord> {
        self.snapshot()
    }
}
