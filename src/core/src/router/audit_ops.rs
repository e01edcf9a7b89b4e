use serde_json::Value;

use crate::audit::AuditLog;
use crate::error::{GatewayError, GatewayResult};

/// `audit.query` — the one ambient operation spec.md's closed tier table
/// names (admin-tier) without giving it a namespace in §4.2 step 6's
/// prefix list. Treated as its own one-operation namespace rather than
/// folded under `server.*`, since the table spells it "audit query".
pub async fn dispatch(operation: &str, audit: &dyn AuditLog) -> GatewayResult<Value> {
    match operation {
        "audit.query" => serde_json::to_value(audit.query())
            .map_err(|e| GatewayError::Internal(format!("failed to serialize audit records: {e}"))),
        other => Err(GatewayError::UnknownOperation(other.to_string())),
    }
}
