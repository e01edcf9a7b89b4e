use async_trait::async_trait;
use serde_json::Value;

use crate::error::GatewayResult;

/// Stored-procedure orchestrator consumed under the `procedures.*`
/// namespace (spec.md §4.2's closed tier table lists `procedures.call` as
/// write-tier; the orchestrator's internals — scheduling, timeouts,
/// multi-step composition — are out of scope per spec.md §1).
#[async_trait]
pub trait ProcedureOrchestrator: Send + Sync + 'static {
    async fn call(&self, name: &str, params: Value) -> GatewayResult<Value>;
}
