use serde_json::{Map, Value};

use crate::error::{GatewayError, GatewayResult};
use crate::procedures::ProcedureOrchestrator;

/// `procedures.call` (SPEC_FULL.md §D) — dispatches to an injected
/// orchestrator; the orchestrator's internal scheduling/timeouts are out
/// of scope per spec.md §1.
pub async fn dispatch(
    operation: &str,
    payload: &Map<String, Value>,
    orchestrator: Option<&dyn ProcedureOrchestrator>,
) -> GatewayResult<Value> {
    match operation {
        "procedures.call" => {
            let orchestrator = orchestrator
                .ok_or_else(|| GatewayError::Validation("no procedure orchestrator is configured".into()))?;
            let name = payload
                .get("name")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| GatewayError::Validation("\"name\" is required".into()))?;
            let params = payload.get("params").cloned().unwrap_or(Value::Null);
            orchestrator.call(name, params).await
        }
        "procedures.register" => Err(GatewayError::Validation(
            "procedures are registered out of process, not over the wire".into(),
        )),
        other => Err(GatewayError::UnknownOperation(other.to_string())),
    }
}
