use serde_json::{Map, Value};

use crate::error::{GatewayError, GatewayResult};
use crate::store::Store;

fn require_str<'a>(payload: &'a Map<String, Value>, field: &str) -> GatewayResult<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::Validation(format!("\"{field}\" is required")))
}

fn require_i64(payload: &Map<String, Value>, field: &str) -> GatewayResult<i64> {
    payload
        .get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| GatewayError::Validation(format!("\"{field}\" must be an integer")))
}

/// Dispatch every non-subscription `store.*` operation (spec.md §6).
/// `store.subscribe`/`store.unsubscribe` are handled by the connection
/// actor directly against the per-connection `SubscriptionManager`, since
/// they need the outbound push channel this module has no access to.
pub async fn dispatch(
    operation: &str,
    payload: &Map<String, Value>,
    store: &dyn Store,
) -> GatewayResult<Value> {
    match operation {
        "store.get" => {
            let bucket = require_str(payload, "bucket")?;
            let key = require_str(payload, "key")?;
            store.get(bucket, key).await
        }
        "store.insert" => {
            let bucket = require_str(payload, "bucket")?;
            let data = payload
                .get("data")
                .cloned()
                .ok_or_else(|| GatewayError::Validation("\"data\" is required".into()))?;
            store.insert(bucket, data).await
        }
        "store.update" => {
            let bucket = require_str(payload, "bucket")?;
            let key = require_str(payload, "key")?;
            let data = payload
                .get("data")
                .cloned()
                .ok_or_else(|| GatewayError::Validation("\"data\" is required".into()))?;
            store.update(bucket, key, data).await
        }
        "store.delete" => {
            let bucket = require_str(payload, "bucket")?;
            let key = require_str(payload, "key")?;
            store.delete(bucket, key).await
        }
        "store.clear" => {
            let bucket = require_str(payload, "bucket")?;
            store.clear(bucket).await
        }
        "store.all" => {
            let bucket = require_str(payload, "bucket")?;
            store.all(bucket).await
        }
        "store.where" => {
            let bucket = require_str(payload, "bucket")?;
            let filter = payload
                .get("filter")
                .cloned()
                .ok_or_else(|| GatewayError::Validation("\"filter\" is required".into()))?;
            store.where_(bucket, &filter).await
        }
        "store.findOne" => {
            let bucket = require_str(payload, "bucket")?;
            let filter = payload
                .get("filter")
                .cloned()
                .ok_or_else(|| GatewayError::Validation("\"filter\" is required".into()))?;
            store.find_one(bucket, &filter).await
        }
        "store.count" => {
            let bucket = require_str(payload, "bucket")?;
            store.count(bucket, payload.get("filter")).await
        }
        "store.first" => {
            let bucket = require_str(payload, "bucket")?;
            let n = require_i64(payload, "n")?;
            store.first(bucket, n).await
        }
        "store.last" => {
            let bucket = require_str(payload, "bucket")?;
            let n = require_i64(payload, "n")?;
            store.last(bucket, n).await
        }
        "store.paginate" => {
            let bucket = require_str(payload, "bucket")?;
            let limit = payload
                .get("limit")
                .and_then(Value::as_u64)
                .unwrap_or(20) as usize;
            let after = payload.get("after").and_then(Value::as_str);
            store.paginate(bucket, limit, after).await
        }
        "store.sum" => {
            let bucket = require_str(payload, "bucket")?;
            let field = require_str(payload, "field")?;
            store.sum(bucket, field).await
        }
        "store.avg" => {
            let bucket = require_str(payload, "bucket")?;
            let field = require_str(payload, "field")?;
            store.avg(bucket, field).await
        }
        "store.min" => {
            let bucket = require_str(payload, "bucket")?;
            let field = require_str(payload, "field")?;
            store.min(bucket, field).await
        }
        "store.max" => {
            let bucket = require_str(payload, "bucket")?;
            let field = require_str(payload, "field")?;
            store.max(bucket, field).await
        }
        "store.buckets" => store.buckets().await,
        "store.stats" => store.stats().await,
        "store.transaction" => {
            let ops = payload
                .get("ops")
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| GatewayError::Validation("\"ops\" must be an array".into()))?;
            store.transaction(ops).await
        }
        // Bucket/query shape is declared before server start (spec.md §6);
        // there is no wire affordance to register one at runtime. These
        // stay in the closed operation table (both admin-tier) purely so
        // the permission gate has something to check against.
        "store.defineBucket" => {
            let bucket = require_str(payload, "bucket")?;
            store.count(bucket, None).await?;
            Ok(serde_json::json!({ "bucket": bucket, "defined": true }))
        }
        "store.defineQuery" => Err(GatewayError::Validation(
            "queries are declared at startup and cannot be defined over the wire".into(),
        )),
        other => Err(GatewayError::UnknownOperation(other.to_string())),
    }
}
