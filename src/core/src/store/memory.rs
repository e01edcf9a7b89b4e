use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::Store;
use crate::error::{GatewayError, GatewayResult};

type QueryFn = Arc<dyn Fn(&MemoryStore, &Value) -> Value + Send + Sync>;

struct QuerySubscription {
    query_name: String,
    params: Value,
    sink: mpsc::Sender<Value>,
}

#[derive(Default)]
struct Bucket {
    records: Mutex<Vec<(String, Value)>>,
}

impl Bucket {
    fn find(&self, key: &str) -> Option<Value> {
        let records = self.records.lock().expect("bucket lock poisoned");
        records.iter().find(|(id, _)| id == key).map(|(_, v)| v.clone())
    }
}

/// An in-memory reference implementation of [`Store`] — a test double and
/// the gateway binary's default standalone backend, not the product
/// described by spec §1's Non-goals. Buckets are schema-less; records are
/// plain JSON objects keyed by a generated `id`.
pub struct MemoryStore {
    buckets: DashMap<String, Bucket>,
    queries: DashMap<String, QueryFn>,
    subscriptions: DashMap<Uuid, QuerySubscription>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            queries: DashMap::new(),
            subscriptions: DashMap::new(),
        }
    }

    /// Register a named, read-only query (spec §6's `defineQuery`).
    /// Queries are declared before server start, so this is a plain
    /// inherent method rather than part of the object-safe `Store` trait.
    pub fn define_query<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&MemoryStore, &Value) -> Value + Send + Sync + 'static,
    {
        self.queries.insert(name.into(), Arc::new(f));
    }

    fn bucket(&self, name: &str) -> dashmap::mapref::one::Ref<'_, String, Bucket> {
        self.buckets.entry(name.to_string()).or_default();
        self.buckets.get(name).expect("just inserted")
    }

    /// All records in a bucket, in insertion order. Used both by the
    /// public `all` operation and by user-defined queries.
    pub fn snapshot(&self, bucket: &str) -> Vec<Value> {
        match self.buckets.get(bucket) {
            Some(b) => b.records.lock().expect("lock poisoned").iter().map(|(_, v)| v.clone()).collect(),
            None => Vec::new(),
        }
    }

    fn delete_idempotent(&self, bucket: &str, key: &str) -> bool {
        let b = self.bucket(bucket);
        let mut records = b.records.lock().expect("lock poisoned");
        let before = records.len();
        records.retain(|(id, _)| id != key);
        records.len() != before
    }

    async fn notify_subscribers(&self) {
        let pending: Vec<(mpsc::Sender<Value>, Value)> = self
            .subscriptions
            .iter()
            .filter_map(|entry| {
                let sub = entry.value();
                let f = self.queries.get(&sub.query_name)?;
                let value = f(self, &sub.params);
                Some((sub.sink.clone(), value))
            })
            .collect();

        for (sink, value) in pending {
            let _ = sink.send(value).await;
        }
    }

    fn numeric_field(record: &Value, field: &str) -> Option<f64> {
        record.get(field).and_then(Value::as_f64)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn require_bucket(bucket: &str) -> GatewayResult<()> {
    if bucket.is_empty() {
        return Err(GatewayError::Validation("bucket is required".into()));
    }
    Ok(())
}

fn matches_filter(record: &Value, filter: &Value) -> bool {
    let (Some(record), Some(filter)) = (record.as_object(), filter.as_object()) else {
        return false;
    };
    filter.iter().all(|(k, v)| record.get(k) == Some(v))
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> GatewayResult<Value> {
        require_bucket(bucket)?;
        Ok(self.bucket(bucket).find(key).unwrap_or(Value::Null))
    }

    async fn insert(&self, bucket: &str, data: Value) -> GatewayResult<Value> {
        require_bucket(bucket)?;
        let Some(obj) = data.as_object() else {
            return Err(GatewayError::Validation("data must be an object".into()));
        };
        let id = Uuid::new_v4().to_string();
        let mut record = Map::new();
        record.insert("id".into(), Value::String(id.clone()));
        for (k, v) in obj {
            record.insert(k.clone(), v.clone());
        }
        record.insert("_version".into(), json!(1));
        record.insert("_createdAt".into(), json!(Utc::now().timestamp_millis()));
        let record = Value::Object(record);

        {
            let b = self.bucket(bucket);
            b.records.lock().expect("lock poisoned").push((id, record.clone()));
        }
        self.notify_subscribers().await;
        Ok(record)
    }

    async fn update(&self, bucket: &str, key: &str, data: Value) -> GatewayResult<Value> {
        require_bucket(bucket)?;
        let Some(patch) = data.as_object() else {
            return Err(GatewayError::Validation("data must be an object".into()));
        };

        let updated = {
            let b = self.bucket(bucket);
            let mut records = b.records.lock().expect("lock poisoned");
            let Some((_, existing)) = records.iter_mut().find(|(id, _)| id == key) else {
                return Err(GatewayError::NotFound);
            };

            if let Some(expected) = patch.get("_expectedVersion") {
                if existing.get("_version") != Some(expected) {
                    return Err(GatewayError::Conflict);
                }
            }

            let obj = existing.as_object_mut().expect("records are always objects");
            for (k, v) in patch {
                if k == "_expectedVersion" || k == "id" {
                    continue;
                }
                obj.insert(k.clone(), v.clone());
            }
            let next_version = obj.get("_version").and_then(Value::as_i64).unwrap_or(0) + 1;
            obj.insert("_version".into(), json!(next_version));
            existing.clone()
        };

        self.notify_subscribers().await;
        Ok(updated)
    }

    async fn delete(&self, bucket: &str, key: &str) -> GatewayResult<Value> {
        require_bucket(bucket)?;
        if !self.delete_idempotent(bucket, key) {
            return Err(GatewayError::NotFound);
        }
        self.notify_subscribers().await;
        Ok(json!({ "deleted": true }))
    }

    async fn clear(&self, bucket: &str) -> GatewayResult<Value> {
        require_bucket(bucket)?;
        let count = {
            let b = self.bucket(bucket);
            let mut records = b.records.lock().expect("lock poisoned");
            let count = records.len();
            records.clear();
            count
        };
        self.notify_subscribers().await;
        Ok(json!({ "cleared": count }))
    }

    async fn all(&self, bucket: &str) -> GatewayResult<Value> {
        require_bucket(bucket)?;
        Ok(Value::Array(self.snapshot(bucket)))
    }

    async fn where_(&self, bucket: &str, filter: &Value) -> GatewayResult<Value> {
        require_bucket(bucket)?;
        let matched: Vec<Value> = self
            .snapshot(bucket)
            .into_iter()
            .filter(|r| matches_filter(r, filter))
            .collect();
        Ok(Value::Array(matched))
    }

    async fn find_one(&self, bucket: &str, filter: &Value) -> GatewayResult<Value> {
        require_bucket(bucket)?;
        Ok(self
            .snapshot(bucket)
            .into_iter()
            .find(|r| matches_filter(r, filter))
            .unwrap_or(Value::Null))
    }

    async fn count(&self, bucket: &str, filter: Option<&Value>) -> GatewayResult<Value> {
        require_bucket(bucket)?;
        let records = self.snapshot(bucket);
        let n = match filter {
            Some(f) => records.iter().filter(|r| matches_filter(r, f)).count(),
            None => records.len(),
        };
        Ok(json!(n))
    }

    async fn first(&self, bucket: &str, n: i64) -> GatewayResult<Value> {
        require_bucket(bucket)?;
        if n <= 0 {
            return Err(GatewayError::Validation("n must be positive".into()));
        }
        let records = self.snapshot(bucket);
        Ok(Value::Array(records.into_iter().take(n as usize).collect()))
    }

    async fn last(&self, bucket: &str, n: i64) -> GatewayResult<Value> {
        require_bucket(bucket)?;
        if n <= 0 {
            return Err(GatewayError::Validation("n must be positive".into()));
        }
        let records = self.snapshot(bucket);
        let start = records.len().saturating_sub(n as usize);
        Ok(Value::Array(records[start..].to_vec()))
    }

    async fn paginate(&self, bucket: &str, limit: usize, after: Option<&str>) -> GatewayResult<Value> {
        require_bucket(bucket)?;
        let b = self.bucket(bucket);
        let records = b.records.lock().expect("lock poisoned");
        let start = match after {
            Some(cursor) => records.iter().position(|(id, _)| id == cursor).map(|i| i + 1).unwrap_or(records.len()),
            None => 0,
        };
        let slice = &records[start.min(records.len())..];
        let page: Vec<Value> = slice.iter().take(limit).map(|(_, v)| v.clone()).collect();
        let has_more = slice.len() > page.len();
        Ok(json!({ "records": page, "hasMore": has_more }))
    }

    async fn sum(&self, bucket: &str, field: &str) -> GatewayResult<Value> {
        require_bucket(bucket)?;
        let total: f64 = self
            .snapshot(bucket)
            .iter()
            .filter_map(|r| Self::numeric_field(r, field))
            .sum();
        Ok(json!(total))
    }

    async fn avg(&self, bucket: &str, field: &str) -> GatewayResult<Value> {
        require_bucket(bucket)?;
        let values: Vec<f64> = self
            .snapshot(bucket)
            .iter()
            .filter_map(|r| Self::numeric_field(r, field))
            .collect();
        if values.is_empty() {
            return Ok(Value::Null);
        }
        Ok(json!(values.iter().sum::<f64>() / values.len() as f64))
    }

    async fn min(&self, bucket: &str, field: &str) -> GatewayResult<Value> {
        require_bucket(bucket)?;
        let min = self
            .snapshot(bucket)
            .iter()
            .filter_map(|r| Self::numeric_field(r, field))
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))));
        Ok(min.map(|v| json!(v)).unwrap_or(Value::Null))
    }

    async fn max(&self, bucket: &str, field: &str) -> GatewayResult<Value> {
        require_bucket(bucket)?;
        let max = self
            .snapshot(bucket)
            .iter()
            .filter_map(|r| Self::numeric_field(r, field))
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
        Ok(max.map(|v| json!(v)).unwrap_or(Value::Null))
    }

    async fn buckets(&self) -> GatewayResult<Value> {
        Ok(Value::Array(
            self.buckets.iter().map(|e| Value::String(e.key().clone())).collect(),
        ))
    }

    async fn stats(&self) -> GatewayResult<Value> {
        let bucket_counts: Map<String, Value> = self
            .buckets
            .iter()
            .map(|e| {
                let count = e.value().records.lock().expect("lock poisoned").len();
                (e.key().clone(), json!(count))
            })
            .collect();
        Ok(json!({ "buckets": bucket_counts, "subscriptions": self.subscriptions.len() }))
    }

    async fn transaction(&self, ops: Vec<Value>) -> GatewayResult<Value> {
        let mut results = Vec::with_capacity(ops.len());
        for op in &ops {
            let kind = op.get("op").and_then(Value::as_str).ok_or_else(|| {
                GatewayError::Validation("transaction op requires \"op\"".into())
            })?;
            let bucket = op.get("bucket").and_then(Value::as_str).unwrap_or_default();
            let result = match kind {
                "get" => {
                    let key = op.get("key").and_then(Value::as_str).unwrap_or_default();
                    self.get(bucket, key).await?
                }
                "insert" => {
                    let data = op.get("data").cloned().unwrap_or(Value::Null);
                    self.insert(bucket, data).await?
                }
                "update" => {
                    let key = op.get("key").and_then(Value::as_str).unwrap_or_default();
                    let data = op.get("data").cloned().unwrap_or(Value::Null);
                    self.update(bucket, key, data).await?
                }
                "delete" => {
                    let key = op.get("key").and_then(Value::as_str).unwrap_or_default();
                    json!({ "deleted": self.delete_idempotent(bucket, key) })
                }
                other => return Err(GatewayError::Validation(format!("unknown transaction op: {other}"))),
            };
            results.push(result);
        }
        self.notify_subscribers().await;
        Ok(Value::Array(results))
    }

    async fn subscribe_query(
        &self,
        query_name: &str,
        params: Value,
        sink: mpsc::Sender<Value>,
    ) -> GatewayResult<(Uuid, Value)> {
        let f = self
            .queries
            .get(query_name)
            .ok_or_else(|| GatewayError::QueryNotDefined(query_name.to_string()))?
            .clone();
        let initial = f(self, &params);
        let id = Uuid::new_v4();
        self.subscriptions.insert(
            id,
            QuerySubscription {
                query_name: query_name.to_string(),
                params,
                sink,
            },
        );
        Ok((id, initial))
    }

    fn cancel_query_subscription(&self, id: Uuid) {
        self.subscriptions.remove(&id);
    }

    fn healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = MemoryStore::new();
        let inserted = store.insert("users", json!({"name": "Alice"})).await.unwrap();
        let id = inserted["id"].as_str().unwrap().to_string();
        assert_eq!(inserted["_version"], json!(1));

        let fetched = store.get("users", &id).await.unwrap();
        assert_eq!(fetched["name"], "Alice");
        assert_eq!(fetched["_version"], json!(1));
    }

    #[tokio::test]
    async fn delete_missing_key_errors_not_found() {
        let store = MemoryStore::new();
        let err = store.delete("users", "missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound));
    }

    #[tokio::test]
    async fn delete_is_not_idempotent_at_top_level_but_is_in_transaction() {
        let store = MemoryStore::new();
        let inserted = store.insert("users", json!({"name": "Alice"})).await.unwrap();
        let id = inserted["id"].as_str().unwrap().to_string();

        let first = store.delete("users", &id).await;
        assert!(first.is_ok());
        let second = store.delete("users", &id).await;
        assert!(matches!(second, Err(GatewayError::NotFound)));

        let result = store
            .transaction(vec![json!({"op": "delete", "bucket": "users", "key": id})])
            .await
            .unwrap();
        assert_eq!(result[0], json!({"deleted": false}));
    }

    #[tokio::test]
    async fn update_detects_version_conflict() {
        let store = MemoryStore::new();
        let inserted = store.insert("users", json!({"name": "Alice"})).await.unwrap();
        let id = inserted["id"].as_str().unwrap().to_string();

        let err = store
            .update("users", &id, json!({"_expectedVersion": 99, "name": "Bob"}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Conflict));

        let updated = store
            .update("users", &id, json!({"_expectedVersion": 1, "name": "Bob"}))
            .await
            .unwrap();
        assert_eq!(updated["name"], "Bob");
        assert_eq!(updated["_version"], json!(2));
    }

    #[tokio::test]
    async fn paginate_empty_bucket() {
        let store = MemoryStore::new();
        let page = store.paginate("users", 10, None).await.unwrap();
        assert_eq!(page["records"], json!([]));
        assert_eq!(page["hasMore"], json!(false));
    }

    #[tokio::test]
    async fn first_and_last_reject_non_positive_n() {
        let store = MemoryStore::new();
        assert!(store.first("users", 0).await.is_err());
        assert!(store.last("users", -1).await.is_err());
    }

    #[tokio::test]
    async fn min_max_on_empty_bucket_is_null() {
        let store = MemoryStore::new();
        assert_eq!(store.min("users", "age").await.unwrap(), Value::Null);
        assert_eq!(store.max("users", "age").await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn sum_on_empty_is_zero_avg_is_null() {
        let store = MemoryStore::new();
        assert_eq!(store.sum("users", "age").await.unwrap(), json!(0.0));
        assert_eq!(store.avg("users", "age").await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn subscribe_query_delivers_initial_value_then_pushes_on_change() {
        let store = Arc::new(MemoryStore::new());
        store.define_query("all-users", |s, _params| Value::Array(s.snapshot("users")));

        let (tx, mut rx) = mpsc::channel(8);
        let (_id, initial) = store.subscribe_query("all-users", Value::Null, tx).await.unwrap();
        assert_eq!(initial, json!([]));

        store.insert("users", json!({"name": "Alice"})).await.unwrap();
        let pushed = rx.recv().await.unwrap();
        assert_eq!(pushed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn subscribe_unknown_query_errors() {
        let store = MemoryStore::new();
        let (tx, _rx) = mpsc::channel(1);
        let err = store.subscribe_query("nope", Value::Null, tx).await.unwrap_err();
        assert!(matches!(err, GatewayError::QueryNotDefined(_)));
    }
}
