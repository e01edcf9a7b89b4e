mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::GatewayResult;

/// The bucket/record/query surface the core depends on (spec §6). Schema
/// validation, persistence, and query-evaluation internals are out of
/// scope — this trait only describes the shape the connection actor and
/// subscription manager call through.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get(&self, bucket: &str, key: &str) -> GatewayResult<Value>;
    async fn insert(&self, bucket: &str, data: Value) -> GatewayResult<Value>;
    async fn update(&self, bucket: &str, key: &str, data: Value) -> GatewayResult<Value>;
    async fn delete(&self, bucket: &str, key: &str) -> GatewayResult<Value>;
    async fn clear(&self, bucket: &str) -> GatewayResult<Value>;
    async fn all(&self, bucket: &str) -> GatewayResult<Value>;
    async fn where_(&self, bucket: &str, filter: &Value) -> GatewayResult<Value>;
    async fn find_one(&self, bucket: &str, filter: &Value) -> GatewayResult<Value>;
    async fn count(&self, bucket: &str, filter: Option<&Value>) -> GatewayResult<Value>;
    async fn first(&self, bucket: &str, n: i64) -> GatewayResult<Value>;
    async fn last(&self, bucket: &str, n: i64) -> GatewayResult<Value>;
    async fn paginate(&self, bucket: &str, limit: usize, after: Option<&str>) -> GatewayResult<Value>;
    async fn sum(&self, bucket: &str, field: &str) -> GatewayResult<Value>;
    async fn avg(&self, bucket: &str, field: &str) -> GatewayResult<Value>;
    async fn min(&self, bucket: &str, field: &str) -> GatewayResult<Value>;
    async fn max(&self, bucket: &str, field: &str) -> GatewayResult<Value>;
    async fn buckets(&self) -> GatewayResult<Value>;
    async fn stats(&self) -> GatewayResult<Value>;

    /// Apply a list of operations atomically. Each element of `ops` is
    /// `{op, bucket, key?, data?, filter?}`; results echo the shape of the
    /// equivalent top-level call, with read-your-own-writes within the
    /// batch. Transaction-level delete is idempotent (`{deleted: bool}`),
    /// unlike the top-level `delete` which errors on a missing key — the
    /// two variants documented in spec §9 are both real, pinned per
    /// context as DESIGN.md records.
    async fn transaction(&self, ops: Vec<Value>) -> GatewayResult<Value>;

    /// Register (or re-evaluate) a live query subscription, delivering
    /// the current value immediately and pushing recomputed values to
    /// `sink` on every later mutation. Atomic: the registration is in
    /// place before the initial value is returned (spec §4.3).
    async fn subscribe_query(
        &self,
        query_name: &str,
        params: Value,
        sink: tokio::sync::mpsc::Sender<Value>,
    ) -> GatewayResult<(Uuid, Value)>;

    /// Cancel a query subscription. Idempotent — cancelling an id twice
    /// (or one that never existed) is a no-op.
    fn cancel_query_subscription(&self, id: Uuid);

    fn healthy(&self) -> bool;
}
