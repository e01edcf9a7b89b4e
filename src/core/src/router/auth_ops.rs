use std::collections::HashMap;

use serde_json::{json, Value};

use crate::auth::AuthService;
use crate::error::GatewayResult;
use crate::session::Session;

/// `auth.login` (spec.md §4.9 / SPEC_FULL.md §D). Credential shape and
/// session-source selection are `AuthService`'s concern; this only adapts
/// the wire payload into the call and the resulting session into JSON.
pub async fn login(
    payload: &serde_json::Map<String, Value>,
    auth: &AuthService,
) -> GatewayResult<Session> {
    let map: HashMap<String, Value> = payload.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    auth.login(&map).await
}

/// JSON shape returned by `auth.login` and `auth.whoami`.
pub fn session_to_json(session: &Session) -> Value {
    json!({
        "userId": session.user_id,
        "roles": session.roles,
        "expiresAt": session.expires_at.map(|t| t.timestamp_millis()),
    })
}
