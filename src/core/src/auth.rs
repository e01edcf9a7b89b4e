use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use scrypt::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use scrypt::Scrypt;

use crate::error::{GatewayError, GatewayResult};
use crate::session::Session;

/// External token → session validator, the pluggable half of spec §4.9's
/// "two session sources". Object-safe so it can be stored behind
/// `Arc<dyn AuthValidator>` in the gateway config.
#[async_trait]
pub trait AuthValidator: Send + Sync + 'static {
    async fn validate(&self, token: &str) -> Option<Session>;
}

/// A registered built-in user: scrypt password hash plus role list.
#[derive(Debug, Clone)]
struct BuiltInUser {
    password_hash: String,
    roles: Vec<String>,
}

/// Built-in user store with scrypt-hashed passwords and a signed bootstrap
/// admin secret (spec §4.9). The admin secret grants an admin session for
/// username `"admin"` without needing a pre-registered user — useful for
/// first boot.
pub struct BuiltInUserStore {
    users: DashMap<String, BuiltInUser>,
    admin_secret: Option<String>,
}

impl BuiltInUserStore {
    pub fn new(admin_secret: Option<String>) -> Self {
        Self {
            users: DashMap::new(),
            admin_secret,
        }
    }

    pub fn hash_password(password: &str) -> GatewayResult<String> {
        let mut salt_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| GatewayError::Internal(format!("salt encoding failed: {e}")))?;
        Scrypt
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| GatewayError::Internal(format!("password hashing failed: {e}")))
    }

    pub fn register(&self, username: impl Into<String>, password_hash: String, roles: Vec<String>) {
        self.users.insert(username.into(), BuiltInUser { password_hash, roles });
    }

    fn verify(&self, username: &str, password: &str) -> Option<Vec<String>> {
        let user = self.users.get(username)?;
        let parsed = PasswordHash::new(&user.password_hash).ok()?;
        Scrypt.verify_password(password.as_bytes(), &parsed).ok()?;
        Some(user.roles.clone())
    }

    fn bootstrap_admin(&self, username: &str, password: &str) -> Option<Vec<String>> {
        let secret = self.admin_secret.as_ref()?;
        if username == "admin" && password == secret {
            Some(vec!["admin".to_string()])
        } else {
            None
        }
    }
}

/// Where `auth.login` credentials are checked: an injected external
/// validator, a built-in user store, or both.
pub struct AuthService {
    validator: Option<Arc<dyn AuthValidator>>,
    built_in: Option<Arc<BuiltInUserStore>>,
    session_ttl: Option<Duration>,
}

impl AuthService {
    pub fn new(
        validator: Option<Arc<dyn AuthValidator>>,
        built_in: Option<Arc<BuiltInUserStore>>,
        session_ttl: Option<Duration>,
    ) -> Self {
        Self { validator, built_in, session_ttl }
    }

    fn apply_ttl(&self, session: Session) -> Session {
        match self.session_ttl {
            Some(ttl) => session.with_expiry(Utc::now() + ttl),
            None => session,
        }
    }

    /// `auth.login` — accepts either `{token}` (external validator) or
    /// `{username, password}` (built-in store).
    pub async fn login(&self, payload: &HashMap<String, serde_json::Value>) -> GatewayResult<Session> {
        if let Some(token) = payload.get("token").and_then(|v| v.as_str()) {
            let validator = self.validator.as_ref().ok_or(GatewayError::Unauthorized)?;
            let session = validator.validate(token).await.ok_or(GatewayError::Unauthorized)?;
            return Ok(self.apply_ttl(session));
        }

        let username = payload.get("username").and_then(|v| v.as_str()).ok_or_else(|| {
            GatewayError::Validation("login requires either \"token\" or \"username\"/\"password\"".into())
        })?;
        let password = payload
            .get("password")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::Validation("login requires \"password\"".into()))?;

        let built_in = self.built_in.as_ref().ok_or(GatewayError::Unauthorized)?;
        let roles = built_in
            .bootstrap_admin(username, password)
            .or_else(|| built_in.verify(username, password))
            .ok_or(GatewayError::Unauthorized)?;

        Ok(self.apply_ttl(Session::new(username, roles)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StubValidator(Option<Session>);

    #[async_trait]
    impl AuthValidator for StubValidator {
        async fn validate(&self, _token: &str) -> Option<Session> {
            self.0.clone()
        }
    }

    fn payload(json: serde_json::Value) -> HashMap<String, serde_json::Value> {
        json.as_object().unwrap().clone().into_iter().collect()
    }

    #[tokio::test]
    async fn external_token_login_succeeds() {
        let validator = Arc::new(StubValidator(Some(Session::new("alice", vec!["user".into()]))));
        let auth = AuthService::new(Some(validator), None, None);
        let session = auth.login(&payload(json!({"token": "abc"}))).await.unwrap();
        assert_eq!(session.user_id, "alice");
    }

    #[tokio::test]
    async fn external_token_rejected_without_validator() {
        let auth = AuthService::new(None, None, None);
        let err = auth.login(&payload(json!({"token": "abc"}))).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unauthorized));
    }

    #[tokio::test]
    async fn built_in_admin_bootstrap() {
        let store = Arc::new(BuiltInUserStore::new(Some("s3cret".into())));
        let auth = AuthService::new(None, Some(store), None);
        let session = auth
            .login(&payload(json!({"username": "admin", "password": "s3cret"})))
            .await
            .unwrap();
        assert!(session.has_role("admin"));
    }

    #[tokio::test]
    async fn built_in_registered_user_round_trips() {
        let store = Arc::new(BuiltInUserStore::new(None));
        let hash = BuiltInUserStore::hash_password("hunter2").unwrap();
        store.register("bob", hash, vec!["write".into()]);
        let auth = AuthService::new(None, Some(store), None);

        let session = auth
            .login(&payload(json!({"username": "bob", "password": "hunter2"})))
            .await
            .unwrap();
        assert_eq!(session.user_id, "bob");

        let err = auth
            .login(&payload(json!({"username": "bob", "password": "wrong"})))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unauthorized));
    }

    #[tokio::test]
    async fn session_ttl_sets_expiry() {
        let store = Arc::new(BuiltInUserStore::new(Some("s".into())));
        let auth = AuthService::new(None, Some(store), Some(Duration::minutes(5)));
        let session = auth
            .login(&payload(json!({"username": "admin", "password": "s"})))
            .await
            .unwrap();
        assert!(session.expires_at.is_some());
    }
}
