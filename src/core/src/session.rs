use chrono::{DateTime, Utc};
use serde_json::Value;

/// The authenticated identity attached to a connection after `auth.login`.
///
/// Invariant: when `expires_at` is present and elapsed, any further
/// request is rejected before routing and the session is cleared
/// (spec §3, "Session").
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub roles: Vec<String>,
    pub metadata: Option<Value>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles,
            metadata: None,
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// True once `expires_at` has passed. A session with no expiry never
    /// elapses.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now > exp)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn no_expiry_never_elapses() {
        let session = Session::new("u1", vec!["user".into()]);
        assert!(!session.is_expired(Utc::now()));
    }

    #[test]
    fn future_expiry_not_yet_elapsed() {
        let session = Session::new("u1", vec![]).with_expiry(Utc::now() + Duration::minutes(5));
        assert!(!session.is_expired(Utc::now()));
    }

    #[test]
    fn past_expiry_is_elapsed() {
        let session = Session::new("u1", vec![]).with_expiry(Utc::now() - Duration::minutes(5));
        assert!(session.is_expired(Utc::now()));
    }

    #[test]
    fn has_role_checks_membership() {
        let session = Session::new("u1", vec!["admin".into(), "write".into()]);
        assert!(session.has_role("admin"));
        assert!(!session.has_role("read"));
    }
}
