use crate::session::Session;

/// Coarse permission class of an operation: admin > write > read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Read,
    Write,
    Admin,
}

impl Tier {
    /// Built-in role name granting this tier and everything below it.
    fn role_name(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }
}

/// The closed operation tier table of spec §4.2. Structural changes are
/// admin, mutations are write, everything else (reads, subscribe/
/// unsubscribe) is read.
pub fn operation_tier(operation: &str) -> Tier {
    const ADMIN: &[&str] = &[
        "store.defineBucket",
        "store.defineQuery",
        "rules.defineRule",
        "rules.registerRule",
        "procedures.register",
        "server.stats",
        "server.connections",
        "audit.query",
    ];
    const WRITE: &[&str] = &[
        "store.insert",
        "store.update",
        "store.delete",
        "store.clear",
        "store.transaction",
        "rules.emit",
        "rules.setFact",
        "rules.deleteFact",
        "procedures.call",
    ];

    if ADMIN.contains(&operation) {
        Tier::Admin
    } else if WRITE.contains(&operation) {
        Tier::Write
    } else {
        Tier::Read
    }
}

/// Highest built-in tier role present in `roles`, if any. Sessions with no
/// built-in role skip the tier check entirely and rely on declarative or
/// custom rules (spec §4.2).
fn highest_builtin_tier(roles: &[String]) -> Option<Tier> {
    [Tier::Admin, Tier::Write, Tier::Read]
        .into_iter()
        .find(|tier| roles.iter().any(|r| r == tier.role_name()))
}

/// One declarative permission rule (spec §4.9). `allow` patterns support
/// `"*"` and a `"prefix.*"` wildcard; resource constraints are optional
/// allow-lists matched against the extracted resource name.
#[derive(Debug, Clone)]
pub struct PermissionRule {
    pub role: String,
    pub allow: Vec<String>,
    pub buckets: Option<Vec<String>>,
    pub topics: Option<Vec<String>>,
}

impl PermissionRule {
    fn matches_operation(&self, operation: &str) -> bool {
        self.allow.iter().any(|pattern| pattern_matches(pattern, operation))
    }

    fn matches_resource(&self, operation: &str, resource: &str) -> bool {
        let constraint = if operation.starts_with("store.") {
            &self.buckets
        } else if operation.starts_with("rules.") {
            &self.topics
        } else {
            &None
        };
        match constraint {
            None => true,
            Some(allowed) => allowed.iter().any(|r| r == resource),
        }
    }
}

fn pattern_matches(pattern: &str, operation: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return operation.starts_with(prefix) && operation[prefix.len()..].starts_with('.');
    }
    pattern == operation
}

/// Default decision when no declarative rule matches (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultDecision {
    Allow,
    Deny,
}

/// A custom predicate consulted before declarative rules. `Some(bool)` is
/// authoritative; `None` falls through to the declarative rules list.
pub type CustomCheck = std::sync::Arc<dyn Fn(&Session, &str, &str) -> Option<bool> + Send + Sync>;

#[derive(Clone)]
pub struct PermissionPolicy {
    pub rules: Vec<PermissionRule>,
    pub default: DefaultDecision,
    pub custom_check: Option<CustomCheck>,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default: DefaultDecision::Allow,
            custom_check: None,
        }
    }
}

impl PermissionPolicy {
    /// Full permission evaluation for an authenticated session (spec
    /// §4.2 step 5 and §4.9's evaluation order).
    ///
    /// 1. Tier gate — only applied when the session holds a built-in
    ///    admin/write/read role.
    /// 2. Custom predicate, if configured and authoritative.
    /// 3. Declarative rules, first match wins.
    /// 4. Configured default.
    pub fn check(&self, session: &Session, operation: &str, resource: &str) -> bool {
        if let Some(session_tier) = highest_builtin_tier(&session.roles) {
            if session_tier < operation_tier(operation) {
                return false;
            }
        }

        if let Some(check) = &self.custom_check {
            if let Some(decision) = check(session, operation, resource) {
                return decision;
            }
        }

        for rule in &self.rules {
            if session.has_role(&rule.role)
                && rule.matches_operation(operation)
                && rule.matches_resource(operation, resource)
            {
                return true;
            }
        }

        self.default == DefaultDecision::Allow
    }
}

/// Extract the resource used for permission matching per spec §4.2.
pub fn extract_resource(
    operation: &str,
    payload: &serde_json::Map<String, serde_json::Value>,
) -> String {
    if operation == "store.subscribe" {
        return payload
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or("*")
            .to_string();
    }
    if operation == "store.unsubscribe" {
        return payload
            .get("subscriptionId")
            .and_then(|v| v.as_str())
            .unwrap_or("*")
            .to_string();
    }
    if operation.starts_with("store.") {
        return payload
            .get("bucket")
            .and_then(|v| v.as_str())
            .unwrap_or("*")
            .to_string();
    }
    if operation.starts_with("rules.") {
        for field in ["topic", "key", "pattern"] {
            if let Some(v) = payload.get(field).and_then(|v| v.as_str()) {
                return v.to_string();
            }
        }
        return "*".to_string();
    }
    "*".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session_with(roles: &[&str]) -> Session {
        Session::new("u1", roles.iter().map(|r| r.to_string()).collect())
    }

    #[test]
    fn tier_table_is_closed_correctly() {
        assert_eq!(operation_tier("store.defineQuery"), Tier::Admin);
        assert_eq!(operation_tier("store.insert"), Tier::Write);
        assert_eq!(operation_tier("store.get"), Tier::Read);
        assert_eq!(operation_tier("store.subscribe"), Tier::Read);
        assert_eq!(operation_tier("rules.emit"), Tier::Write);
        assert_eq!(operation_tier("server.stats"), Tier::Admin);
    }

    #[test]
    fn read_role_cannot_write() {
        let policy = PermissionPolicy::default();
        let session = session_with(&["read"]);
        assert!(!policy.check(&session, "store.insert", "users"));
        assert!(policy.check(&session, "store.get", "users"));
    }

    #[test]
    fn admin_role_passes_every_tier() {
        let policy = PermissionPolicy::default();
        let session = session_with(&["admin"]);
        assert!(policy.check(&session, "store.defineQuery", "*"));
        assert!(policy.check(&session, "store.insert", "users"));
        assert!(policy.check(&session, "store.get", "users"));
    }

    #[test]
    fn no_builtin_role_skips_tier_check_and_uses_rules() {
        let policy = PermissionPolicy {
            rules: vec![PermissionRule {
                role: "editor".into(),
                allow: vec!["store.*".into()],
                buckets: Some(vec!["posts".into()]),
                topics: None,
            }],
            default: DefaultDecision::Deny,
            custom_check: None,
        };
        let session = session_with(&["editor"]);
        assert!(policy.check(&session, "store.insert", "posts"));
        assert!(!policy.check(&session, "store.insert", "users"));
    }

    #[test]
    fn default_deny_rejects_unmatched() {
        let policy = PermissionPolicy {
            rules: vec![],
            default: DefaultDecision::Deny,
            custom_check: None,
        };
        let session = session_with(&["guest"]);
        assert!(!policy.check(&session, "store.get", "users"));
    }

    #[test]
    fn custom_check_is_authoritative_when_some() {
        let policy = PermissionPolicy {
            rules: vec![],
            default: DefaultDecision::Allow,
            custom_check: Some(std::sync::Arc::new(|_s, op, _r| {
                if op == "store.delete" {
                    Some(false)
                } else {
                    None
                }
            })),
        };
        let session = session_with(&["admin"]);
        assert!(!policy.check(&session, "store.delete", "users"));
        assert!(policy.check(&session, "store.get", "users"));
    }

    #[test]
    fn extract_resource_rules() {
        let payload = json!({"query": "all-users"}).as_object().unwrap().clone();
        assert_eq!(extract_resource("store.subscribe", &payload), "all-users");

        let payload = json!({"subscriptionId": "sub-1"}).as_object().unwrap().clone();
        assert_eq!(extract_resource("store.unsubscribe", &payload), "sub-1");

        let payload = json!({"bucket": "users"}).as_object().unwrap().clone();
        assert_eq!(extract_resource("store.get", &payload), "users");

        let payload = json!({"topic": "orders.created"}).as_object().unwrap().clone();
        assert_eq!(extract_resource("rules.emit", &payload), "orders.created");

        let payload = serde_json::Map::new();
        assert_eq!(extract_resource("auth.logout", &payload), "*");
    }
}
