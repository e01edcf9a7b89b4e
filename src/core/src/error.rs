use gateway_protocol::error_codes;
use serde_json::Value;
use thiserror::Error;

/// Internal error type returned by handlers. Translated at the router
/// boundary into the closed wire error-code set of spec §7 — only the
/// codec's own parse failures bypass this and short-circuit earlier.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    ValidationWithDetails(String, Value),
    #[error("bucket not defined: {0}")]
    BucketNotDefined(String),
    #[error("query not defined: {0}")]
    QueryNotDefined(String),
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("version conflict")]
    Conflict,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("rate limited")]
    RateLimited { retry_after_ms: u64 },
    #[error("subscription limit exceeded")]
    SubscriptionLimitExceeded,
    #[error("rules engine not configured")]
    RulesNotAvailable,
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::ValidationWithDetails(..) => error_codes::VALIDATION_ERROR,
            Self::BucketNotDefined(_) => error_codes::BUCKET_NOT_DEFINED,
            Self::QueryNotDefined(_) => error_codes::QUERY_NOT_DEFINED,
            Self::NotFound => error_codes::NOT_FOUND,
            Self::AlreadyExists => error_codes::ALREADY_EXISTS,
            Self::Conflict => error_codes::CONFLICT,
            Self::Unauthorized => error_codes::UNAUTHORIZED,
            Self::Forbidden => error_codes::FORBIDDEN,
            Self::RateLimited { .. } | Self::SubscriptionLimitExceeded => error_codes::RATE_LIMITED,
            Self::RulesNotAvailable => error_codes::RULES_NOT_AVAILABLE,
            Self::UnknownOperation(_) => error_codes::UNKNOWN_OPERATION,
            Self::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    /// Message surfaced to the client. `INTERNAL_ERROR` is always generic —
    /// the real cause only reaches the server's own logs.
    pub fn message(&self) -> String {
        match self {
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            Self::ValidationWithDetails(_, details) => Some(details.clone()),
            Self::RateLimited { retry_after_ms } => {
                Some(serde_json::json!({ "retryAfterMs": retry_after_ms }))
            }
            _ => None,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
