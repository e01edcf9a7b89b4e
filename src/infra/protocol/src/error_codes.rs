//! The closed error-code vocabulary of the wire protocol (spec §7).
//!
//! These are string constants rather than an enum because they travel
//! verbatim as the `code` field of an error envelope and callers outside
//! this crate (the router, tests) match on them by value.

pub const PARSE_ERROR: &str = "PARSE_ERROR";
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
pub const UNKNOWN_OPERATION: &str = "UNKNOWN_OPERATION";
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const BUCKET_NOT_DEFINED: &str = "BUCKET_NOT_DEFINED";
pub const QUERY_NOT_DEFINED: &str = "QUERY_NOT_DEFINED";
pub const NOT_FOUND: &str = "NOT_FOUND";
pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
pub const CONFLICT: &str = "CONFLICT";
pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
pub const FORBIDDEN: &str = "FORBIDDEN";
pub const RATE_LIMITED: &str = "RATE_LIMITED";
pub const RULES_NOT_AVAILABLE: &str = "RULES_NOT_AVAILABLE";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
