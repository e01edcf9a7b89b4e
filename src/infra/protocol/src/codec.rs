use serde_json::{Map, Value};

use crate::envelope::{ParseOutcome, ParsedRequest};
use crate::error_codes;

/// Parse a single inbound text frame per spec §4.1.
///
/// Step order matters: `type` is checked before `id` only for the pong
/// shortcut; for ordinary requests, a missing `id` is reported before a
/// missing `type`.
pub fn parse_frame(raw: &str) -> ParseOutcome {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => {
            return ParseOutcome::Error {
                id: Value::from(0),
                code: error_codes::PARSE_ERROR,
                message: "invalid JSON".into(),
            }
        }
    };

    let obj: &Map<String, Value> = match value.as_object() {
        Some(o) => o,
        None => {
            return ParseOutcome::Error {
                id: Value::from(0),
                code: error_codes::PARSE_ERROR,
                message: "expected a JSON object".into(),
            }
        }
    };

    let id_value = obj.get("id").cloned();
    let echoed_id = match &id_value {
        Some(v) if v.is_number() => v.clone(),
        _ => Value::from(0),
    };

    if obj.get("type").and_then(Value::as_str) == Some("pong") {
        return match obj.get("timestamp").and_then(Value::as_f64) {
            Some(timestamp) => ParseOutcome::Pong { timestamp },
            None => ParseOutcome::Error {
                id: echoed_id,
                code: error_codes::INVALID_REQUEST,
                message: "pong requires a numeric timestamp".into(),
            },
        };
    }

    let id = match id_value {
        Some(v) if v.is_number() => v,
        _ => {
            return ParseOutcome::Error {
                id: echoed_id,
                code: error_codes::INVALID_REQUEST,
                message: "missing or non-numeric id".into(),
            }
        }
    };

    let kind = match obj.get("type").and_then(Value::as_str) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => {
            return ParseOutcome::Error {
                id,
                code: error_codes::INVALID_REQUEST,
                message: "missing or empty type".into(),
            }
        }
    };

    let mut payload = obj.clone();
    payload.remove("id");
    payload.remove("type");

    ParseOutcome::Request(ParsedRequest { id, kind, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_json_reports_id_zero() {
        let outcome = parse_frame("not json");
        match outcome {
            ParseOutcome::Error { id, code, .. } => {
                assert_eq!(id, Value::from(0));
                assert_eq!(code, error_codes::PARSE_ERROR);
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn non_object_root_is_parse_error() {
        let outcome = parse_frame("[1,2,3]");
        assert!(matches!(
            outcome,
            ParseOutcome::Error { code: error_codes::PARSE_ERROR, .. }
        ));
    }

    #[test]
    fn pong_requires_numeric_timestamp() {
        let outcome = parse_frame(r#"{"type":"pong","timestamp":"oops"}"#);
        assert!(matches!(
            outcome,
            ParseOutcome::Error { code: error_codes::INVALID_REQUEST, .. }
        ));
    }

    #[test]
    fn pong_is_recognized_before_id_check() {
        let outcome = parse_frame(r#"{"type":"pong","timestamp":123.5}"#);
        assert!(matches!(outcome, ParseOutcome::Pong { timestamp } if timestamp == 123.5));
    }

    #[test]
    fn missing_id_is_invalid_request() {
        let outcome = parse_frame(r#"{"type":"store.get"}"#);
        match outcome {
            ParseOutcome::Error { id, code, .. } => {
                assert_eq!(id, Value::from(0));
                assert_eq!(code, error_codes::INVALID_REQUEST);
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn missing_type_echoes_id() {
        let outcome = parse_frame(r#"{"id":7}"#);
        match outcome {
            ParseOutcome::Error { id, code, .. } => {
                assert_eq!(id, Value::from(7));
                assert_eq!(code, error_codes::INVALID_REQUEST);
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn empty_type_is_invalid() {
        let outcome = parse_frame(r#"{"id":1,"type":""}"#);
        assert!(matches!(
            outcome,
            ParseOutcome::Error { code: error_codes::INVALID_REQUEST, .. }
        ));
    }

    #[test]
    fn accepts_zero_negative_and_fractional_ids() {
        for id_literal in ["0", "-5", "1.5"] {
            let raw = format!(r#"{{"id":{id_literal},"type":"server.stats"}}"#);
            let outcome = parse_frame(&raw);
            assert!(matches!(outcome, ParseOutcome::Request(_)), "id {id_literal}");
        }
    }

    #[test]
    fn preserves_remaining_fields_as_payload() {
        let outcome = parse_frame(
            r#"{"id":1,"type":"store.insert","bucket":"users","data":{"name":"Alice"}}"#,
        );
        match outcome {
            ParseOutcome::Request(req) => {
                assert_eq!(req.kind, "store.insert");
                assert_eq!(req.str_field("bucket"), Some("users"));
                assert_eq!(req.field("data").unwrap()["name"], "Alice");
            }
            other => panic!("expected Request, got {other:?}"),
        }
    }
}
