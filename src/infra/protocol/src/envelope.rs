use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A decoded, not-yet-routed client request.
///
/// `id` is opaque to the server: it is whatever JSON number the client
/// sent (integer, negative, fractional, or zero) and is echoed back
/// verbatim in the response. The server never inspects or generates it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRequest {
    pub id: Value,
    pub kind: String,
    pub payload: Map<String, Value>,
}

impl ParsedRequest {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }
}

/// Outcome of decoding a single inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Request(ParsedRequest),
    Pong { timestamp: f64 },
    Error { id: Value, code: &'static str, message: String },
}

/// A server → client RPC response. Always carries the request's `id`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFrame {
    Result { id: Value, data: Value },
    Error {
        id: Value,
        code: &'static str,
        message: String,
        details: Option<Value>,
    },
}

impl ResponseFrame {
    pub fn result(id: Value, data: Value) -> Self {
        Self::Result { id, data }
    }

    pub fn error(id: Value, code: &'static str, message: impl Into<String>) -> Self {
        Self::Error {
            id,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn error_with_details(
        id: Value,
        code: &'static str,
        message: impl Into<String>,
        details: Value,
    ) -> Self {
        Self::Error {
            id,
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn to_json(&self, expose_details: bool) -> Value {
        match self {
            Self::Result { id, data } => serde_json::json!({
                "id": id,
                "type": "result",
                "data": data,
            }),
            Self::Error {
                id,
                code,
                message,
                details,
            } => {
                let mut obj = serde_json::Map::new();
                obj.insert("id".into(), id.clone());
                obj.insert("type".into(), Value::String("error".into()));
                obj.insert("code".into(), Value::String((*code).into()));
                obj.insert("message".into(), Value::String(message.clone()));
                if expose_details {
                    if let Some(d) = details {
                        obj.insert("details".into(), d.clone());
                    }
                }
                Value::Object(obj)
            }
        }
    }
}

/// A server-initiated push for a live subscription. Carries no `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct PushFrame {
    pub channel: PushChannel,
    pub subscription_id: String,
    pub data: Value,
}

/// The two push channels named in the spec: reactive query results and
/// rule-engine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushChannel {
    #[serde(rename = "subscription")]
    Subscription,
    #[serde(rename = "event")]
    Event,
}

impl PushChannel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Subscription => "subscription",
            Self::Event => "event",
        }
    }
}

impl PushFrame {
    pub fn new(channel: PushChannel, subscription_id: String, data: Value) -> Self {
        Self {
            channel,
            subscription_id,
            data,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "type": "push",
            "channel": self.channel.as_str(),
            "subscriptionId": self.subscription_id,
            "data": self.data,
        })
    }
}

/// Server-initiated frames outside the request/response/push trio:
/// the post-connect welcome, heartbeat pings, and the shutdown notice.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemFrame {
    Welcome {
        version: &'static str,
        server_time: i64,
        requires_auth: bool,
    },
    Ping {
        timestamp: i64,
    },
    Shutdown {
        grace_period_ms: u64,
    },
}

impl SystemFrame {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Welcome {
                version,
                server_time,
                requires_auth,
            } => serde_json::json!({
                "type": "welcome",
                "version": version,
                "serverTime": server_time,
                "requiresAuth": requires_auth,
            }),
            Self::Ping { timestamp } => serde_json::json!({
                "type": "ping",
                "timestamp": timestamp,
            }),
            Self::Shutdown { grace_period_ms } => serde_json::json!({
                "type": "system",
                "event": "shutdown",
                "gracePeriodMs": grace_period_ms,
            }),
        }
    }
}
