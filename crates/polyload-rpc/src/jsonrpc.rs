//! JSON-RPC 2.0 framing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An outgoing request.
#[derive(Debug, Clone, Serialize)]
pub struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> Request<'a> {
    #[must_use]
    pub fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// `params` of a subscription notification.
#[derive(Debug, Clone, Deserialize)]
struct NotificationParams {
    subscription: Value,
    #[serde(default)]
    result: Value,
}

/// Superset of every message a node may send.
#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<NotificationParams>,
}

/// A classified incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Answer to request `id`.
    Response {
        id: u64,
        result: Result<Value, ErrorObject>,
    },
    /// Push for an active subscription.
    Notification {
        method: String,
        subscription: String,
        result: Value,
    },
}

/// Subscription ids are strings on most nodes, numbers on some.
#[must_use]
pub fn subscription_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse and classify one text frame.
///
/// # Errors
/// Returns a description when the frame is not JSON-RPC.
pub fn classify(text: &str) -> Result<Incoming, String> {
    let raw: RawMessage = serde_json::from_str(text).map_err(|e| e.to_string())?;
    if let (Some(method), Some(params)) = (raw.method, raw.params) {
        return Ok(Incoming::Notification {
            method,
            subscription: subscription_key(&params.subscription),
            result: params.result,
        });
    }
    let id = raw
        .id
        .as_ref()
        .and_then(Value::as_u64)
        .ok_or_else(|| format!("message without numeric id: {text}"))?;
    let result = match raw.error {
        Some(err) => Err(err),
        None => Ok(raw.result.unwrap_or(Value::Null)),
    };
    Ok(Incoming::Response { id, result })
}
