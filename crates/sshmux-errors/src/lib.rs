//! Typed error kinds, JSON-RPC error envelopes, and the sensitive-data redactor.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

/// The closed set of error kinds, each mapped to a stable wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ToolError,
    ConnectionError,
    AuthenticationError,
    TimeoutError,
    PermissionError,
    FileNotFoundError,
    CommandError,
}

impl ErrorKind {
    pub fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ToolError => -32000,
            Self::ConnectionError => -32001,
            Self::AuthenticationError => -32002,
            Self::TimeoutError => -32003,
            Self::PermissionError => -32004,
            Self::FileNotFoundError => -32005,
            Self::CommandError => -32007,
        }
    }
}

/// Keys whose values are always redacted, matched as a case-insensitive
/// substring of the field name (mirrors the source's sensitive-key set).
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "secret",
    "token",
    "key",
    "auth",
    "credential",
    "private_key",
    "ssh_key",
    "passphrase",
];

const REDACTED: &str = "[FILTERED]";

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|k| lower.contains(k))
}

fn kv_pattern() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = SENSITIVE_KEYS.join("|");
        regex::Regex::new(&format!(r"(?i)\b(\w*(?:{alternation})\w*)\s*=\s*(\S+)")).unwrap()
    })
}

/// Replace any `key=value` occurrence where `key` matches the sensitive set.
pub fn sanitize_message(message: &str) -> String {
    kv_pattern()
        .replace_all(message, |caps: &regex::Captures| {
            format!("{}={}", &caps[1], REDACTED)
        })
        .into_owned()
}

/// Recursively walk a JSON value, replacing any object value whose key
/// matches the sensitive set with the literal `"[FILTERED]"`. Also sanitizes
/// embedded strings with [`sanitize_message`].
pub fn redact_data(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if is_sensitive_key(&k) {
                    out.insert(k, Value::String(REDACTED.to_string()));
                } else {
                    out.insert(k, redact_data(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(redact_data).collect()),
        Value::String(s) => Value::String(sanitize_message(&s)),
        other => other,
    }
}

/// A fully-redacted, wire-ready MCP error.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct McpError {
    pub kind: ErrorKind,
    pub message: String,
    pub data: Option<Value>,
}

impl McpError {
    /// Construct a new error, redacting `message` and `data` immediately —
    /// redaction happens at construction, not at serialization, so the
    /// in-memory value is already safe to log or forward.
    pub fn new(kind: ErrorKind, message: impl Into<String>, data: Option<Value>) -> Self {
        let message = sanitize_message(&message.into());
        let data = data.map(redact_data);
        Self { kind, message, data }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, message, None)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message, None)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorKind::MethodNotFound,
            format!("Unknown method or tool '{method}'"),
            None,
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message, None)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message, None)
    }

    pub fn tool_error(message: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(ErrorKind::ToolError, message, data)
    }

    pub fn connection_error(message: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(ErrorKind::ConnectionError, message, data)
    }

    pub fn authentication_error(message: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(ErrorKind::AuthenticationError, message, data)
    }

    pub fn timeout_error(message: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(ErrorKind::TimeoutError, message, data)
    }

    pub fn permission_error(message: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(ErrorKind::PermissionError, message, data)
    }

    pub fn file_not_found(message: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(ErrorKind::FileNotFoundError, message, data)
    }

    pub fn command_error(message: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(ErrorKind::CommandError, message, data)
    }

    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    /// Render a JSON-RPC `error` object: `{code, message, data?}`.
    pub fn to_rpc_object(&self, debug: bool) -> Value {
        let message = self.user_message(debug);
        let mut obj = serde_json::json!({
            "code": self.code(),
            "message": message,
        });
        if let Some(data) = &self.data {
            obj["data"] = data.clone();
        }
        obj
    }

    /// Two rendering modes: `debug=false` maps known failure substrings to
    /// actionable guidance; `debug=true` preserves the (already-redacted) raw
    /// text.
    pub fn user_message(&self, debug: bool) -> String {
        if debug {
            return self.message.clone();
        }
        friendly_message(self.kind, &self.message)
    }
}

fn friendly_message(kind: ErrorKind, raw: &str) -> String {
    let lower = raw.to_lowercase();
    let hints: &[(&str, &str)] = &[
        ("refused", "The remote host refused the connection. Check the hostname and port."),
        ("timeout", "The operation timed out. The remote host may be unreachable or slow."),
        ("unreachable", "The remote host is unreachable. Check network connectivity."),
        ("not found", "The requested resource was not found."),
        ("permission", "Permission was denied by the remote host."),
    ];
    for (needle, hint) in hints {
        if lower.contains(needle) {
            return hint.to_string();
        }
    }
    match kind {
        ErrorKind::AuthenticationError => "Authentication failed. Check your credentials.".to_string(),
        ErrorKind::ConnectionError => "Could not establish or maintain the connection.".to_string(),
        _ => raw.to_string(),
    }
}

/// Request-counting / metadata map carried alongside a handler result.
pub type ErrorData = HashMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_closed_table() {
        assert_eq!(ErrorKind::ParseError.code(), -32700);
        assert_eq!(ErrorKind::InvalidRequest.code(), -32600);
        assert_eq!(ErrorKind::MethodNotFound.code(), -32601);
        assert_eq!(ErrorKind::InvalidParams.code(), -32602);
        assert_eq!(ErrorKind::InternalError.code(), -32603);
        assert_eq!(ErrorKind::ToolError.code(), -32000);
        assert_eq!(ErrorKind::ConnectionError.code(), -32001);
        assert_eq!(ErrorKind::AuthenticationError.code(), -32002);
        assert_eq!(ErrorKind::TimeoutError.code(), -32003);
        assert_eq!(ErrorKind::PermissionError.code(), -32004);
        assert_eq!(ErrorKind::FileNotFoundError.code(), -32005);
        assert_eq!(ErrorKind::CommandError.code(), -32007);
    }

    #[test]
    fn redacts_sensitive_keys_in_message() {
        let msg = sanitize_message("auth failed: password=s3cret host=example.com");
        assert!(!msg.contains("s3cret"));
        assert!(msg.contains("password=[FILTERED]"));
        assert!(msg.contains("host=example.com"));
    }

    #[test]
    fn redacts_sensitive_keys_in_structured_data() {
        let data = serde_json::json!({
            "hostname": "example.com",
            "password": "s3cret",
            "nested": { "ssh_key": "----BEGIN----" }
        });
        let redacted = redact_data(data);
        assert_eq!(redacted["password"], "[FILTERED]");
        assert_eq!(redacted["nested"]["ssh_key"], "[FILTERED]");
        assert_eq!(redacted["hostname"], "example.com");
    }

    #[test]
    fn mcp_error_redacts_at_construction() {
        let err = McpError::authentication_error(
            "rejected: password=hunter2",
            Some(serde_json::json!({"password": "hunter2"})),
        );
        assert!(!err.message.contains("hunter2"));
        assert_eq!(err.data.unwrap()["password"], "[FILTERED]");
    }

    #[test]
    fn user_message_maps_known_substrings_in_friendly_mode() {
        let err = McpError::connection_error("Connection timeout after 30s", None);
        assert!(err.user_message(false).contains("timed out"));
        assert!(err.user_message(true).contains("timeout"));
    }

    #[test]
    fn to_rpc_object_carries_code_and_data() {
        let err = McpError::invalid_params("Required parameter 'username'");
        let obj = err.to_rpc_object(true);
        assert_eq!(obj["code"], -32602);
    }
}
