//! Request parsing, method routing, and response framing.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use sshmux_errors::McpError;
use sshmux_pool::Pool;

use crate::catalogue;
use crate::handlers;
use crate::schema::{self, ToolSpec};

const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct Dispatcher {
    pool: Pool,
    tools: Vec<ToolSpec>,
    server_name: String,
    debug: bool,
    request_count: AtomicU64,
}

impl Dispatcher {
    pub fn new(pool: Pool, server_name: impl Into<String>, debug: bool) -> Self {
        Self {
            pool,
            tools: catalogue::tools(),
            server_name: server_name.into(),
            debug,
            request_count: AtomicU64::new(0),
        }
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Parses a single line of input (one JSON object) and dispatches it.
    /// A parse failure is reported with `id: null`.
    pub async fn handle_line(&self, line: &str) -> Value {
        match serde_json::from_str::<Value>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => error_response(Value::Null, &McpError::parse_error(e.to_string()), self.debug),
        }
    }

    pub async fn handle_request(&self, request: Value) -> Value {
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let id = request.get("id").cloned().unwrap_or(Value::Null);

        let jsonrpc_ok = request.get("jsonrpc").and_then(Value::as_str) == Some("2.0");
        if !jsonrpc_ok {
            return error_response(id, &McpError::invalid_request("Missing or invalid 'jsonrpc' field"), self.debug);
        }

        let method = match request.get("method").and_then(Value::as_str) {
            Some(m) => m,
            None => {
                return error_response(id, &McpError::invalid_request("Missing 'method' field"), self.debug);
            }
        };

        let params = request.get("params").cloned().unwrap_or(Value::Object(Default::default()));

        let result = match method {
            "initialize" => Ok(self.handle_initialize()),
            "tools/list" => Ok(self.handle_tools_list()),
            "tools/call" => self.handle_tools_call(&params).await,
            other => Err(McpError::method_not_found(other)),
        };

        match result {
            Ok(value) => success_response(id, value),
            Err(e) => error_response(id, &e, self.debug),
        }
    }

    fn handle_initialize(&self) -> Value {
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": { "name": self.server_name, "version": env!("CARGO_PKG_VERSION") },
        })
    }

    fn handle_tools_list(&self) -> Value {
        serde_json::json!({
            "tools": self.tools.iter().map(ToolSpec::to_schema).collect::<Vec<_>>(),
        })
    }

    async fn handle_tools_call(&self, params: &Value) -> Result<Value, McpError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::invalid_params("params.name is required"))?;
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Object(Default::default()));

        let tool = catalogue::find_in(&self.tools, name).ok_or_else(|| McpError::method_not_found(name))?;
        let validated = schema::validate(tool, &arguments)?;

        let tool_result = handlers::dispatch(&self.pool, name, &validated).await?;

        Ok(serde_json::json!({
            "content": [{
                "type": "text",
                "text": serde_json::to_string(&tool_result).unwrap_or_else(|_| "{}".to_string()),
            }]
        }))
    }
}

fn success_response(id: Value, result: Value) -> Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Value, error: &McpError, debug: bool) -> Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "error": error.to_rpc_object(debug) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Pool::new(10, Duration::from_secs(60)), "sshmux-mcp-server", true)
    }

    #[tokio::test]
    async fn unknown_method_maps_to_method_not_found() {
        let d = dispatcher();
        let resp = d
            .handle_request(serde_json::json!({"jsonrpc":"2.0","method":"nope","id":1}))
            .await;
        assert_eq!(resp["error"]["code"], -32601);
        assert_eq!(resp["id"], 1);
    }

    #[tokio::test]
    async fn parse_error_has_null_id() {
        let d = dispatcher();
        let resp = d.handle_line("{not json}").await;
        assert_eq!(resp["error"]["code"], -32700);
        assert_eq!(resp["id"], Value::Null);
    }

    #[tokio::test]
    async fn missing_jsonrpc_is_invalid_request() {
        let d = dispatcher();
        let resp = d.handle_request(serde_json::json!({"method":"initialize","id":1})).await;
        assert_eq!(resp["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn unknown_tool_in_tools_call_is_method_not_found() {
        let d = dispatcher();
        let resp = d
            .handle_request(serde_json::json!({
                "jsonrpc":"2.0","method":"tools/call","id":2,
                "params":{"name":"ssh_teleport","arguments":{}}
            }))
            .await;
        assert_eq!(resp["error"]["code"], -32601);
        assert!(resp["error"]["message"].as_str().unwrap().contains("ssh_teleport"));
    }

    #[tokio::test]
    async fn missing_required_param_maps_to_invalid_params_code() {
        let d = dispatcher();
        let resp = d
            .handle_request(serde_json::json!({
                "jsonrpc":"2.0","method":"tools/call","id":3,
                "params":{"name":"ssh_connect","arguments":{"hostname":"h"}}
            }))
            .await;
        assert_eq!(resp["error"]["code"], -32000);
        assert!(resp["error"]["message"].as_str().unwrap().contains("Required parameter 'username'"));
    }

    #[tokio::test]
    async fn tools_list_advertises_all_seven_tools() {
        let d = dispatcher();
        let resp = d.handle_request(serde_json::json!({"jsonrpc":"2.0","method":"tools/list","id":4})).await;
        assert_eq!(resp["result"]["tools"].as_array().unwrap().len(), 7);
    }

    #[tokio::test]
    async fn runtime_tool_fault_surfaces_as_jsonrpc_error_not_a_success_envelope() {
        let d = dispatcher();
        let resp = d
            .handle_request(serde_json::json!({
                "jsonrpc":"2.0","method":"tools/call","id":5,
                "params":{"name":"ssh_disconnect","arguments":{"connection_id":"ghost"}}
            }))
            .await;
        assert!(resp.get("result").is_none());
        assert_eq!(resp["error"]["code"], -32000);
        assert!(resp["error"]["message"].as_str().unwrap().to_lowercase().contains("not found"));
    }

    #[tokio::test]
    async fn response_echoes_request_id_verbatim() {
        let d = dispatcher();
        let resp = d.handle_request(serde_json::json!({"jsonrpc":"2.0","method":"tools/list","id":"abc"})).await;
        assert_eq!(resp["id"], "abc");
    }
}
