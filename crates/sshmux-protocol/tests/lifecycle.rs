//! Integration test: a client's full JSON-RPC conversation with the
//! dispatcher, end to end, without a live SSH server.
//!
//! Tests: initialize -> tools/list -> tools/call validation errors
//!        -> tools/call against a missing connection -> ssh_list_connections
//!        -> ssh_disconnect on an unknown handle -> malformed request framing

use sshmux_pool::Pool;
use sshmux_protocol::Dispatcher;
use std::time::Duration;

fn setup() -> Dispatcher {
    let pool = Pool::new(5, Duration::from_secs(60));
    Dispatcher::new(pool, "sshmux-mcp-server-test", true)
}

#[tokio::test]
async fn test_full_conversation() {
    let dispatcher = setup();

    // ── 1. initialize ───────────────────────────────────────
    let resp = dispatcher
        .handle_request(serde_json::json!({"jsonrpc": "2.0", "method": "initialize", "id": 1}))
        .await;
    assert_eq!(resp["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(resp["result"]["serverInfo"]["name"], "sshmux-mcp-server-test");

    // ── 2. tools/list advertises the full catalogue ─────────
    let resp = dispatcher
        .handle_request(serde_json::json!({"jsonrpc": "2.0", "method": "tools/list", "id": 2}))
        .await;
    let tools = resp["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 7);
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"ssh_connect"));
    assert!(names.contains(&"ssh_list_connections"));

    // ── 3. tools/call with a missing required parameter ─────
    let resp = dispatcher
        .handle_request(serde_json::json!({
            "jsonrpc": "2.0", "method": "tools/call", "id": 3,
            "params": {"name": "ssh_connect", "arguments": {"hostname": "example.com"}}
        }))
        .await;
    assert_eq!(resp["error"]["code"], -32000);

    // ── 4. tools/call against a connection that doesn't exist ─
    let resp = dispatcher
        .handle_request(serde_json::json!({
            "jsonrpc": "2.0", "method": "tools/call", "id": 4,
            "params": {"name": "ssh_execute", "arguments": {"connection_id": "nope", "command": "ls"}}
        }))
        .await;
    // A runtime tool fault surfaces through the JSON-RPC error channel, not a
    // success envelope with an embedded failure.
    assert!(resp.get("result").is_none());
    assert_eq!(resp["error"]["code"], -32000);
    assert!(resp["error"]["message"].as_str().unwrap().to_lowercase().contains("not found"));

    // ── 5. ssh_list_connections on an empty pool ─────────────
    let resp = dispatcher
        .handle_request(serde_json::json!({
            "jsonrpc": "2.0", "method": "tools/call", "id": 5,
            "params": {"name": "ssh_list_connections", "arguments": {}}
        }))
        .await;
    let content: serde_json::Value =
        serde_json::from_str(resp["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(content["data"]["total"], 0);

    // ── 6. ssh_disconnect on an unknown handle ───────────────
    let resp = dispatcher
        .handle_request(serde_json::json!({
            "jsonrpc": "2.0", "method": "tools/call", "id": 6,
            "params": {"name": "ssh_disconnect", "arguments": {"connection_id": "ghost"}}
        }))
        .await;
    assert!(resp.get("result").is_none());
    assert_eq!(resp["error"]["code"], -32000);

    // ── 7. malformed line framing still returns a response ──
    let resp = dispatcher.handle_line("not json at all").await;
    assert_eq!(resp["error"]["code"], -32700);
    assert_eq!(resp["id"], serde_json::Value::Null);

    assert_eq!(dispatcher.request_count(), 6);
}

#[tokio::test]
async fn test_unexpected_parameter_is_rejected_before_reaching_the_pool() {
    let dispatcher = setup();
    let resp = dispatcher
        .handle_request(serde_json::json!({
            "jsonrpc": "2.0", "method": "tools/call", "id": 1,
            "params": {
                "name": "ssh_list_connections",
                "arguments": {"unexpected_field": true}
            }
        }))
        .await;
    assert_eq!(resp["error"]["code"], -32000);
    assert!(resp["error"]["message"].as_str().unwrap().contains("Unexpected parameters"));
}
