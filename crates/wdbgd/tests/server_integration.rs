//! Integration tests for the JSON-lines tool server.
//!
//! A duplex pipe stands in for stdin/stdout; requests go in as lines and
//! responses are read back and matched by `id`.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.
//! We test the panic-free behavior of production code through assertions.

#![cfg(unix)]

mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::FakeDebugger;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use wdbgd::registry::{spawn_registry, RegistryHandle};
use wdbgd::server::{ServerError, ToolServer};
use wdbgd::tools::Tools;

// ============================================================================
// Test Helpers
// ============================================================================

struct TestClient {
    writer: tokio::io::WriteHalf<DuplexStream>,
    lines: Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>,
    server: JoinHandle<Result<(), ServerError>>,
    registry: RegistryHandle,
    cancel: CancellationToken,
}

impl TestClient {
    fn start(fake: &FakeDebugger) -> Self {
        let registry = spawn_registry(fake.registry_config());
        let tools = Tools::new(registry.clone(), Duration::from_secs(10));
        let cancel = CancellationToken::new();
        let server = ToolServer::new(tools, cancel.clone());

        let (client_side, server_side) = tokio::io::duplex(1 << 20);
        let (server_read, server_write) = tokio::io::split(server_side);
        let server = tokio::spawn(async move {
            server.run(BufReader::new(server_read), server_write).await
        });

        let (client_read, client_write) = tokio::io::split(client_side);
        Self {
            writer: client_write,
            lines: BufReader::new(client_read).lines(),
            server,
            registry,
            cancel,
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.send_bytes(line.as_bytes()).await;
    }

    async fn send_bytes(&mut self, line: &[u8]) {
        self.writer.write_all(line).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn send(&mut self, request: Value) {
        self.send_raw(&request.to_string()).await;
    }

    async fn recv(&mut self) -> Value {
        let line = timeout(Duration::from_secs(20), self.lines.next_line())
            .await
            .expect("response within timeout")
            .unwrap()
            .expect("server closed output");
        serde_json::from_str(&line).unwrap()
    }

    async fn call(&mut self, request: Value) -> Value {
        self.send(request).await;
        self.recv().await
    }

    async fn finish(mut self) {
        self.writer.shutdown().await.unwrap();
        drop(self.writer);
        let result = timeout(Duration::from_secs(10), self.server)
            .await
            .expect("server stops at end of input")
            .unwrap();
        assert!(result.is_ok());
        self.registry.shutdown().await;
    }
}

// ============================================================================
// Protocol
// ============================================================================

#[tokio::test]
async fn test_ping_pong() {
    let fake = FakeDebugger::new();
    let mut client = TestClient::start(&fake);

    let response = client.call(json!({"id": 1, "tool": "ping", "seq": 42})).await;
    assert_eq!(response, json!({"type": "pong", "id": 1, "seq": 42}));

    client.finish().await;
}

#[tokio::test]
async fn test_malformed_lines_get_error_responses() {
    let fake = FakeDebugger::new();
    let mut client = TestClient::start(&fake);

    client.send_raw("this is not json").await;
    let response = client.recv().await;
    assert_eq!(response["type"], "error");
    assert_eq!(response["kind"], "protocol");
    assert!(response.get("id").is_none());

    let response = client.call(json!({"id": 7, "tool": "no_such_tool"})).await;
    assert_eq!(response["type"], "error");
    assert_eq!(response["id"], 7);

    // Still serving after bad input.
    let response = client.call(json!({"id": 8, "tool": "list_sessions"})).await;
    assert_eq!(response["type"], "result");

    client.finish().await;
}

#[tokio::test]
async fn test_invalid_utf8_line_is_rejected_not_fatal() {
    let fake = FakeDebugger::new();
    let mut client = TestClient::start(&fake);

    client
        .send_bytes(b"{\"id\":1,\"tool\":\"ping\",\"seq\":1,\"x\":\"\xff\"}")
        .await;
    let response = client.recv().await;
    assert_eq!(response["type"], "error");
    assert_eq!(response["kind"], "protocol");

    let response = client.call(json!({"id": 2, "tool": "ping", "seq": 2})).await;
    assert_eq!(response, json!({"type": "pong", "id": 2, "seq": 2}));

    client.finish().await;
}

#[tokio::test]
async fn test_cancellation_stops_server() {
    let fake = FakeDebugger::new();
    let client = TestClient::start(&fake);

    client.cancel.cancel();
    let result = timeout(Duration::from_secs(5), client.server)
        .await
        .expect("server stops on cancel")
        .unwrap();
    assert!(result.is_ok());
    client.registry.shutdown().await;
}

// ============================================================================
// Tools
// ============================================================================

#[tokio::test]
async fn test_dump_analysis_workflow() {
    let fake = FakeDebugger::new();
    let dump = fake.dump("crash.dmp");
    let dump_str = dump.display().to_string();
    let mut client = TestClient::start(&fake);

    let response = client
        .call(json!({
            "id": 1,
            "tool": "open_dump_analysis",
            "dump_path": dump_str,
            "include_modules": false,
        }))
        .await;
    assert_eq!(response["type"], "result", "response: {response}");
    let text = response["output"]["text"].as_str().unwrap();
    assert!(text.contains("### Crash Information"));
    assert!(text.contains("### Crash Analysis"));
    assert!(text.contains("FAULTING_IP"));
    assert!(text.contains("### Stack Trace"));
    assert!(!text.contains("### Loaded Modules"));
    assert!(text.contains("### Threads"));
    assert!(!text.contains("0:000>"));
    let key = response["output"]["session"].as_str().unwrap().to_string();

    let response = client
        .call(json!({"id": 2, "tool": "run_command", "dump_path": dump_str, "command": "dt foo"}))
        .await;
    assert_eq!(response["output"]["status"], "completed");
    assert!(response["output"]["text"]
        .as_str()
        .unwrap()
        .contains("output for dt foo"));
    assert_eq!(fake.spawn_count(), 1, "run_command reuses the open session");

    let response = client.call(json!({"id": 3, "tool": "list_sessions"})).await;
    let sessions = response["output"]["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["key"], key.as_str());
    assert_eq!(sessions[0]["state"], "ready");

    let response = client
        .call(json!({"id": 4, "tool": "close_session", "session": key}))
        .await;
    assert!(response["output"]["text"]
        .as_str()
        .unwrap()
        .starts_with("Closed session"));

    let response = client
        .call(json!({"id": 5, "tool": "close_session", "session": key}))
        .await;
    assert_eq!(response["type"], "result");
    assert!(response["output"]["text"]
        .as_str()
        .unwrap()
        .starts_with("No active session"));

    client.finish().await;
}

#[tokio::test]
async fn test_run_command_on_missing_attach_session() {
    let fake = FakeDebugger::new();
    let mut client = TestClient::start(&fake);

    let response = client
        .call(json!({"id": 1, "tool": "run_command", "session": "attach:999", "command": "k"}))
        .await;
    assert_eq!(response["type"], "error");
    assert_eq!(response["kind"], "session_closed");
    assert_eq!(fake.spawn_count(), 0);

    client.finish().await;
}

#[tokio::test]
async fn test_missing_dump_is_session_open_error() {
    let fake = FakeDebugger::new();
    let missing = fake.path().join("nope.dmp").display().to_string();
    let mut client = TestClient::start(&fake);

    let response = client
        .call(json!({"id": 1, "tool": "run_command", "dump_path": missing, "command": "k"}))
        .await;
    assert_eq!(response["type"], "error");
    assert_eq!(response["kind"], "session_open");

    client.finish().await;
}

#[tokio::test]
async fn test_slow_call_does_not_block_other_sessions() {
    let fake = FakeDebugger::new();
    let a = fake.dump("a.dmp").display().to_string();
    let b = fake.dump("b.dmp").display().to_string();
    let mut client = TestClient::start(&fake);

    // Warm both sessions.
    client
        .call(json!({"id": 1, "tool": "run_command", "dump_path": a, "command": "r"}))
        .await;
    client
        .call(json!({"id": 2, "tool": "run_command", "dump_path": b, "command": "r"}))
        .await;

    client
        .send(json!({"id": 10, "tool": "run_command", "dump_path": a, "command": "slow"}))
        .await;
    client
        .send(json!({"id": 11, "tool": "run_command", "dump_path": b, "command": "kb"}))
        .await;

    let first = client.recv().await;
    assert_eq!(first["id"], 11, "fast call answers first");

    let second = client.recv().await;
    assert_eq!(second["id"], 10);
    assert!(second["output"]["text"].as_str().unwrap().contains("slow done"));

    client.finish().await;
}

#[tokio::test]
async fn test_busy_session_rejects_second_command() {
    let fake = FakeDebugger::new();
    let dump = fake.dump("crash.dmp").display().to_string();
    let mut client = TestClient::start(&fake);

    client
        .call(json!({"id": 1, "tool": "run_command", "dump_path": dump, "command": "r"}))
        .await;

    client
        .send(json!({"id": 2, "tool": "run_command", "dump_path": dump, "command": "slow"}))
        .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    client
        .send(json!({"id": 3, "tool": "run_command", "dump_path": dump, "command": "kb"}))
        .await;

    let mut responses = HashMap::new();
    for _ in 0..2 {
        let response = client.recv().await;
        responses.insert(response["id"].as_u64().unwrap(), response);
    }
    assert_eq!(responses[&3]["type"], "error");
    assert_eq!(responses[&3]["kind"], "session_busy");
    assert_eq!(responses[&2]["output"]["status"], "completed");

    client.finish().await;
}

#[tokio::test]
async fn test_command_timeout_reported() {
    let fake = FakeDebugger::new();
    let dump = fake.dump("crash.dmp").display().to_string();
    let mut client = TestClient::start(&fake);

    client
        .call(json!({"id": 1, "tool": "run_command", "dump_path": dump, "command": "r"}))
        .await;
    let response = client
        .call(json!({
            "id": 2,
            "tool": "run_command",
            "dump_path": dump,
            "command": "slow",
            "timeout_secs": 1,
        }))
        .await;
    assert_eq!(response["type"], "result");
    assert_eq!(response["output"]["status"], "timed_out");
    assert_eq!(response["output"]["is_error"], true);

    client.finish().await;
}

#[tokio::test]
async fn test_huge_timeout_still_answers() {
    let fake = FakeDebugger::new();
    let dump = fake.dump("crash.dmp").display().to_string();
    let mut client = TestClient::start(&fake);

    let response = client
        .call(json!({
            "id": 1,
            "tool": "run_command",
            "dump_path": dump,
            "command": "r",
            "timeout_secs": u64::MAX,
        }))
        .await;
    assert_eq!(response["type"], "result", "response: {response}");
    assert_eq!(response["output"]["status"], "completed");

    let response = client
        .call(json!({"id": 2, "tool": "run_command", "dump_path": dump, "command": "kb"}))
        .await;
    assert_eq!(response["output"]["status"], "completed");

    client.finish().await;
}

#[tokio::test]
async fn test_list_dumps() {
    let fake = FakeDebugger::new();
    fake.dump("one.dmp");
    fake.dump("two.dmp");
    let dir = fake.path().display().to_string();
    let mut client = TestClient::start(&fake);

    let response = client
        .call(json!({"id": 1, "tool": "list_dumps", "directory_path": dir}))
        .await;
    let text = response["output"]["text"].as_str().unwrap();
    assert!(text.starts_with("Found 2 crash dump file(s)"), "text: {text}");
    assert!(text.contains("one.dmp"));
    assert!(text.contains("two.dmp"));

    let response = client
        .call(json!({"id": 2, "tool": "list_dumps", "directory_path": "/no/such/dir"}))
        .await;
    assert_eq!(response["kind"], "invalid_params");

    client.finish().await;
}

#[tokio::test]
async fn test_attach_then_run_command() {
    let fake = FakeDebugger::new();
    let mut client = TestClient::start(&fake);

    let response = client
        .call(json!({"id": 1, "tool": "attach_process", "pid": 4242}))
        .await;
    assert_eq!(response["type"], "result", "response: {response}");
    assert_eq!(response["output"]["session"], "attach:4242");
    let text = response["output"]["text"].as_str().unwrap();
    assert!(text.contains("Attaching to process 4242"));
    assert!(text.contains("### Last Event"));
    assert!(text.contains("output for .lastevent"));

    let response = client
        .call(json!({"id": 2, "tool": "run_command", "session": "attach:4242", "command": "~"}))
        .await;
    assert_eq!(response["output"]["status"], "completed");
    assert_eq!(fake.spawn_count(), 1);

    client.finish().await;
}
