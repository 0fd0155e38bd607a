//! HTTP transport tests.
//!
//! Streamable HTTP runs against wiremock. The blocking client must not be
//! created or dropped on a runtime thread, so every client lives inside
//! `spawn_blocking`. Legacy SSE needs a GET stream that stays open, which
//! wiremock cannot serve, so those tests use a small hand-rolled server.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use skein_mcp::{
    ErrorKind, HttpMode, LoggingLevel, LoggingMessage, McpClient, McpError, McpServerConfig,
    SessionState, TransportCapability, TransportConfig,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Answer one JSON-RPC message the way a tiny MCP server would.
fn answer(message: &Value) -> Option<Value> {
    let id = message.get("id")?.clone();
    let method = message.get("method")?.as_str()?;
    let params = message.get("params").cloned().unwrap_or(Value::Null);
    let result = match method {
        "initialize" => json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {"tools": {}, "logging": {}},
            "serverInfo": {"name": "http-mock", "version": "0.3.0"}
        }),
        "tools/list" => json!({"tools": [{"name": "echo", "inputSchema": {"type": "object"}}]}),
        "tools/call" => {
            let text = params["arguments"]["message"].as_str().unwrap_or_default();
            json!({"content": [{"type": "text", "text": text}]})
        }
        "ping" | "shutdown" | "logging/setLevel" => json!({}),
        other => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("Method not found: {}", other)}
            }));
        }
    };
    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

fn answer_body(body: &Value) -> Option<Value> {
    match body {
        Value::Array(items) => {
            let replies: Vec<Value> = items.iter().filter_map(answer).collect();
            if replies.is_empty() {
                None
            } else {
                Some(Value::Array(replies))
            }
        }
        other => answer(other),
    }
}

/// Streamable endpoint: hands out `sess-N` on initialize and optionally
/// expires the first session after a few calls.
struct StreamableServer {
    sse: bool,
    expire_first_after: Option<usize>,
    state: Mutex<(usize, usize)>,
}

impl StreamableServer {
    fn json() -> Self {
        Self {
            sse: false,
            expire_first_after: None,
            state: Mutex::new((0, 0)),
        }
    }

    fn sse() -> Self {
        Self {
            sse: true,
            ..Self::json()
        }
    }

    fn expiring(after: usize) -> Self {
        Self {
            expire_first_after: Some(after),
            ..Self::json()
        }
    }
}

impl Respond for StreamableServer {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let session = request
            .headers
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let is_initialize = body.get("method").and_then(Value::as_str) == Some("initialize");
        let mut assigned = None;
        {
            let mut state = self.state.lock();
            if is_initialize {
                state.0 += 1;
                state.1 = 0;
                assigned = Some(format!("sess-{}", state.0));
            } else if session.as_deref() == Some("sess-1") {
                state.1 += 1;
                if let Some(limit) = self.expire_first_after {
                    if state.1 > limit {
                        return ResponseTemplate::new(404);
                    }
                }
            }
        }

        let Some(reply) = answer_body(&body) else {
            return ResponseTemplate::new(202);
        };
        let template = if self.sse {
            let log = json!({
                "jsonrpc": "2.0",
                "method": "notifications/message",
                "params": {"level": "info", "logger": "http-mock", "data": "handling request"}
            });
            let stream = format!(
                "event: message\ndata: {}\n\nevent: message\ndata: {}\n\n",
                log, reply
            );
            ResponseTemplate::new(200).set_body_raw(stream, "text/event-stream")
        } else {
            ResponseTemplate::new(200).set_body_raw(reply.to_string(), "application/json")
        };
        match assigned {
            Some(id) => template.insert_header("Mcp-Session-Id", id.as_str()),
            None => template,
        }
    }
}

async fn mount(server: &MockServer, responder: StreamableServer) {
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(responder)
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

fn streamable(url: &str) -> McpServerConfig {
    McpServerConfig::http("remote", url).with_http_mode(HttpMode::Streamable)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_streamable_json_round_trip() {
    let server = MockServer::start().await;
    mount(&server, StreamableServer::json()).await;
    let url = format!("{}/mcp", server.uri());

    tokio::task::spawn_blocking(move || {
        let client = McpClient::connect(streamable(&url)).unwrap();
        let info = client.session_info().unwrap();
        assert_eq!(info.session_id.as_deref(), Some("sess-1"));
        assert_eq!(info.server_info.as_ref().unwrap().name, "http-mock");
        assert!(
            client
                .session()
                .transport_capabilities()
                .contains(&TransportCapability::SessionId)
        );

        let tools = client.list_tools().unwrap();
        assert_eq!(tools[0].name, "echo");
        let result = client.call_tool("echo", Some(json!({"message": "over http"})));
        assert_eq!(result.text().as_deref(), Some("over http"));
        client.shutdown().unwrap();
    })
    .await
    .unwrap();

    let requests = server.received_requests().await.unwrap();
    let posts: Vec<&Request> = requests.iter().filter(|r| r.method.as_str() == "POST").collect();
    // The first POST (initialize) has no session yet; every later one does.
    assert!(posts[0].headers.get("mcp-session-id").is_none());
    for post in &posts[1..] {
        assert_eq!(post.headers.get("mcp-session-id").unwrap(), "sess-1");
        assert_eq!(post.headers.get("mcp-protocol-version").unwrap(), "2025-06-18");
    }
    let delete = requests
        .iter()
        .find(|r| r.method.as_str() == "DELETE")
        .expect("session terminated on close");
    assert_eq!(delete.headers.get("mcp-session-id").unwrap(), "sess-1");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_streamable_sse_reply_with_notification() {
    let server = MockServer::start().await;
    mount(&server, StreamableServer::sse()).await;
    let url = format!("{}/mcp", server.uri());

    tokio::task::spawn_blocking(move || {
        let client = McpClient::connect(streamable(&url)).unwrap();
        let seen: Arc<Mutex<Vec<LoggingMessage>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client
            .logging()
            .add_sink(Arc::new(move |m: &LoggingMessage| sink.lock().push(m.clone())));

        let result = client.call_tool("echo", Some(json!({"message": "streamed"})));
        assert_eq!(result.text().as_deref(), Some("streamed"));

        let seen = seen.lock();
        assert!(!seen.is_empty());
        assert_eq!(seen[0].level, LoggingLevel::Info);
        assert_eq!(seen[0].logger.as_deref(), Some("http-mock"));
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_batch_is_one_post() {
    let server = MockServer::start().await;
    mount(&server, StreamableServer::json()).await;
    let url = format!("{}/mcp", server.uri());

    tokio::task::spawn_blocking(move || {
        let client = McpClient::connect(streamable(&url)).unwrap();
        let results = client
            .session()
            .send_batch(vec![
                ("ping".to_string(), None),
                ("tools/list".to_string(), None),
                ("nope".to_string(), None),
            ])
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), &json!({}));
        assert!(results[1].as_ref().unwrap()["tools"].is_array());
        assert!(matches!(
            results[2],
            Err(McpError::ServerError { code: -32601, .. })
        ));
    })
    .await
    .unwrap();

    let requests = server.received_requests().await.unwrap();
    let batches = requests
        .iter()
        .filter(|r| r.body.first() == Some(&b'['))
        .count();
    assert_eq!(batches, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_expired_session_gets_new_id() {
    let server = MockServer::start().await;
    mount(&server, StreamableServer::expiring(1)).await;
    let url = format!("{}/mcp", server.uri());

    tokio::task::spawn_blocking(move || {
        let client = McpClient::connect(streamable(&url)).unwrap();
        assert_eq!(
            client.session_info().unwrap().session_id.as_deref(),
            Some("sess-1")
        );
        for i in 0..3 {
            let message = format!("call-{}", i);
            let result = client.call_tool("echo", Some(json!({"message": message})));
            assert!(result.is_success(), "call {} failed: {:?}", i, result.error);
        }
        assert_eq!(
            client.session_info().unwrap().session_id.as_deref(),
            Some("sess-2")
        );
        assert_eq!(client.session().state(), SessionState::Ready);
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unauthorized_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(401).set_body_string("missing token"))
        .mount(&server)
        .await;
    let url = format!("{}/mcp", server.uri());

    tokio::task::spawn_blocking(move || {
        let err = McpClient::connect(streamable(&url)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(!err.is_retryable());
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bearer_token_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(StreamableServer::json())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(10)
        .mount(&server)
        .await;
    let url = format!("{}/mcp", server.uri());

    tokio::task::spawn_blocking(move || {
        let client =
            McpClient::connect(streamable(&url).with_bearer_token("secret-token")).unwrap();
        assert!(client.lifecycle().ping().is_ok());
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    mount(&server, StreamableServer::json()).await;
    let url = format!("{}/mcp", server.uri());

    tokio::task::spawn_blocking(move || {
        let config = streamable(&url).with_retries(3);
        let client = McpClient::connect(config).unwrap();
        assert!(client.is_connected());
    })
    .await
    .unwrap();

    let requests = server.received_requests().await.unwrap();
    let initializes = requests
        .iter()
        .filter(|r| String::from_utf8_lossy(&r.body).contains("\"initialize\""))
        .count();
    assert_eq!(initializes, 3);
}

// ─────────────────────────────────────────────────────────────────────────────
// Legacy SSE
// ─────────────────────────────────────────────────────────────────────────────

/// One parsed HTTP/1.1 request.
struct RawRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

fn read_request(reader: &mut BufReader<TcpStream>) -> Option<RawRequest> {
    let mut line = String::new();
    if reader.read_line(&mut line).ok()? == 0 {
        return None;
    }
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut length = 0;
    loop {
        let mut header_line = String::new();
        if reader.read_line(&mut header_line).ok()? == 0 {
            return None;
        }
        let header_line = header_line.trim_end();
        if header_line.is_empty() {
            break;
        }
        if let Some((name, value)) = header_line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).ok()?;
    Some(RawRequest { method, path, body })
}

/// Old-style server: GET opens the event stream, POSTs to the announced
/// endpoint are acknowledged with 202 and answered on the stream. POSTs to
/// the main URL are rejected with 405, as such servers do.
fn start_legacy_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let stream_out: Arc<Mutex<Option<TcpStream>>> = Arc::new(Mutex::new(None));

    thread::spawn(move || {
        for conn in listener.incoming() {
            let Ok(conn) = conn else { continue };
            let stream_out = Arc::clone(&stream_out);
            thread::spawn(move || {
                let mut writer = conn.try_clone().unwrap();
                let mut reader = BufReader::new(conn);
                while let Some(request) = read_request(&mut reader) {
                    match (request.method.as_str(), request.path.as_str()) {
                        ("GET", "/mcp") => {
                            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\n\r\n";
                            writer.write_all(head.as_bytes()).unwrap();
                            writer
                                .write_all(b"event: endpoint\ndata: /messages?session=abc\n\n")
                                .unwrap();
                            writer.flush().unwrap();
                            *stream_out.lock() = Some(writer);
                            return;
                        }
                        ("POST", p) if p.starts_with("/messages") => {
                            writer
                                .write_all(b"HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\n\r\n")
                                .unwrap();
                            writer.flush().unwrap();
                            let body: Value = serde_json::from_slice(&request.body).unwrap();
                            if let Some(reply) = answer_body(&body) {
                                let event = format!("event: message\ndata: {}\n\n", reply);
                                if let Some(out) = stream_out.lock().as_mut() {
                                    let _ = out.write_all(event.as_bytes());
                                    let _ = out.flush();
                                }
                            }
                        }
                        _ => {
                            writer
                                .write_all(
                                    b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n",
                                )
                                .unwrap();
                            writer.flush().unwrap();
                        }
                    }
                }
            });
        }
    });

    format!("http://{}/mcp", addr)
}

#[test]
fn test_legacy_sse_mode() {
    let url = start_legacy_server();
    let client = McpClient::connect(
        McpServerConfig::http("legacy", &url).with_http_mode(HttpMode::LegacySse),
    )
    .unwrap();

    let caps = client.session().transport_capabilities();
    assert!(caps.contains(&TransportCapability::ServerPush));
    assert!(!caps.contains(&TransportCapability::Batch));

    let result = client.call_tool("echo", Some(json!({"message": "legacy"})));
    assert_eq!(result.text().as_deref(), Some("legacy"));
    client.shutdown().unwrap();
}

#[test]
fn test_auto_mode_falls_back_to_legacy() {
    let url = start_legacy_server();
    let client = McpClient::connect(McpServerConfig::http("auto", &url)).unwrap();
    assert_eq!(
        client.session_info().unwrap().server_info.unwrap().name,
        "http-mock"
    );
    assert!(
        !client
            .session()
            .transport_capabilities()
            .contains(&TransportCapability::SessionId)
    );
    assert!(client.lifecycle().ping().is_ok());
}

/// Serve raw HTTP, one thread per connection, handing every request to `handle`.
fn start_raw_server<F>(handle: F) -> String
where
    F: Fn(&RawRequest, &mut TcpStream) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = Arc::new(handle);

    thread::spawn(move || {
        for conn in listener.incoming() {
            let Ok(conn) = conn else { continue };
            let handle = Arc::clone(&handle);
            thread::spawn(move || {
                let mut writer = conn.try_clone().unwrap();
                let mut reader = BufReader::new(conn);
                while let Some(request) = read_request(&mut reader) {
                    handle(&request, &mut writer);
                }
            });
        }
    });

    format!("http://{}/mcp", addr)
}

/// Send event-stream headers and then nothing, holding the connection open.
fn stall_event_stream(writer: &mut TcpStream) {
    let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\n\r\n";
    writer.write_all(head.as_bytes()).unwrap();
    writer.flush().unwrap();
    thread::sleep(Duration::from_secs(30));
}

fn quick(idle: Duration) -> TransportConfig {
    TransportConfig::default()
        .with_idle_timeout(idle)
        .with_read_timeout(Duration::from_secs(5))
        .with_retry_backoff(Duration::from_millis(10))
}

#[test]
fn test_wrong_response_id_is_protocol_error() {
    let posts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&posts);
    let url = start_raw_server(move |request, writer| {
        if request.method != "POST" {
            let _ = writer.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
            return;
        }
        seen.fetch_add(1, Ordering::SeqCst);
        let body = json!({"jsonrpc": "2.0", "id": 999, "result": {}}).to_string();
        let reply = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        writer.write_all(reply.as_bytes()).unwrap();
        writer.flush().unwrap();
    });

    let config = McpServerConfig::http("mismatch", &url)
        .with_http_mode(HttpMode::Streamable)
        .with_transport(quick(Duration::from_secs(5)).with_max_retries(3));
    let err = McpClient::connect(config).err().unwrap();

    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(err.to_string().contains("999"));
    // Never retried.
    assert_eq!(posts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_stalled_sse_reply_times_out() {
    let url = start_raw_server(|request, writer| {
        if request.method == "POST" {
            stall_event_stream(writer);
        }
    });

    let config = McpServerConfig::http("stalled", &url)
        .with_http_mode(HttpMode::Streamable)
        .with_transport(quick(Duration::from_millis(300)).with_max_retries(0));
    let err = McpClient::connect(config).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[test]
fn test_legacy_stream_without_endpoint_times_out() {
    let url = start_raw_server(|request, writer| {
        if request.method == "GET" {
            stall_event_stream(writer);
        }
    });

    let config = McpServerConfig::http("silent", &url)
        .with_http_mode(HttpMode::LegacySse)
        .with_transport(quick(Duration::from_millis(300)).with_max_retries(0));
    let err = McpClient::connect(config).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}
