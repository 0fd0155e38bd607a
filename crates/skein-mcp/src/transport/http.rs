//! HTTP transport: streamable HTTP and the older HTTP+SSE flavour.
//!
//! Streamable mode POSTs every message to one URL and reads the answer from
//! either a JSON body or an event stream on the same response. Legacy mode
//! holds a GET event stream open, learns a POST URL from its first `endpoint`
//! event, and receives all responses on that stream.
//!
//! Each streamable POST runs on a short-lived worker thread so the caller can
//! bound the wait with `recv_timeout`: the read timeout for the response
//! head (and a JSON body), the idle timeout between stream events.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;

use parking_lot::RwLock;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use url::Url;

use super::dispatch::answer_server_request;
use super::proxy::{request_client, stream_client};
use super::sse::{SseEvent, pump_events};
use super::{
    ConnectionState, Dispatcher, NotificationHandler, PendingRequests, StateCell, Transport,
    TransportCapability, TransportKind,
};
use crate::codec;
use crate::config::{HttpMode, TransportConfig};
use crate::error::{McpError, Result};
use crate::protocol::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message, RequestId,
};
use crate::session::SessionInfo;

/// Header carrying the server-assigned session id.
pub const SESSION_ID_HEADER: &str = "Mcp-Session-Id";
/// Header carrying the negotiated protocol version.
pub const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Map a non-success status onto the error taxonomy.
fn status_error(status: StatusCode, body: String, had_session: bool) -> McpError {
    match status.as_u16() {
        401 | 403 => McpError::Auth(format!("HTTP {}: {}", status, body)),
        404 if had_session => {
            McpError::SessionExpired(format!("server no longer knows this session: {}", body))
        }
        code => McpError::Http {
            status: code,
            message: body,
        },
    }
}

fn send_error(e: reqwest::Error) -> McpError {
    McpError::transport(format!("HTTP request failed: {}", e))
}

/// First part of a POST's outcome, delivered once headers (and a JSON body)
/// are in.
struct Head {
    session_id: Option<String>,
    reply: Reply,
}

enum Reply {
    /// No body to read (202, 204, or empty 200).
    Accepted,
    /// A complete JSON body.
    Body(String),
    /// An event stream still being read.
    Stream(Receiver<Result<SseEvent>>),
}

/// The legacy flavour's POST URL, learned from the `endpoint` event.
struct LegacyChannel {
    post_url: Url,
}

/// Collects the responses a call is waiting for, in request order.
struct Collector {
    wanted: Vec<RequestId>,
    found: HashMap<RequestId, JsonRpcResponse>,
    /// First response seen for an id this call did not send.
    stray: Option<RequestId>,
}

impl Collector {
    fn new(wanted: &[RequestId]) -> Self {
        Self {
            wanted: wanted.to_vec(),
            found: HashMap::new(),
            stray: None,
        }
    }

    fn offer(&mut self, response: JsonRpcResponse) -> Option<JsonRpcResponse> {
        if self.wanted.contains(&response.id) {
            self.found.insert(response.id.clone(), response);
            None
        } else {
            if self.stray.is_none() {
                self.stray = Some(response.id.clone());
            }
            Some(response)
        }
    }

    fn done(&self) -> bool {
        self.found.len() == self.wanted.len()
    }

    fn missing(&self) -> Option<&RequestId> {
        self.wanted.iter().find(|id| !self.found.contains_key(id))
    }

    fn finish(mut self) -> Result<Vec<JsonRpcResponse>> {
        if let Some(id) = self.missing() {
            if let Some(stray) = &self.stray {
                return Err(McpError::protocol(format!(
                    "response id {} does not match request {}",
                    stray, id
                )));
            }
            return Err(McpError::transport(format!(
                "stream ended before the response to request {}",
                id
            )));
        }
        Ok(self
            .wanted
            .iter()
            .filter_map(|id| self.found.remove(id))
            .collect())
    }
}

/// State the legacy stream reader needs after `connect` returns.
struct Shared {
    state: StateCell,
    dispatcher: Dispatcher,
}

/// HTTP transport.
pub struct HttpTransport {
    url: Url,
    mode: HttpMode,
    config: TransportConfig,
    /// Bounded by the read timeout; used for legacy POSTs and the closing DELETE.
    client: Client,
    /// Unbounded; used for streamable POSTs and the legacy GET stream.
    stream_client: Client,
    shared: Arc<Shared>,
    session_id: RwLock<Option<String>>,
    protocol_version: RwLock<Option<String>>,
    legacy: RwLock<Option<LegacyChannel>>,
    /// Set once a streamable POST succeeded, which rules out falling back.
    streamable_confirmed: AtomicBool,
}

impl HttpTransport {
    /// Create an unconnected HTTP transport.
    pub fn new(url: &str, mode: HttpMode, config: TransportConfig) -> Result<Self> {
        let url =
            Url::parse(url).map_err(|e| McpError::transport(format!("invalid URL: {}", e)))?;
        let client = request_client(&config)?;
        let stream_client = stream_client(&config)?;

        tracing::info!(
            url = %url,
            mode = ?mode,
            timeout_secs = config.read_timeout.as_secs(),
            "created HTTP transport"
        );

        Ok(Self {
            url,
            mode,
            config,
            client,
            stream_client,
            shared: Arc::new(Shared {
                state: StateCell::new(),
                dispatcher: Dispatcher::new(Arc::new(PendingRequests::new())),
            }),
            session_id: RwLock::new(None),
            protocol_version: RwLock::new(None),
            legacy: RwLock::new(None),
            streamable_confirmed: AtomicBool::new(false),
        })
    }

    /// Whether the legacy flavour is in use.
    pub fn is_legacy(&self) -> bool {
        self.legacy.read().is_some()
    }

    fn legacy_url(&self) -> Option<Url> {
        self.legacy.read().as_ref().map(|l| l.post_url.clone())
    }

    fn pending(&self) -> &Arc<PendingRequests> {
        self.shared.dispatcher.pending()
    }

    fn with_session_headers(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(id) = self.session_id.read().as_deref() {
            request = request.header(SESSION_ID_HEADER, id);
        }
        if let Some(version) = self.protocol_version.read().as_deref() {
            request = request.header(PROTOCOL_VERSION_HEADER, version);
        }
        request
    }

    /// Start a POST on a worker thread and return the channel its head arrives on.
    fn spawn_post(&self, body: String) -> Result<Receiver<Result<Head>>> {
        let had_session = self.session_id.read().is_some();
        let request = self.with_session_headers(
            self.stream_client
                .post(self.url.clone())
                .header(CONTENT_TYPE, "application/json")
                .header(ACCEPT, ACCEPT_BOTH)
                .body(body),
        );

        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("mcp-http-post".to_string())
            .spawn(move || {
                let response = match request.send() {
                    Ok(response) => response,
                    Err(e) => {
                        let _ = tx.send(Err(send_error(e)));
                        return;
                    }
                };
                let status = response.status();
                let session_id = response
                    .headers()
                    .get(SESSION_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);

                if !status.is_success() {
                    let body = response.text().unwrap_or_default();
                    let _ = tx.send(Err(status_error(status, body, had_session)));
                    return;
                }

                let is_stream = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|ct| ct.starts_with("text/event-stream"));

                if is_stream {
                    let (events_tx, events_rx) = mpsc::channel();
                    let head = Head {
                        session_id,
                        reply: Reply::Stream(events_rx),
                    };
                    if tx.send(Ok(head)).is_ok() {
                        pump_events(response, events_tx);
                    }
                    return;
                }

                let head = match response.text() {
                    Ok(text) if text.trim().is_empty() => Ok(Head {
                        session_id,
                        reply: Reply::Accepted,
                    }),
                    Ok(text) => Ok(Head {
                        session_id,
                        reply: Reply::Body(text),
                    }),
                    Err(e) => Err(McpError::transport(format!(
                        "failed to read response body: {}",
                        e
                    ))),
                };
                let _ = tx.send(head);
            })
            .map_err(|e| McpError::transport(format!("failed to start HTTP worker: {}", e)))?;
        Ok(rx)
    }

    /// POST one body and collect the responses for `wanted`.
    fn exchange(&self, body: String, wanted: &[RequestId]) -> Result<Vec<JsonRpcResponse>> {
        tracing::trace!(url = %self.url, json = %body, "sending MCP HTTP request");
        let rx = self.spawn_post(body)?;
        let head = match rx.recv_timeout(self.config.read_timeout) {
            Ok(head) => head,
            Err(RecvTimeoutError::Timeout) => return Err(McpError::Timeout(self.config.read_timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(McpError::transport("HTTP worker exited without a reply"));
            }
        };
        let head = match head {
            Ok(head) => head,
            Err(e) => {
                if e.is_session_expired() {
                    self.session_id.write().take();
                }
                return Err(e);
            }
        };

        if let Some(id) = head.session_id {
            let mut current = self.session_id.write();
            if current.as_deref() != Some(id.as_str()) {
                tracing::debug!(session_id = %id, "server assigned session id");
                *current = Some(id);
            }
        }

        let mut collector = Collector::new(wanted);
        match head.reply {
            Reply::Accepted => {}
            Reply::Body(text) => self.absorb(&text, &mut collector)?,
            Reply::Stream(events) => {
                let idle = self.config.idle_timeout;
                while !collector.done() {
                    match events.recv_timeout(idle) {
                        Ok(Ok(event)) => {
                            if let Err(e) = self.absorb(&event.data, &mut collector) {
                                tracing::warn!(error = %e, "discarding malformed stream event");
                            }
                        }
                        Ok(Err(e)) => return Err(e),
                        Err(RecvTimeoutError::Timeout) => return Err(McpError::Timeout(idle)),
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            }
        }
        self.streamable_confirmed.store(true, Ordering::SeqCst);
        collector.finish()
    }

    /// Route every message in `text`: wanted responses into `collector`,
    /// everything else through the dispatcher.
    fn absorb(&self, text: &str, collector: &mut Collector) -> Result<()> {
        tracing::trace!(json = %text, "received MCP HTTP message");
        for message in codec::decode_batch(text)? {
            match message {
                Message::Response(response) => {
                    if let Some(other) = collector.offer(response) {
                        self.shared.dispatcher.handle(Message::Response(other));
                    }
                }
                Message::Request(request) => {
                    let reply = answer_server_request(&request);
                    if let Err(e) = self.post_reply(&reply) {
                        tracing::warn!(error = %e, "failed to answer server request");
                    }
                }
                notification @ Message::Notification(_) => {
                    self.shared.dispatcher.handle(notification);
                }
            }
        }
        Ok(())
    }

    fn post_reply(&self, reply: &JsonRpcResponse) -> Result<()> {
        let body = serde_json::to_string(reply)?;
        match self.legacy_url() {
            Some(url) => post_legacy(&self.client, &self.shared, url, body),
            None => {
                let response = self
                    .with_session_headers(
                        self.client
                            .post(self.url.clone())
                            .header(CONTENT_TYPE, "application/json")
                            .header(ACCEPT, ACCEPT_BOTH)
                            .body(body),
                    )
                    .send()
                    .map_err(send_error)?;
                if !response.status().is_success() {
                    let status = response.status();
                    return Err(status_error(status, response.text().unwrap_or_default(), false));
                }
                Ok(())
            }
        }
    }

    /// Open the legacy GET stream and wait for the `endpoint` event.
    fn open_legacy(&self) -> Result<Url> {
        tracing::info!(url = %self.url, "opening legacy SSE stream");
        let response = self
            .stream_client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .map_err(send_error)?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(status_error(status, response.text().unwrap_or_default(), false));
        }

        let (tx, events) = mpsc::channel();
        thread::Builder::new()
            .name("mcp-sse-stream".to_string())
            .spawn(move || pump_events(response, tx))
            .map_err(|e| McpError::transport(format!("failed to start SSE reader: {}", e)))?;

        let wait = self.config.idle_timeout;
        let post_url = loop {
            match events.recv_timeout(wait) {
                Ok(Ok(event)) if event.event == "endpoint" => {
                    break self.url.join(event.data.trim()).map_err(|e| {
                        McpError::protocol(format!("invalid endpoint event '{}': {}", event.data, e))
                    })?;
                }
                Ok(Ok(event)) => {
                    tracing::debug!(event = %event.event, "ignoring event before endpoint");
                }
                Ok(Err(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => return Err(McpError::Timeout(wait)),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(McpError::transport(
                        "event stream closed before announcing an endpoint",
                    ));
                }
            }
        };
        tracing::debug!(endpoint = %post_url, "legacy SSE endpoint announced");

        let shared = Arc::clone(&self.shared);
        let client = self.client.clone();
        let reply_url = post_url.clone();
        thread::Builder::new()
            .name("mcp-sse-dispatch".to_string())
            .spawn(move || {
                for event in events {
                    match event {
                        Ok(event) if event.event == "message" => {
                            for reply in shared.dispatcher.handle_text(&event.data) {
                                let sent = serde_json::to_string(&reply)
                                    .map_err(McpError::from)
                                    .and_then(|body| {
                                        post_legacy(&client, &shared, reply_url.clone(), body)
                                    });
                                if let Err(e) = sent {
                                    tracing::warn!(error = %e, "failed to answer server request");
                                }
                            }
                        }
                        Ok(event) => tracing::debug!(event = %event.event, "ignoring SSE event"),
                        Err(e) => {
                            tracing::warn!(error = %e, "legacy SSE stream failed");
                            break;
                        }
                    }
                }
                if shared.state.get() != ConnectionState::Closed {
                    tracing::info!("legacy SSE stream ended");
                }
                shared.state.mark_closed();
                shared.dispatcher.pending().fail_all(|| McpError::ConnectionClosed);
            })
            .map_err(|e| McpError::transport(format!("failed to start SSE dispatcher: {}", e)))?;

        *self.legacy.write() = Some(LegacyChannel {
            post_url: post_url.clone(),
        });
        Ok(post_url)
    }

    fn send_legacy(&self, post_url: Url, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = request.id.clone();
        let rx = self.pending().register(id.clone())?;
        let body = match serde_json::to_string(&request) {
            Ok(body) => body,
            Err(e) => {
                self.pending().remove(&id);
                return Err(e.into());
            }
        };
        tracing::trace!(url = %post_url, json = %body, "sending MCP legacy request");
        if let Err(e) = post_legacy(&self.client, &self.shared, post_url, body) {
            self.pending().remove(&id);
            return Err(e);
        }
        self.pending().wait(&id, rx, self.config.idle_timeout)
    }

    fn should_fall_back(&self) -> bool {
        self.mode == HttpMode::Auto
            && !self.streamable_confirmed.load(Ordering::SeqCst)
            && self.session_id.read().is_none()
            && !self.is_legacy()
    }
}

/// POST to the legacy endpoint. Any body the server returns is dispatched,
/// since some servers answer inline instead of on the stream.
fn post_legacy(client: &Client, shared: &Shared, url: Url, body: String) -> Result<()> {
    let response = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .map_err(send_error)?;
    let status = response.status();
    let text = response.text().unwrap_or_default();
    if !status.is_success() {
        return Err(status_error(status, text, false));
    }
    if !text.trim().is_empty() {
        shared.dispatcher.handle_text(&text);
    }
    Ok(())
}

impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn connect(&self) -> Result<SessionInfo> {
        self.shared.state.begin_connect()?;
        if self.mode == HttpMode::LegacySse {
            if let Err(e) = self.open_legacy() {
                self.shared.state.mark_closed();
                return Err(e);
            }
        }
        self.shared.state.mark_connected();
        tracing::info!(url = %self.url, legacy = self.is_legacy(), "HTTP transport connected");

        let mut info = SessionInfo::new(TransportKind::Http);
        info.session_id = self.session_id.read().clone();
        Ok(info)
    }

    fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        self.shared.state.ensure_connected()?;
        if let Some(url) = self.legacy_url() {
            return self.send_legacy(url, request);
        }

        let body = serde_json::to_string(&request)?;
        match self.exchange(body, std::slice::from_ref(&request.id)) {
            Ok(mut responses) => responses
                .pop()
                .ok_or_else(|| McpError::protocol(format!("no response to request {}", request.id))),
            Err(McpError::Http {
                status: status @ (404 | 405),
                ..
            }) if self.should_fall_back() => {
                tracing::info!(status, "streamable POST rejected, falling back to legacy SSE");
                let url = self.open_legacy()?;
                self.send_legacy(url, request)
            }
            Err(e) => Err(e),
        }
    }

    fn send_batch(&self, requests: Vec<JsonRpcRequest>) -> Result<Vec<JsonRpcResponse>> {
        self.shared.state.ensure_connected()?;
        if self.is_legacy() || requests.len() < 2 {
            return requests
                .into_iter()
                .map(|request| self.send_request(request))
                .collect();
        }
        let ids: Vec<RequestId> = requests.iter().map(|r| r.id.clone()).collect();
        let body = codec::encode_batch(&requests)?;
        self.exchange(body, &ids)
    }

    fn send_notification(&self, notification: JsonRpcNotification) -> Result<()> {
        self.shared.state.ensure_connected()?;
        let body = serde_json::to_string(&notification)?;
        match self.legacy_url() {
            Some(url) => post_legacy(&self.client, &self.shared, url, body),
            None => self.exchange(body, &[]).map(|_| ()),
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.state.is_connected()
    }

    fn close(&self) -> Result<()> {
        if !self.shared.state.begin_close() {
            return Ok(());
        }
        let session = self.session_id.write().take();
        let was_legacy = self.legacy.write().take().is_some();
        if let (Some(id), false) = (session, was_legacy) {
            // Best effort; servers may not support explicit termination.
            match self
                .client
                .delete(self.url.clone())
                .header(SESSION_ID_HEADER, id.as_str())
                .send()
            {
                Ok(response) => {
                    tracing::debug!(status = %response.status(), "terminated HTTP session")
                }
                Err(e) => tracing::debug!(error = %e, "session DELETE failed"),
            }
        }
        self.shared.state.mark_closed();
        self.pending().fail_all(|| McpError::ConnectionClosed);
        tracing::info!(url = %self.url, "HTTP transport closed");
        Ok(())
    }

    fn capabilities(&self) -> Vec<TransportCapability> {
        let mut caps = vec![TransportCapability::Streaming, TransportCapability::ServerPush];
        if !self.is_legacy() {
            caps.push(TransportCapability::Batch);
            caps.push(TransportCapability::SessionId);
        }
        caps
    }

    fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    fn set_notification_handler(&self, handler: NotificationHandler) {
        self.shared.dispatcher.set_handler(handler);
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    fn set_protocol_version(&self, version: &str) {
        *self.protocol_version.write() = Some(version.to_string());
    }

    fn reset_session(&self) {
        if self.session_id.write().take().is_some() {
            tracing::debug!("cleared HTTP session id");
        }
    }
}
