//! Session management: handshake, routing, retries and recovery.
//!
//! A [`Session`] owns one transport at a time and is the only path by which
//! method calls reach it. It runs the `initialize` handshake, checks the
//! negotiated protocol version, retries transient failures with exponential
//! backoff, and re-runs the handshake once per call when the server reports
//! that the session expired.
//!
//! Regular calls hold the handshake gate for reading and the handshake holds
//! it for writing, so `notifications/initialized` always reaches the server
//! before any other request of that session.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::thread;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::{Endpoint, TransportConfig};
use crate::error::{ErrorKind, McpError, Result};
use crate::protocol::{
    ClientCapabilities, Implementation, InitializeParams, InitializeResult, JsonRpcNotification,
    JsonRpcRequest, RequestId, SUPPORTED_PROTOCOL_VERSIONS, LATEST_PROTOCOL_VERSION, methods,
};
use crate::transport::{
    self, ConnectionState, NotificationHandler, Transport, TransportCapability, TransportKind,
};

/// Client-side handshake settings.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Version sent in `initialize`.
    pub protocol_version: String,
    /// Versions the client accepts from the server.
    pub supported_versions: Vec<String>,
    /// Name and version reported to the server.
    pub client_info: Implementation,
    /// Capabilities advertised to the server.
    pub capabilities: ClientCapabilities,
    /// Check tool arguments against the cached input schema before calling.
    pub validate_tool_arguments: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            supported_versions: SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .map(|v| v.to_string())
                .collect(),
            client_info: Implementation::default(),
            capabilities: ClientCapabilities::default(),
            validate_tool_arguments: false,
        }
    }
}

impl SessionOptions {
    /// Request a specific protocol version. It is also the only version
    /// accepted unless [`Self::with_supported_versions`] says otherwise.
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        self.supported_versions = vec![version.clone()];
        self.protocol_version = version;
        self
    }

    /// Replace the list of acceptable server versions.
    pub fn with_supported_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_versions = versions.into_iter().map(Into::into).collect();
        self
    }

    /// Set the client name and version.
    pub fn with_client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_info = Implementation {
            name: name.into(),
            version: version.into(),
            title: None,
        };
        self
    }

    /// Set the advertised capabilities.
    pub fn with_capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Enable or disable client-side tool argument validation.
    pub fn with_tool_argument_validation(mut self, enabled: bool) -> Self {
        self.validate_tool_arguments = enabled;
        self
    }
}

/// What the handshake established.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Server-assigned session id, when the transport carries one.
    pub session_id: Option<String>,
    /// Medium in use.
    pub transport: TransportKind,
    /// Negotiated protocol version.
    pub protocol_version: String,
    /// Server capabilities as sent.
    pub capabilities: Map<String, Value>,
    /// Server name and version.
    pub server_info: Option<Implementation>,
    /// Usage hints from the server.
    pub instructions: Option<String>,
    /// When the handshake completed.
    pub connected_at: DateTime<Utc>,
}

impl SessionInfo {
    /// Blank info for a freshly connected transport.
    pub fn new(transport: TransportKind) -> Self {
        Self {
            session_id: None,
            transport,
            protocol_version: String::new(),
            capabilities: Map::new(),
            server_info: None,
            instructions: None,
            connected_at: Utc::now(),
        }
    }

    /// Whether the server advertised a top-level capability, e.g. `"tools"`.
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.contains_key(capability)
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    /// The server dropped the session or the transport died; the next call
    /// re-runs the handshake.
    Expired,
    ShuttingDown,
    Closed,
}

/// Dispatch table for server notifications, keyed by method.
#[derive(Default)]
pub struct NotificationRouter {
    handlers: RwLock<HashMap<String, Vec<NotificationHandler>>>,
}

impl NotificationRouter {
    /// Empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `method`. Handlers run in registration order.
    pub fn register(&self, method: impl Into<String>, handler: NotificationHandler) {
        self.handlers
            .write()
            .entry(method.into())
            .or_default()
            .push(handler);
    }

    /// Run every handler registered for the notification's method.
    pub fn dispatch(&self, notification: JsonRpcNotification) {
        let handlers = self.handlers.read().get(&notification.method).cloned();
        match handlers {
            Some(handlers) => {
                for handler in handlers {
                    handler(notification.clone());
                }
            }
            None => tracing::debug!(method = %notification.method, "unhandled notification"),
        }
    }

    /// Methods with at least one handler.
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.read().keys().cloned().collect();
        methods.sort();
        methods
    }
}

/// A protocol session with one server.
pub struct Session {
    name: String,
    transport: RwLock<Arc<dyn Transport>>,
    endpoint: Option<Endpoint>,
    config: TransportConfig,
    options: SessionOptions,
    router: Arc<NotificationRouter>,
    info: RwLock<Option<SessionInfo>>,
    state: Mutex<SessionState>,
    next_id: AtomicI64,
    /// Bumped by every successful handshake.
    epoch: AtomicU64,
    gate: RwLock<()>,
}

impl Session {
    /// Session over an existing transport. Without an endpoint a dead
    /// transport cannot be replaced, so losing it closes the session.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: TransportConfig,
        options: SessionOptions,
    ) -> Self {
        let router = Arc::new(NotificationRouter::new());
        transport.set_notification_handler(route_to(&router));
        Self {
            name: transport.kind().to_string(),
            transport: RwLock::new(transport),
            endpoint: None,
            config,
            options,
            router,
            info: RwLock::new(None),
            state: Mutex::new(SessionState::Uninitialized),
            next_id: AtomicI64::new(1),
            epoch: AtomicU64::new(0),
            gate: RwLock::new(()),
        }
    }

    /// Session that builds its transport from `endpoint`, and rebuilds it
    /// when it dies.
    pub fn from_endpoint(
        endpoint: Endpoint,
        config: TransportConfig,
        options: SessionOptions,
    ) -> Result<Self> {
        let transport = transport::build(&endpoint, &config)?;
        let mut session = Self::new(transport, config, options);
        session.name = endpoint.to_string();
        session.endpoint = Some(endpoint);
        Ok(session)
    }

    /// Name used in log fields.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Name used in log fields.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handshake settings.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Info from the last successful handshake.
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.info.read().clone()
    }

    /// Whether the session is ready and its transport usable.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Ready && self.transport().is_connected()
    }

    /// Optional features of the current transport.
    pub fn transport_capabilities(&self) -> Vec<TransportCapability> {
        self.transport().capabilities()
    }

    /// Register a handler for a server notification method.
    pub fn on_notification<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(JsonRpcNotification) + Send + Sync + 'static,
    {
        self.router.register(method, Arc::new(handler));
    }

    fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport.read())
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Allocate the next request id.
    pub fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Connect if needed and run the handshake.
    pub fn initialize(&self) -> Result<SessionInfo> {
        let _gate = self.gate.write();
        match self.state() {
            SessionState::Ready => {
                if let Some(info) = self.session_info() {
                    return Ok(info);
                }
            }
            SessionState::ShuttingDown | SessionState::Closed => {
                return Err(McpError::SessionClosed);
            }
            _ => {}
        }
        self.handshake()
    }

    /// Drop the current session and handshake again, replacing a dead
    /// transport first when an endpoint is known.
    pub fn reinitialize(&self) -> Result<SessionInfo> {
        let _gate = self.gate.write();
        self.rehandshake()
    }

    /// Handshake with the gate already held for writing.
    fn handshake(&self) -> Result<SessionInfo> {
        self.set_state(SessionState::Initializing);
        match self.run_handshake() {
            Ok(info) => {
                *self.info.write() = Some(info.clone());
                self.epoch.fetch_add(1, Ordering::SeqCst);
                self.set_state(SessionState::Ready);
                Ok(info)
            }
            Err(e) => {
                let transport = self.transport();
                let next = if transport.state() == ConnectionState::Closed && self.endpoint.is_none()
                {
                    SessionState::Closed
                } else {
                    SessionState::Uninitialized
                };
                tracing::warn!(server = %self.name, error = %e, "MCP handshake failed");
                self.set_state(next);
                Err(e)
            }
        }
    }

    fn run_handshake(&self) -> Result<SessionInfo> {
        let mut transport = self.transport();
        let dead = transport.state() != ConnectionState::Unconnected && !transport.is_connected();
        if dead {
            if let Some(endpoint) = &self.endpoint {
                tracing::info!(server = %self.name, "rebuilding transport");
                let _ = transport.close();
                let fresh = transport::build(endpoint, &self.config)?;
                fresh.set_notification_handler(route_to(&self.router));
                *self.transport.write() = Arc::clone(&fresh);
                transport = fresh;
            }
        }
        let mut info = match transport.state() {
            ConnectionState::Unconnected => transport.connect()?,
            _ => SessionInfo::new(transport.kind()),
        };

        let params = InitializeParams {
            protocol_version: self.options.protocol_version.clone(),
            capabilities: self.options.capabilities.clone(),
            client_info: self.options.client_info.clone(),
        };
        let request = JsonRpcRequest::new(
            self.next_request_id(),
            methods::INITIALIZE,
            Some(serde_json::to_value(&params)?),
        );
        let result = self.exchange(&transport, request)?;
        let result = validate_initialize(result)?;

        if !self
            .options
            .supported_versions
            .iter()
            .any(|v| *v == result.protocol_version)
        {
            return Err(McpError::session(format!(
                "server protocol version '{}' is not supported (supported: {})",
                result.protocol_version,
                self.options.supported_versions.join(", ")
            )));
        }

        transport.set_protocol_version(&result.protocol_version);
        transport.send_notification(JsonRpcNotification::new(methods::INITIALIZED, None))?;

        info.session_id = transport.session_id().or(info.session_id);
        info.protocol_version = result.protocol_version;
        info.capabilities = result.capabilities;
        info.instructions = result.instructions;
        info.connected_at = Utc::now();

        tracing::info!(
            server = %self.name,
            server_name = %result.server_info.name,
            server_version = %result.server_info.version,
            protocol_version = %info.protocol_version,
            session_id = ?info.session_id,
            "MCP session initialized"
        );
        info.server_info = Some(result.server_info);
        Ok(info)
    }

    /// Rehandshake with the gate already held for writing.
    fn rehandshake(&self) -> Result<SessionInfo> {
        if matches!(
            self.state(),
            SessionState::ShuttingDown | SessionState::Closed
        ) {
            return Err(McpError::SessionClosed);
        }
        self.set_state(SessionState::Expired);
        let transport = self.transport();
        transport.reset_session();

        let dead = transport.state() != ConnectionState::Unconnected && !transport.is_connected();
        if dead && self.endpoint.is_none() {
            self.set_state(SessionState::Closed);
            return Err(McpError::SessionClosed);
        }
        tracing::info!(server = %self.name, "reinitializing MCP session");
        self.handshake()
    }

    /// Transport for a regular call, or why there is none.
    fn ready_transport(&self) -> Result<Arc<dyn Transport>> {
        match self.state() {
            SessionState::Ready => Ok(self.transport()),
            SessionState::Expired => Err(McpError::SessionExpired(
                "session awaiting reinitialization".to_string(),
            )),
            SessionState::Uninitialized | SessionState::Initializing => {
                Err(McpError::NotInitialized)
            }
            SessionState::ShuttingDown | SessionState::Closed => Err(McpError::SessionClosed),
        }
    }

    /// Send one request, retrying transient failures with backoff.
    fn exchange(&self, transport: &Arc<dyn Transport>, request: JsonRpcRequest) -> Result<Value> {
        let mut attempt = 0;
        loop {
            tracing::debug!(
                server = %self.name,
                method = %request.method,
                id = %request.id,
                attempt,
                "sending MCP request"
            );
            let result = transport.send_request(request.clone()).and_then(|response| {
                if response.id != request.id {
                    return Err(McpError::protocol(format!(
                        "response id {} does not match request id {}",
                        response.id, request.id
                    )));
                }
                response.into_result().map_err(McpError::from_rpc)
            });
            match result {
                Err(e)
                    if e.is_retryable()
                        && attempt < self.config.max_retries
                        && transport.is_connected() =>
                {
                    let delay = self.config.backoff_for(attempt);
                    tracing::warn!(
                        server = %self.name,
                        method = %request.method,
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "MCP request failed, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Whether a failed call may be rescued by one rehandshake.
    fn can_recover(&self, error: &McpError) -> bool {
        error.is_session_expired()
            || (self.endpoint.is_some()
                && error.kind() == ErrorKind::Transport
                && !self.transport().is_connected()
                && self.state() == SessionState::Ready)
    }

    /// Rehandshake unless another caller already did since `epoch`.
    fn recover(&self, epoch: u64) -> Result<()> {
        let _gate = self.gate.write();
        if self.epoch.load(Ordering::SeqCst) != epoch && self.state() == SessionState::Ready {
            return Ok(());
        }
        self.rehandshake().map(|_| ())
    }

    /// Update state after a call failed for good.
    fn note_failure(&self, error: &McpError) {
        if error.kind() != ErrorKind::Transport || self.transport().is_connected() {
            return;
        }
        let mut state = self.state.lock();
        if *state == SessionState::Ready {
            *state = if self.endpoint.is_some() {
                SessionState::Expired
            } else {
                tracing::warn!(server = %self.name, "transport lost, closing session");
                SessionState::Closed
            };
        }
    }

    /// Send a request and return its result.
    pub fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_request_id();
        self.send_request_with_id(id, method, params)
    }

    /// Send a request under a caller-chosen id.
    pub fn send_request_with_id(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value> {
        let mut recovered = false;
        loop {
            let (epoch, outcome) = {
                let _gate = self.gate.read();
                let epoch = self.epoch.load(Ordering::SeqCst);
                let outcome = self.ready_transport().and_then(|transport| {
                    self.exchange(
                        &transport,
                        JsonRpcRequest::new(id.clone(), method, params.clone()),
                    )
                });
                (epoch, outcome)
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if !recovered && self.can_recover(&e) => {
                    tracing::warn!(
                        server = %self.name,
                        method = %method,
                        error = %e,
                        "session lost, reinitializing once"
                    );
                    recovered = true;
                    if let Err(reinit) = self.recover(epoch) {
                        tracing::warn!(
                            server = %self.name,
                            method = %method,
                            error = %reinit,
                            "reinitialize failed"
                        );
                        self.note_failure(&e);
                        return Err(e);
                    }
                }
                Err(e) => {
                    self.note_failure(&e);
                    return Err(e);
                }
            }
        }
    }

    /// Send several requests. Uses one batch message when the transport
    /// supports it, otherwise sends them one by one. Results are in input
    /// order and fail independently.
    pub fn send_batch(&self, calls: Vec<(String, Option<Value>)>) -> Result<Vec<Result<Value>>> {
        let transport = {
            let _gate = self.gate.read();
            self.ready_transport()?
        };
        if calls.len() > 1 && transport.capabilities().contains(&TransportCapability::Batch) {
            let _gate = self.gate.read();
            let requests: Vec<JsonRpcRequest> = calls
                .into_iter()
                .map(|(method, params)| JsonRpcRequest::new(self.next_request_id(), method, params))
                .collect();
            tracing::debug!(server = %self.name, count = requests.len(), "sending MCP batch");
            let responses = transport.send_batch(requests)?;
            return Ok(responses
                .into_iter()
                .map(|response| response.into_result().map_err(McpError::from_rpc))
                .collect());
        }
        Ok(calls
            .into_iter()
            .map(|(method, params)| self.send_request(&method, params))
            .collect())
    }

    /// Send a notification.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let _gate = self.gate.read();
        let transport = self.ready_transport()?;
        tracing::debug!(server = %self.name, method = %method, "sending MCP notification");
        transport.send_notification(JsonRpcNotification::new(method, params))
    }

    /// Check liveness.
    pub fn ping(&self) -> Result<()> {
        self.send_request(methods::PING, None).map(|_| ())
    }

    /// Ask the server to shut down, then close the transport. Calling it
    /// again is a no-op.
    pub fn shutdown(&self) -> Result<()> {
        let _gate = self.gate.write();
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            if matches!(previous, SessionState::ShuttingDown | SessionState::Closed) {
                return Ok(());
            }
            *state = SessionState::ShuttingDown;
            previous
        };

        let transport = self.transport();
        if previous == SessionState::Ready && transport.is_connected() {
            let request = JsonRpcRequest::new(self.next_request_id(), methods::SHUTDOWN, None);
            match transport.send_request(request) {
                Ok(_) => tracing::debug!(server = %self.name, "server acknowledged shutdown"),
                Err(e) => {
                    tracing::debug!(server = %self.name, error = %e, "shutdown request not acknowledged")
                }
            }
        }
        let closed = transport.close();
        self.info.write().take();
        self.set_state(SessionState::Closed);
        tracing::info!(server = %self.name, "MCP session closed");
        closed
    }
}

fn route_to(router: &Arc<NotificationRouter>) -> NotificationHandler {
    let router = Arc::clone(router);
    Arc::new(move |notification| router.dispatch(notification))
}

/// Check the required fields of an `initialize` result before decoding it.
fn validate_initialize(result: Value) -> Result<InitializeResult> {
    let obj = result
        .as_object()
        .ok_or_else(|| McpError::session("initialize result must be an object"))?;
    if !obj.get("protocolVersion").is_some_and(Value::is_string) {
        return Err(McpError::session(
            "initialize result is missing protocolVersion",
        ));
    }
    if !obj.get("capabilities").is_some_and(Value::is_object) {
        return Err(McpError::session(
            "initialize result is missing capabilities",
        ));
    }
    let has_name = obj
        .get("serverInfo")
        .and_then(|info| info.get("name"))
        .is_some_and(Value::is_string);
    if !has_name {
        return Err(McpError::session(
            "initialize result is missing serverInfo.name",
        ));
    }
    serde_json::from_value(result)
        .map_err(|e| McpError::session(format!("malformed initialize result: {}", e)))
}
