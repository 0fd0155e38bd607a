//! In-process transport double for session and façade tests.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};

use crate::error::{McpError, Result};
use crate::protocol::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, methods,
};
use crate::session::SessionInfo;
use crate::transport::{
    ConnectionState, NotificationHandler, StateCell, Transport, TransportCapability,
    TransportKind,
};

type Responder = dyn Fn(&JsonRpcRequest) -> Result<Value> + Send + Sync;

/// A transport answering requests from a closure.
///
/// `Err(McpError::ServerError { .. })` from the closure becomes a JSON-RPC
/// error response; any other error is returned as a transport failure.
pub(crate) struct MockTransport {
    responder: Box<Responder>,
    state: StateCell,
    handler: RwLock<Option<NotificationHandler>>,
    requests: Mutex<Vec<JsonRpcRequest>>,
    notifications: Mutex<Vec<JsonRpcNotification>>,
}

/// A well-formed `initialize` result advertising every capability.
pub(crate) fn initialize_result(version: &str) -> Value {
    json!({
        "protocolVersion": version,
        "capabilities": {
            "tools": {},
            "resources": {},
            "prompts": {},
            "logging": {},
            "completions": {}
        },
        "serverInfo": {"name": "mock", "version": "0.1.0"}
    })
}

impl MockTransport {
    pub(crate) fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&JsonRpcRequest) -> Result<Value> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            state: StateCell::new(),
            handler: RwLock::new(None),
            requests: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
        })
    }

    /// A server that completes the handshake with `version` and hands every
    /// other method to `handler`.
    pub(crate) fn server<F>(version: &str, handler: F) -> Arc<Self>
    where
        F: Fn(&str, Option<&Value>) -> Result<Value> + Send + Sync + 'static,
    {
        let version = version.to_string();
        Self::new(move |request| match request.method.as_str() {
            methods::INITIALIZE => Ok(initialize_result(&version)),
            method => handler(method, request.params.as_ref()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<JsonRpcRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn methods(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.method.clone())
            .collect()
    }

    pub(crate) fn notification_methods(&self) -> Vec<String> {
        self.notifications
            .lock()
            .iter()
            .map(|n| n.method.clone())
            .collect()
    }

    /// Simulate the server going away.
    pub(crate) fn disconnect(&self) {
        self.state.mark_closed();
    }

    /// Deliver a notification as if the server pushed it.
    pub(crate) fn push_notification(&self, notification: JsonRpcNotification) {
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(notification);
        }
    }
}

impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn connect(&self) -> Result<SessionInfo> {
        self.state.begin_connect()?;
        self.state.mark_connected();
        Ok(SessionInfo::new(TransportKind::Stdio))
    }

    fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        self.state.ensure_connected()?;
        self.requests.lock().push(request.clone());
        match (self.responder)(&request) {
            Ok(result) => Ok(JsonRpcResponse::success(request.id, result)),
            Err(McpError::ServerError {
                code,
                message,
                data,
            }) => Ok(JsonRpcResponse::failure(
                request.id,
                JsonRpcError {
                    code,
                    message,
                    data,
                },
            )),
            Err(e) => Err(e),
        }
    }

    fn send_notification(&self, notification: JsonRpcNotification) -> Result<()> {
        self.state.ensure_connected()?;
        self.notifications.lock().push(notification);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    fn close(&self) -> Result<()> {
        if self.state.begin_close() {
            self.state.mark_closed();
        }
        Ok(())
    }

    fn capabilities(&self) -> Vec<TransportCapability> {
        vec![TransportCapability::ServerPush]
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn set_notification_handler(&self, handler: NotificationHandler) {
        *self.handler.write() = Some(handler);
    }
}
