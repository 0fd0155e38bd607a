//! Transport layer for MCP communication.
//!
//! Every medium implements [`Transport`]: a blocking request/response surface
//! with interior mutability, so one instance can be shared behind an `Arc`
//! and used from several threads at once. Responses are matched to callers by
//! request id through [`PendingRequests`] on the bidirectional transports.
//!
//! | transport | framing | server push |
//! |-----------|---------|-------------|
//! | [`HttpTransport`] | JSON body or SSE per POST; legacy SSE stream | yes |
//! | [`StdioTransport`] | newline-delimited JSON over a child's pipes | yes |
//! | [`SocketTransport`] | newline-delimited JSON over TCP or Unix | yes |

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{Endpoint, TransportConfig};
use crate::error::Result;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::session::SessionInfo;

mod dispatch;
mod http;
mod pending;
mod proxy;
mod socket;
mod sse;
mod state;
mod stdio;

pub use dispatch::Dispatcher;
pub use http::HttpTransport;
pub use pending::PendingRequests;
pub use proxy::build_proxy;
pub use socket::SocketTransport;
pub use sse::{SseEvent, SseParser};
pub use state::StateCell;
pub use stdio::StdioTransport;

/// Which medium a transport uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Stdio,
    Socket,
}

impl TransportKind {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Stdio => "stdio",
            Self::Socket => "socket",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional features a transport supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportCapability {
    /// Responses may arrive as an event stream.
    Streaming,
    /// The server can send notifications and requests unprompted.
    ServerPush,
    /// Several requests can travel in one message.
    Batch,
    /// The server assigns a session id.
    SessionId,
}

/// Lifecycle of one transport instance. Nothing leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Callback for notifications pushed by the server.
pub type NotificationHandler = Arc<dyn Fn(JsonRpcNotification) + Send + Sync>;

/// A channel to one MCP server.
pub trait Transport: Send + Sync {
    /// Medium of this transport.
    fn kind(&self) -> TransportKind;

    /// Establish the connection. Valid only once, from `Unconnected`.
    ///
    /// The returned info carries the transport kind and any session id the
    /// transport learned; the session fills in the rest after the handshake.
    fn connect(&self) -> Result<SessionInfo>;

    /// Send a request and block until its response arrives.
    fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send several requests; responses come back in request order.
    fn send_batch(&self, requests: Vec<JsonRpcRequest>) -> Result<Vec<JsonRpcResponse>> {
        requests
            .into_iter()
            .map(|request| self.send_request(request))
            .collect()
    }

    /// Send a notification; no response is expected.
    fn send_notification(&self, notification: JsonRpcNotification) -> Result<()>;

    /// Whether requests can currently be sent.
    fn is_connected(&self) -> bool;

    /// Tear the connection down. Calling it again is a no-op.
    fn close(&self) -> Result<()>;

    /// Optional features this transport supports.
    fn capabilities(&self) -> Vec<TransportCapability>;

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Install the callback for server notifications.
    fn set_notification_handler(&self, handler: NotificationHandler);

    /// Session id assigned by the server, if this transport carries one.
    fn session_id(&self) -> Option<String> {
        None
    }

    /// Record the negotiated protocol version for transports that echo it.
    fn set_protocol_version(&self, _version: &str) {}

    /// Forget any server-assigned session id before a new handshake.
    fn reset_session(&self) {}
}

/// Build the transport an endpoint asks for.
///
/// The transport is returned unconnected.
pub fn build(endpoint: &Endpoint, config: &TransportConfig) -> Result<Arc<dyn Transport>> {
    tracing::debug!(kind = %endpoint.kind(), endpoint = %endpoint, "building transport");
    let transport: Arc<dyn Transport> = match endpoint {
        Endpoint::Http { url, mode } => Arc::new(HttpTransport::new(url, *mode, config.clone())?),
        Endpoint::Stdio {
            command,
            args,
            env,
            cwd,
        } => Arc::new(StdioTransport::new(
            command,
            args.clone(),
            env.clone(),
            cwd.clone(),
            config.clone(),
        )),
        Endpoint::Socket { address } => {
            Arc::new(SocketTransport::new(address.clone(), config.clone()))
        }
    };
    Ok(transport)
}
