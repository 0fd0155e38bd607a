//! Error types for MCP operations.
//!
//! Every failure is classified into one [`ErrorKind`] so callers can tell a
//! dead connection from a server-side rejection from a failing tool without
//! looking at message text.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::{JsonRpcError, error_codes};

/// Result type for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Coarse classification of an [`McpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// The channel failed: refused connection, broken pipe, dead process.
    Transport,
    /// A blocking operation exceeded its configured timeout.
    Timeout,
    /// Malformed envelope, mismatched id, or a JSON-RPC error object.
    Protocol,
    /// Handshake failure or an expired/closed session.
    Session,
    /// Credentials were rejected.
    Auth,
    /// Tool failure, missing resource, circular resource read.
    Domain,
}

impl ErrorKind {
    /// Stable lowercase tag, used in tool result metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
            Self::Session => "session",
            Self::Auth => "auth",
            Self::Domain => "domain",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to spawn the MCP server process.
    #[error("failed to spawn MCP server: {0}")]
    SpawnFailed(String),

    /// Failed to communicate with the MCP server.
    #[error("transport error: {0}")]
    Transport(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection closed, by either side.
    #[error("connection closed")]
    ConnectionClosed,

    /// Non-success HTTP status that is not an auth or session failure.
    #[error("HTTP error {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Timeout waiting for a connection, a response, or the next stream event.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// JSON-RPC protocol violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server returned an error response.
    #[error("server error {code}: {message}")]
    ServerError {
        /// Error code from the server.
        code: i64,
        /// Error message from the server.
        message: String,
        /// Optional additional data.
        data: Option<serde_json::Value>,
    },

    /// Handshake failed or negotiated an unusable session.
    #[error("session error: {0}")]
    Session(String),

    /// The server no longer recognises the session.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// Server not initialized.
    #[error("session not initialized - call initialize() first")]
    NotInitialized,

    /// The session was shut down or lost its transport for good.
    #[error("session closed")]
    SessionClosed,

    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Tool execution failed.
    #[error("tool error: {0}")]
    ToolError(String),

    /// Tool arguments do not satisfy the cached input schema.
    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments {
        /// Tool name.
        tool: String,
        /// Validation failures, joined.
        reason: String,
    },

    /// The server has no resource at this URI.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The URI is already being read further up the same call chain.
    #[error("circular resource dependency on '{0}'")]
    CircularDependency(String),
}

impl McpError {
    /// Create a spawn failed error.
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a session error.
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// Create a server error from an error response.
    pub fn server_error(
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data,
        }
    }

    /// Create a tool error.
    pub fn tool_error(msg: impl Into<String>) -> Self {
        Self::ToolError(msg.into())
    }

    /// Translate a JSON-RPC error object into the taxonomy.
    pub fn from_rpc(error: JsonRpcError) -> Self {
        match error.code {
            error_codes::SESSION_EXPIRED => Self::SessionExpired(error.message),
            _ => Self::server_error(error.code, error.message, error.data),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SpawnFailed(_)
            | Self::Transport(_)
            | Self::Io(_)
            | Self::ConnectionClosed
            | Self::Http { .. } => ErrorKind::Transport,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Protocol(_) | Self::Json(_) | Self::ServerError { .. } => ErrorKind::Protocol,
            Self::Session(_)
            | Self::SessionExpired(_)
            | Self::NotInitialized
            | Self::SessionClosed => ErrorKind::Session,
            Self::Auth(_) => ErrorKind::Auth,
            Self::ToolError(_)
            | Self::InvalidArguments { .. }
            | Self::ResourceNotFound(_)
            | Self::CircularDependency(_) => ErrorKind::Domain,
        }
    }

    /// Whether the session's retry budget applies to this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::SpawnFailed(_) => false,
            other => matches!(other.kind(), ErrorKind::Transport | ErrorKind::Timeout),
        }
    }

    /// Whether this error means the server dropped our session.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = McpError::spawn_failed("command not found");
        assert!(err.to_string().contains("spawn"));
        assert!(err.to_string().contains("command not found"));

        let err = McpError::server_error(-32600, "Invalid Request", None);
        assert!(err.to_string().contains("-32600"));
        assert!(err.to_string().contains("Invalid Request"));

        let err = McpError::CircularDependency("file:///a".to_string());
        assert!(err.to_string().contains("file:///a"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let mcp_err: McpError = json_err.into();
        assert!(matches!(mcp_err, McpError::Json(_)));
        assert_eq!(mcp_err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let mcp_err: McpError = io_err.into();
        assert!(matches!(mcp_err, McpError::Io(_)));
        assert_eq!(mcp_err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_kinds_are_distinct_per_layer() {
        assert_eq!(McpError::ConnectionClosed.kind(), ErrorKind::Transport);
        assert_eq!(
            McpError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            McpError::server_error(-32601, "nope", None).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            McpError::SessionExpired("gone".into()).kind(),
            ErrorKind::Session
        );
        assert_eq!(McpError::Auth("401".into()).kind(), ErrorKind::Auth);
        assert_eq!(
            McpError::ResourceNotFound("x".into()).kind(),
            ErrorKind::Domain
        );
    }

    #[test]
    fn test_retry_classification() {
        assert!(McpError::transport("reset").is_retryable());
        assert!(McpError::Timeout(Duration::from_millis(5)).is_retryable());
        assert!(McpError::ConnectionClosed.is_retryable());
        assert!(
            McpError::Http {
                status: 503,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            !McpError::Http {
                status: 400,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(!McpError::protocol("bad envelope").is_retryable());
        assert!(!McpError::Auth("denied".into()).is_retryable());
        assert!(!McpError::SessionExpired("gone".into()).is_retryable());
        assert!(!McpError::spawn_failed("missing").is_retryable());
    }

    #[test]
    fn test_from_rpc_maps_session_expiry() {
        let err = McpError::from_rpc(JsonRpcError {
            code: error_codes::SESSION_EXPIRED,
            message: "stale".into(),
            data: None,
        });
        assert!(err.is_session_expired());

        let err = McpError::from_rpc(JsonRpcError {
            code: error_codes::METHOD_NOT_FOUND,
            message: "nope".into(),
            data: None,
        });
        assert!(matches!(err, McpError::ServerError { code: -32601, .. }));
    }
}
