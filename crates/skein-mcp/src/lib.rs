//! MCP (Model Context Protocol) client.
//!
//! Connects to MCP servers over HTTP (streamable or legacy SSE), a child
//! process's stdio, or a TCP/Unix socket, and exposes the protocol's method
//! families as typed façades.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpClient / façades                                        │
//! │  - Tools, Resources, Prompts, Completion, Logging           │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Session                                                    │
//! │  - initialize handshake, version negotiation                │
//! │  - request ids, retries, expiry recovery                    │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Transport (HTTP | stdio | socket)                          │
//! │  - JSON-RPC 2.0 framing via codec                           │
//! │  - response correlation, server notifications               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use skein_mcp::{McpClient, McpServerConfig};
//!
//! let config = McpServerConfig::new("sqlite", "mcp-server-sqlite")
//!     .with_arg("--db")
//!     .with_arg("/path/to/database.db");
//!
//! // Spawns the server and runs the handshake.
//! let client = McpClient::connect(config)?;
//!
//! for tool in client.list_tools()? {
//!     println!("Tool: {} - {:?}", tool.name, tool.description);
//! }
//!
//! let result = client.call_tool("query", Some(json!({"sql": "SELECT * FROM users"})));
//! println!("Result: {:?}", result.text());
//! ```
//!
//! Every transport carries newline-free JSON-RPC messages; stdio and socket
//! transports separate them with `\n`, HTTP carries one message (or batch)
//! per body or SSE event.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod facade;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{McpClient, McpServerConfig};
pub use config::{AuthConfig, Endpoint, HttpMode, SocketAddress, TransportConfig};
pub use error::{ErrorKind, McpError, Result};
pub use facade::{
    Completion, Lifecycle, LogSink, Logging, Prompts, Resources, ToolCall, ToolResult, Tools,
    expand_template,
};
pub use protocol::{
    CallToolResult, CompletionArgument, CompletionReference, CompletionResult, Content,
    GetPromptResult, Implementation, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, LoggingLevel, LoggingMessage, Message, Page, Prompt, RequestId, Resource,
    ResourceContents, ResourceTemplate, Tool,
};
pub use session::{Session, SessionInfo, SessionOptions, SessionState};
pub use transport::{ConnectionState, Transport, TransportCapability, TransportKind};
