//! MCP client for communicating with MCP servers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::{Endpoint, HttpMode, SocketAddress, TransportConfig};
use crate::error::Result;
use crate::facade::{Completion, Lifecycle, Logging, Prompts, Resources, ToolResult, Tools};
use crate::protocol::Tool;
use crate::session::{Session, SessionInfo, SessionOptions};

/// Configuration for an MCP server connection.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Unique name for this server.
    pub name: String,
    /// Where the server lives.
    pub endpoint: Endpoint,
    /// Timeouts, retries, and HTTP settings.
    pub transport: TransportConfig,
    /// Handshake options.
    pub options: SessionOptions,
}

impl McpServerConfig {
    /// Create a new server config for stdio transport.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_endpoint(name, Endpoint::stdio(command))
    }

    /// Create a new server config for HTTP transport.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_endpoint(name, Endpoint::http(url))
    }

    /// Create a new server config for a TCP or Unix socket.
    pub fn socket(name: impl Into<String>, address: &str) -> Self {
        Self::with_endpoint(name, Endpoint::socket(address))
    }

    /// Create a server config for any endpoint.
    pub fn with_endpoint(name: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            name: name.into(),
            endpoint,
            transport: TransportConfig::default(),
            options: SessionOptions::default(),
        }
    }

    /// Replace the arguments (stdio only).
    pub fn with_args(mut self, new_args: Vec<String>) -> Self {
        if let Endpoint::Stdio { args, .. } = &mut self.endpoint {
            *args = new_args;
        }
        self
    }

    /// Add an argument (stdio only).
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        if let Endpoint::Stdio { args, .. } = &mut self.endpoint {
            args.push(arg.into());
        }
        self
    }

    /// Add an environment variable (stdio only).
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Endpoint::Stdio { env, .. } = &mut self.endpoint {
            env.push((key.into(), value.into()));
        }
        self
    }

    /// Set the working directory (stdio only).
    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        if let Endpoint::Stdio { cwd, .. } = &mut self.endpoint {
            *cwd = Some(dir.into());
        }
        self
    }

    /// Pick the HTTP flavor (HTTP only).
    pub fn with_http_mode(mut self, new_mode: HttpMode) -> Self {
        if let Endpoint::Http { mode, .. } = &mut self.endpoint {
            *mode = new_mode;
        }
        self
    }

    /// Add an HTTP header (for HTTP transport).
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.transport = self.transport.with_header(key, value);
        self
    }

    /// Authenticate with a bearer token (for HTTP transport).
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.transport = self.transport.with_bearer_token(token);
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transport = self.transport.with_read_timeout(timeout);
        self
    }

    /// Set the number of retries for transient failures.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.transport = self.transport.with_max_retries(retries);
        self
    }

    /// Replace the transport settings.
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Replace the handshake options.
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Check if this is an HTTP transport config.
    pub fn is_http(&self) -> bool {
        matches!(self.endpoint, Endpoint::Http { .. })
    }

    /// Check if this is a stdio transport config.
    pub fn is_stdio(&self) -> bool {
        matches!(self.endpoint, Endpoint::Stdio { .. })
    }

    /// Check if this is a socket transport config.
    pub fn is_socket(&self) -> bool {
        matches!(self.endpoint, Endpoint::Socket { .. })
    }

    /// Socket address, if this is a socket config.
    pub fn socket_address(&self) -> Option<&SocketAddress> {
        match &self.endpoint {
            Endpoint::Socket { address } => Some(address),
            _ => None,
        }
    }
}

/// An MCP client connected to a single MCP server.
///
/// Owns one [`Session`] and one instance of every method façade, so the
/// tool cache and log sinks live as long as the client.
pub struct McpClient {
    config: McpServerConfig,
    session: Arc<Session>,
    lifecycle: Lifecycle,
    tools: Tools,
    resources: Resources,
    prompts: Prompts,
    completion: Completion,
    logging: Logging,
}

impl McpClient {
    /// Build the transport for `config`, connect it, and run the handshake.
    pub fn connect(config: McpServerConfig) -> Result<Self> {
        let session = Session::from_endpoint(
            config.endpoint.clone(),
            config.transport.clone(),
            config.options.clone(),
        )?
        .named(config.name.clone());
        let client = Self::from_session(config, Arc::new(session));
        let info = client.session.initialize()?;

        tracing::info!(
            server = %client.config.name,
            transport = %info.transport,
            protocol = %info.protocol_version,
            "connected to MCP server"
        );

        Ok(client)
    }

    /// Wrap an existing session without initializing it.
    pub fn from_session(config: McpServerConfig, session: Arc<Session>) -> Self {
        Self {
            lifecycle: Lifecycle::new(Arc::clone(&session)),
            tools: Tools::new(Arc::clone(&session)),
            resources: Resources::new(Arc::clone(&session)),
            prompts: Prompts::new(Arc::clone(&session)),
            completion: Completion::new(Arc::clone(&session)),
            logging: Logging::new(Arc::clone(&session)),
            config,
            session,
        }
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The configuration this client was built from.
    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    /// The underlying session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Negotiated session facts.
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.session.session_info()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn tools(&self) -> &Tools {
        &self.tools
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn prompts(&self) -> &Prompts {
        &self.prompts
    }

    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    pub fn logging(&self) -> &Logging {
        &self.logging
    }

    /// List every tool the server offers, following pagination.
    pub fn list_tools(&self) -> Result<Vec<Tool>> {
        let tools = self.tools.list_all()?;
        tracing::debug!(
            server = %self.config.name,
            tool_count = tools.len(),
            "listed MCP tools"
        );
        Ok(tools)
    }

    /// Call a tool on the server.
    pub fn call_tool(&self, name: &str, arguments: Option<Value>) -> ToolResult {
        self.tools.call(name, arguments, None)
    }

    /// Shutdown the connection gracefully.
    pub fn shutdown(&self) -> Result<()> {
        tracing::info!(server = %self.config.name, "shutting down MCP client");
        self.session.shutdown()
    }

    /// Check if the connection is still active.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        let _ = self.session.shutdown();
    }
}
