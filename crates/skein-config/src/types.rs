//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [transport]              # defaults for every server
//! [[servers]]              # one entry per MCP server
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skein_mcp::{Endpoint, HttpMode, McpServerConfig, SessionOptions, TransportConfig};

use crate::{ConfigError, Result};

/// Header used for API keys when none is named.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkeinConfig {
    /// Transport defaults applied before per-server overrides.
    pub transport: Option<TransportDefaults>,

    /// Configured servers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<ServerEntry>,
}

impl SkeinConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Transport defaults merge field by field; servers are replaced by name
    /// and new names are appended.
    pub fn merge(&mut self, other: SkeinConfig) {
        match (&mut self.transport, other.transport) {
            (Some(base), Some(layer)) => base.merge(layer),
            (base @ None, Some(layer)) => *base = Some(layer),
            (_, None) => {}
        }

        for entry in other.servers {
            match self.servers.iter_mut().find(|s| s.name == entry.name) {
                Some(existing) => *existing = entry,
                None => self.servers.push(entry),
            }
        }
    }

    /// Look up a server by name.
    pub fn server(&self, name: &str) -> Option<&ServerEntry> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Servers that are not disabled.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerEntry> {
        self.servers.iter().filter(|s| s.enabled)
    }

    /// Build the connection config for a named server, reading credentials
    /// from the process environment.
    pub fn server_config(&self, name: &str) -> Result<McpServerConfig> {
        let entry = self
            .server(name)
            .ok_or_else(|| ConfigError::ServerNotFound(name.to_string()))?;
        entry.to_server_config(self.transport.as_ref())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Transport settings shared by all servers (`[transport]`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Base backoff between retries, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff_ms: Option<u64>,
    /// Proxy URL for HTTP servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_tls: Option<bool>,
}

impl TransportDefaults {
    /// Overlay the fields `other` sets.
    pub fn merge(&mut self, other: TransportDefaults) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }
        take(&mut self.connect_timeout_secs, other.connect_timeout_secs);
        take(&mut self.read_timeout_secs, other.read_timeout_secs);
        take(&mut self.write_timeout_secs, other.write_timeout_secs);
        take(&mut self.idle_timeout_secs, other.idle_timeout_secs);
        take(&mut self.max_retries, other.max_retries);
        take(&mut self.retry_backoff_ms, other.retry_backoff_ms);
        take(&mut self.proxy, other.proxy);
        take(&mut self.verify_tls, other.verify_tls);
    }

    /// Apply these defaults to a transport config.
    pub fn apply(&self, mut config: TransportConfig) -> TransportConfig {
        if let Some(secs) = self.connect_timeout_secs {
            config = config.with_connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.read_timeout_secs {
            config = config.with_read_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.write_timeout_secs {
            config = config.with_write_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.idle_timeout_secs {
            config = config.with_idle_timeout(Duration::from_secs(secs));
        }
        if let Some(retries) = self.max_retries {
            config = config.with_max_retries(retries);
        }
        if let Some(ms) = self.retry_backoff_ms {
            config = config.with_retry_backoff(Duration::from_millis(ms));
        }
        if let Some(proxy) = &self.proxy {
            config = config.with_proxy(proxy.clone());
        }
        if let Some(verify) = self.verify_tls {
            config = config.with_verify_tls(verify);
        }
        config
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Servers
// ─────────────────────────────────────────────────────────────────────────────

/// Transport type for a server entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServerTransport {
    /// Spawn a child process and talk over its stdio.
    #[default]
    Stdio,
    /// Remote server over HTTP.
    Http,
    /// TCP or Unix socket.
    Socket,
}

/// Configuration for a single MCP server (`[[servers]]`).
///
/// ```toml
/// [[servers]]
/// name = "files"
/// command = "mcp-server-filesystem"
/// args = ["/tmp"]
/// env = [["DEBUG", "1"]]
///
/// [[servers]]
/// name = "remote"
/// transport = "http"
/// url = "https://mcp.example.com/mcp"
/// bearer_token_env = "REMOTE_TOKEN"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEntry {
    /// Unique name for this server.
    pub name: String,
    /// Transport type. Defaults to stdio.
    pub transport: ServerTransport,
    /// Command to execute (stdio).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub command: String,
    /// Command arguments (stdio).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment variables as [key, value] pairs (stdio).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<[String; 2]>,
    /// Working directory (stdio).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Endpoint URL (http).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// `streamable`, `legacy` or `auto` (http). Defaults to auto.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_mode: Option<String>,
    /// `host:port` or `unix:/path` (socket).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// HTTP headers as [key, value] pairs.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<[String; 2]>,
    /// Bearer token, literally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    /// Environment variable holding the bearer token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token_env: Option<String>,
    /// API key, literally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable holding the API key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Header carrying the API key. Defaults to `X-API-Key`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_header: Option<String>,
    /// Per-request timeout in seconds, overriding `[transport]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Retry budget, overriding `[transport]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Pin the protocol version instead of negotiating.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    /// Validate tool arguments against their input schema before calling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validate_arguments: Option<bool>,
    /// Whether this server is enabled. Defaults to true.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ServerEntry {
    /// Create a new server entry for stdio transport.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            enabled: true,
            ..Self::default()
        }
    }

    /// Create a new server entry for HTTP transport.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: ServerTransport::Http,
            url: Some(url.into()),
            enabled: true,
            ..Self::default()
        }
    }

    /// Create a new server entry for a socket.
    pub fn socket(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: ServerTransport::Socket,
            address: Some(address.into()),
            enabled: true,
            ..Self::default()
        }
    }

    /// Add an argument (stdio).
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add an environment variable (stdio).
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push([key.into(), value.into()]);
        self
    }

    /// Add an HTTP header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push([key.into(), value.into()]);
        self
    }

    /// Read the bearer token from an environment variable.
    pub fn with_bearer_token_env(mut self, var: impl Into<String>) -> Self {
        self.bearer_token_env = Some(var.into());
        self
    }

    /// Set request timeout in seconds.
    pub fn with_timeout_secs(mut self, timeout: u64) -> Self {
        self.timeout_secs = Some(timeout);
        self
    }

    /// Set number of retries.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Set enabled state.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Environment variables as tuples.
    pub fn env_tuples(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|[k, v]| (k.clone(), v.clone()))
            .collect()
    }

    /// Whether a credential is written into the file itself.
    pub fn has_plaintext_secret(&self) -> bool {
        self.bearer_token.is_some() || self.api_key.is_some()
    }

    /// Human-readable location of the server.
    pub fn target(&self) -> String {
        match self.transport {
            ServerTransport::Stdio => {
                let mut target = self.command.clone();
                for arg in &self.args {
                    target.push(' ');
                    target.push_str(arg);
                }
                target
            }
            ServerTransport::Http => self.url.clone().unwrap_or_default(),
            ServerTransport::Socket => self.address.clone().unwrap_or_default(),
        }
    }

    /// Build the connection config, reading credentials from the process
    /// environment.
    pub fn to_server_config(&self, defaults: Option<&TransportDefaults>) -> Result<McpServerConfig> {
        self.to_server_config_with(defaults, |var| std::env::var(var).ok())
    }

    /// Build the connection config, resolving credential variables with `lookup`.
    pub fn to_server_config_with<F>(
        &self,
        defaults: Option<&TransportDefaults>,
        lookup: F,
    ) -> Result<McpServerConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = self.endpoint()?;

        let mut transport = match defaults {
            Some(defaults) => defaults.apply(TransportConfig::default()),
            None => TransportConfig::default(),
        };
        if let Some(secs) = self.timeout_secs {
            transport = transport.with_read_timeout(Duration::from_secs(secs));
        }
        if let Some(retries) = self.retries {
            transport = transport.with_max_retries(retries);
        }
        for [key, value] in &self.headers {
            transport = transport.with_header(key.clone(), value.clone());
        }
        if let Some(token) = self.secret(&self.bearer_token, &self.bearer_token_env, &lookup)? {
            transport = transport.with_bearer_token(token);
        }
        if let Some(key) = self.secret(&self.api_key, &self.api_key_env, &lookup)? {
            let header = self
                .api_key_header
                .clone()
                .unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string());
            transport = transport.with_api_key(header, key);
        }

        let mut options = SessionOptions::default();
        if let Some(version) = &self.protocol_version {
            options = options.with_protocol_version(version.clone());
        }
        if let Some(validate) = self.validate_arguments {
            options = options.with_tool_argument_validation(validate);
        }

        Ok(McpServerConfig::with_endpoint(self.name.clone(), endpoint)
            .with_transport(transport)
            .with_options(options))
    }

    fn endpoint(&self) -> Result<Endpoint> {
        match self.transport {
            ServerTransport::Stdio => {
                if self.command.is_empty() {
                    return Err(ConfigError::missing("command", &self.name));
                }
                Ok(Endpoint::Stdio {
                    command: self.command.clone(),
                    args: self.args.clone(),
                    env: self.env_tuples(),
                    cwd: self.cwd.clone(),
                })
            }
            ServerTransport::Http => {
                let url = self
                    .url
                    .clone()
                    .ok_or_else(|| ConfigError::missing("url", &self.name))?;
                let mode = match &self.http_mode {
                    Some(mode) => mode.parse::<HttpMode>().map_err(|_| ConfigError::InvalidValue {
                        field: "http_mode".to_string(),
                        value: mode.clone(),
                        context: format!("server '{}'", self.name),
                    })?,
                    None => HttpMode::Auto,
                };
                Ok(Endpoint::Http { url, mode })
            }
            ServerTransport::Socket => {
                let address = self
                    .address
                    .as_deref()
                    .ok_or_else(|| ConfigError::missing("address", &self.name))?;
                Ok(Endpoint::socket(address))
            }
        }
    }

    /// A literal value wins over an environment variable.
    fn secret<F>(
        &self,
        literal: &Option<String>,
        env_var: &Option<String>,
        lookup: &F,
    ) -> Result<Option<String>>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = literal {
            return Ok(Some(value.clone()));
        }
        match env_var {
            Some(var) => lookup(var).map(Some).ok_or_else(|| ConfigError::SecretNotFound {
                server: self.name.clone(),
                env_var: var.clone(),
            }),
            None => Ok(None),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use skein_mcp::SocketAddress;

    const SAMPLE: &str = r#"
[transport]
connect_timeout_secs = 5
read_timeout_secs = 20
max_retries = 1
verify_tls = false

[[servers]]
name = "files"
command = "mcp-server-filesystem"
args = ["/tmp"]
env = [["DEBUG", "1"]]

[[servers]]
name = "remote"
transport = "http"
url = "https://mcp.example.com/mcp"
http_mode = "streamable"
bearer_token_env = "REMOTE_TOKEN"
headers = [["X-Team", "qa"]]
timeout_secs = 45

[[servers]]
name = "local"
transport = "socket"
address = "unix:/run/mcp.sock"
enabled = false
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_sample() {
        let config = SkeinConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.servers.len(), 3);
        assert_eq!(config.transport.as_ref().unwrap().max_retries, Some(1));

        let files = config.server("files").unwrap();
        assert_eq!(files.transport, ServerTransport::Stdio);
        assert!(files.enabled);
        assert_eq!(
            files.env_tuples(),
            vec![("DEBUG".to_string(), "1".to_string())]
        );

        let names: Vec<&str> = config.enabled_servers().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["files", "remote"]);
    }

    #[test]
    fn test_stdio_conversion_applies_defaults() {
        let config = SkeinConfig::from_toml(SAMPLE).unwrap();
        let server = config.server_config("files").unwrap();
        assert!(server.is_stdio());
        assert_eq!(server.transport.connect_timeout, Duration::from_secs(5));
        assert_eq!(server.transport.read_timeout, Duration::from_secs(20));
        assert_eq!(server.transport.max_retries, 1);
        assert!(!server.transport.verify_tls);
    }

    #[test]
    fn test_http_conversion_resolves_token() {
        let config = SkeinConfig::from_toml(SAMPLE).unwrap();
        let entry = config.server("remote").unwrap();
        let server = entry
            .to_server_config_with(config.transport.as_ref(), |var| {
                (var == "REMOTE_TOKEN").then(|| "s3cret".to_string())
            })
            .unwrap();

        assert_eq!(
            server.endpoint,
            Endpoint::Http {
                url: "https://mcp.example.com/mcp".to_string(),
                mode: HttpMode::Streamable,
            }
        );
        // Per-server timeout beats the [transport] default.
        assert_eq!(server.transport.read_timeout, Duration::from_secs(45));
        let headers = server.transport.request_headers();
        assert!(headers.contains(&("X-Team".to_string(), "qa".to_string())));
        assert!(headers.contains(&("Authorization".to_string(), "Bearer s3cret".to_string())));
    }

    #[test]
    fn test_missing_secret_is_an_error() {
        let config = SkeinConfig::from_toml(SAMPLE).unwrap();
        let err = config
            .server("remote")
            .unwrap()
            .to_server_config_with(None, no_env)
            .unwrap_err();
        assert!(matches!(err, ConfigError::SecretNotFound { ref env_var, .. } if env_var == "REMOTE_TOKEN"));
    }

    #[test]
    fn test_socket_conversion() {
        let config = SkeinConfig::from_toml(SAMPLE).unwrap();
        let server = config.server_config("local").unwrap();
        assert_eq!(
            server.socket_address(),
            Some(&SocketAddress::Unix(PathBuf::from("/run/mcp.sock")))
        );
    }

    #[test]
    fn test_api_key_header() {
        let mut entry = ServerEntry::http("keyed", "http://localhost:9000/mcp");
        entry.api_key = Some("k-123".to_string());
        assert!(entry.has_plaintext_secret());
        let server = entry.to_server_config_with(None, no_env).unwrap();
        assert!(
            server
                .transport
                .request_headers()
                .contains(&(DEFAULT_API_KEY_HEADER.to_string(), "k-123".to_string()))
        );
    }

    #[test]
    fn test_missing_fields() {
        let err = ServerEntry::new("empty", "")
            .to_server_config_with(None, no_env)
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref field, .. } if field == "command"));

        let mut entry = ServerEntry::new("web", "");
        entry.transport = ServerTransport::Http;
        let err = entry.to_server_config_with(None, no_env).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref field, .. } if field == "url"));
    }

    #[test]
    fn test_invalid_http_mode() {
        let mut entry = ServerEntry::http("web", "http://localhost/mcp");
        entry.http_mode = Some("carrier-pigeon".to_string());
        let err = entry.to_server_config_with(None, no_env).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_protocol_pin_and_validation() {
        let mut entry = ServerEntry::new("pinned", "server");
        entry.protocol_version = Some("2024-11-05".to_string());
        entry.validate_arguments = Some(true);
        let server = entry.to_server_config_with(None, no_env).unwrap();
        assert_eq!(server.options.protocol_version, "2024-11-05");
        assert_eq!(server.options.supported_versions, vec!["2024-11-05"]);
        assert!(server.options.validate_tool_arguments);
    }

    #[test]
    fn test_merge_by_name() {
        let mut base = SkeinConfig::from_toml(SAMPLE).unwrap();
        let layer = SkeinConfig::from_toml(
            r#"
[transport]
read_timeout_secs = 99

[[servers]]
name = "files"
command = "other-fs-server"

[[servers]]
name = "extra"
command = "extra-server"
"#,
        )
        .unwrap();
        base.merge(layer);

        let transport = base.transport.as_ref().unwrap();
        assert_eq!(transport.read_timeout_secs, Some(99));
        // Untouched defaults survive.
        assert_eq!(transport.connect_timeout_secs, Some(5));

        assert_eq!(base.servers.len(), 4);
        assert_eq!(base.server("files").unwrap().command, "other-fs-server");
        assert!(base.server("files").unwrap().args.is_empty());
        assert_eq!(base.servers.last().unwrap().name, "extra");
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = SkeinConfig::from_toml(SAMPLE).unwrap();
        let text = config.to_toml().unwrap();
        assert_eq!(SkeinConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_entry_builders() {
        let entry = ServerEntry::new("sqlite", "mcp-server-sqlite")
            .with_arg("--db")
            .with_arg("/path/to/db.sqlite")
            .with_env("DEBUG", "1")
            .with_timeout_secs(10)
            .with_retries(2)
            .with_enabled(true);
        assert_eq!(entry.args, vec!["--db", "/path/to/db.sqlite"]);
        assert_eq!(entry.target(), "mcp-server-sqlite --db /path/to/db.sqlite");
        assert_eq!(entry.timeout_secs, Some(10));

        let remote = ServerEntry::http("r", "https://x/mcp")
            .with_header("X-A", "1")
            .with_bearer_token_env("TOKEN");
        assert_eq!(remote.target(), "https://x/mcp");
        assert!(!remote.has_plaintext_secret());
    }
}
