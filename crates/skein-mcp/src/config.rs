//! Transport-agnostic connection settings and endpoint descriptions.

use std::path::PathBuf;
use std::time::Duration;

use crate::transport::TransportKind;

/// Upper bound on a single retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Credentials attached to every outgoing HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthConfig {
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// A custom header carrying an API key.
    ApiKey {
        /// Header name, e.g. `X-API-Key`.
        header: String,
        /// Key value.
        key: String,
    },
}

impl AuthConfig {
    /// Header name and value for this credential.
    pub fn header(&self) -> (String, String) {
        match self {
            Self::Bearer(token) => ("Authorization".to_string(), format!("Bearer {}", token)),
            Self::ApiKey { header, key } => (header.clone(), key.clone()),
        }
    }
}

/// Timeouts, retry budget and network options shared by all transports.
///
/// Transports take a clone at construction, so changing a config afterwards
/// does not affect a live connection.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Time allowed to establish a connection or spawn a process.
    pub connect_timeout: Duration,
    /// Time allowed for a response to a single request.
    pub read_timeout: Duration,
    /// Time allowed for a single write.
    pub write_timeout: Duration,
    /// Longest silence tolerated between events on a stream.
    pub idle_timeout: Duration,
    /// Retries after the first attempt for retryable failures.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub retry_backoff: Duration,
    /// Proxy URL for HTTP transports.
    pub proxy: Option<String>,
    /// Verify TLS certificates.
    pub verify_tls: bool,
    /// Extra headers sent with every HTTP request.
    pub headers: Vec<(String, String)>,
    /// Credentials for HTTP transports.
    pub auth: Option<AuthConfig>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            proxy: None,
            verify_tls: true,
            headers: Vec::new(),
            auth: None,
        }
    }
}

impl TransportConfig {
    /// Config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-request read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the stream idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the number of retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the backoff base.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Route HTTP traffic through a proxy.
    pub fn with_proxy(mut self, url: impl Into<String>) -> Self {
        self.proxy = Some(url.into());
        self
    }

    /// Enable or disable certificate verification.
    pub fn with_verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Authenticate with a bearer token.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(AuthConfig::Bearer(token.into()));
        self
    }

    /// Authenticate with an API key header.
    pub fn with_api_key(mut self, header: impl Into<String>, key: impl Into<String>) -> Self {
        self.auth = Some(AuthConfig::ApiKey {
            header: header.into(),
            key: key.into(),
        });
        self
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.retry_backoff
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY)
    }

    /// Configured headers followed by the auth header, if any.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        if let Some(auth) = &self.auth {
            headers.push(auth.header());
        }
        headers
    }
}

/// Flavour of the HTTP transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HttpMode {
    /// One endpoint; responses as JSON or an event stream per POST.
    Streamable,
    /// GET event stream plus a POST endpoint announced by the server.
    LegacySse,
    /// Streamable, falling back to legacy when the server rejects the POST.
    #[default]
    Auto,
}

impl std::str::FromStr for HttpMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "streamable" | "streamable-http" => Ok(Self::Streamable),
            "legacy" | "sse" | "legacy-sse" => Ok(Self::LegacySse),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown HTTP mode '{}'", other)),
        }
    }
}

/// Address of a socket server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddress {
    /// `host:port`.
    Tcp(String),
    /// Filesystem path of a Unix domain socket.
    Unix(PathBuf),
}

impl SocketAddress {
    /// `unix:/path` or anything containing a `/` is a Unix socket; the rest is TCP.
    pub fn parse(address: &str) -> Self {
        if let Some(path) = address.strip_prefix("unix:") {
            Self::Unix(PathBuf::from(path))
        } else if address.contains('/') {
            Self::Unix(PathBuf::from(address))
        } else {
            Self::Tcp(address.to_string())
        }
    }
}

impl std::fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(addr) => f.write_str(addr),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Where and how to reach a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Remote server over HTTP.
    Http {
        /// Endpoint URL.
        url: String,
        /// Streamable, legacy, or auto-detect.
        mode: HttpMode,
    },
    /// Local server spawned as a child process.
    Stdio {
        /// Program to run.
        command: String,
        /// Program arguments.
        args: Vec<String>,
        /// Extra environment variables.
        env: Vec<(String, String)>,
        /// Working directory.
        cwd: Option<PathBuf>,
    },
    /// Server listening on a socket.
    Socket {
        /// TCP or Unix address.
        address: SocketAddress,
    },
}

impl Endpoint {
    /// HTTP endpoint with auto-detected mode.
    pub fn http(url: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            mode: HttpMode::Auto,
        }
    }

    /// Child-process endpoint without arguments.
    pub fn stdio(command: impl Into<String>) -> Self {
        Self::Stdio {
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Socket endpoint; see [`SocketAddress::parse`].
    pub fn socket(address: &str) -> Self {
        Self::Socket {
            address: SocketAddress::parse(address),
        }
    }

    /// Transport this endpoint selects.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Http { .. } => TransportKind::Http,
            Self::Stdio { .. } => TransportKind::Stdio,
            Self::Socket { .. } => TransportKind::Socket,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http { url, .. } => f.write_str(url),
            Self::Stdio { command, args, .. } => {
                f.write_str(command)?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
            Self::Socket { address } => write!(f, "{}", address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert!(config.verify_tls);
        assert!(config.headers.is_empty());
        assert!(config.auth.is_none());
    }

    #[test]
    fn test_builder() {
        let config = TransportConfig::new()
            .with_read_timeout(Duration::from_secs(5))
            .with_max_retries(0)
            .with_proxy("http://proxy:3128")
            .with_verify_tls(false)
            .with_header("X-Team", "qa")
            .with_bearer_token("t0k");

        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.proxy.as_deref(), Some("http://proxy:3128"));
        assert!(!config.verify_tls);
        assert_eq!(
            config.request_headers(),
            vec![
                ("X-Team".to_string(), "qa".to_string()),
                ("Authorization".to_string(), "Bearer t0k".to_string()),
            ]
        );
    }

    #[test]
    fn test_api_key_header() {
        let config = TransportConfig::new().with_api_key("X-API-Key", "secret");
        assert_eq!(
            config.request_headers(),
            vec![("X-API-Key".to_string(), "secret".to_string())]
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = TransportConfig::new().with_retry_backoff(Duration::from_millis(100));
        assert_eq!(config.backoff_for(0), Duration::from_millis(100));
        assert_eq!(config.backoff_for(1), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(800));
        assert_eq!(config.backoff_for(30), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_socket_address_parse() {
        assert_eq!(
            SocketAddress::parse("127.0.0.1:9000"),
            SocketAddress::Tcp("127.0.0.1:9000".into())
        );
        assert_eq!(
            SocketAddress::parse("unix:/tmp/mcp.sock"),
            SocketAddress::Unix(PathBuf::from("/tmp/mcp.sock"))
        );
        assert_eq!(
            SocketAddress::parse("/run/mcp.sock"),
            SocketAddress::Unix(PathBuf::from("/run/mcp.sock"))
        );
    }

    #[test]
    fn test_endpoint_kind_and_display() {
        let endpoint = Endpoint::Stdio {
            command: "mcp-server".into(),
            args: vec!["--root".into(), "/tmp".into()],
            env: Vec::new(),
            cwd: None,
        };
        assert_eq!(endpoint.kind(), TransportKind::Stdio);
        assert_eq!(endpoint.to_string(), "mcp-server --root /tmp");
        assert_eq!(Endpoint::http("http://x/mcp").kind(), TransportKind::Http);
        assert_eq!("legacy".parse::<HttpMode>(), Ok(HttpMode::LegacySse));
    }
}
