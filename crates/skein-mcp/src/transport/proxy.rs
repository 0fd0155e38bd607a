//! Proxy and client construction for the HTTP transport.

use reqwest::blocking::{Client, ClientBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::config::TransportConfig;
use crate::error::{McpError, Result};

/// Parse a proxy URL into a proxy applied to every scheme.
pub fn build_proxy(url: &str) -> Result<reqwest::Proxy> {
    url::Url::parse(url).map_err(|e| McpError::transport(format!("invalid proxy URL: {}", e)))?;
    reqwest::Proxy::all(url)
        .map_err(|e| McpError::transport(format!("invalid proxy URL '{}': {}", url, e)))
}

/// Custom and auth headers as a header map.
pub(crate) fn default_headers(config: &TransportConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (key, value) in config.request_headers() {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| McpError::transport(format!("invalid header name '{}': {}", key, e)))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| McpError::transport(format!("invalid value for header '{}': {}", key, e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Shared builder settings: proxy, TLS, headers, connect timeout.
fn base_builder(config: &TransportConfig) -> Result<ClientBuilder> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .default_headers(default_headers(config)?)
        .danger_accept_invalid_certs(!config.verify_tls);

    if let Some(proxy) = &config.proxy {
        builder = builder.proxy(build_proxy(proxy)?);
    }
    if !config.verify_tls {
        tracing::warn!("TLS certificate verification disabled");
    }
    Ok(builder)
}

/// Client for plain request/response traffic, bounded by the read timeout.
pub(crate) fn request_client(config: &TransportConfig) -> Result<Client> {
    base_builder(config)?
        .timeout(config.read_timeout)
        .pool_max_idle_per_host(5)
        .build()
        .map_err(|e| McpError::transport(format!("failed to build HTTP client: {}", e)))
}

/// Client for long-lived event streams; only idle gaps are bounded, by the reader.
pub(crate) fn stream_client(config: &TransportConfig) -> Result<Client> {
    base_builder(config)?
        .timeout(None)
        .build()
        .map_err(|e| McpError::transport(format!("failed to build HTTP stream client: {}", e)))
}
