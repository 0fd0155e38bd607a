//! Configuration error types.

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration loading and conversion.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to write a config file.
    #[error("failed to write config file '{path}': {source}")]
    WriteFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to serialize config.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field.
    #[error("missing required field '{field}' in {context}")]
    MissingField { field: String, context: String },

    /// A field holds a value that cannot be used.
    #[error("invalid value '{value}' for '{field}' in {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// No server with this name is configured.
    #[error("server '{0}' is not configured")]
    ServerNotFound(String),

    /// A credential refers to an environment variable that is not set.
    #[error("environment variable '{env_var}' for server '{server}' is not set")]
    SecretNotFound { server: String, env_var: String },
}

impl ConfigError {
    pub(crate) fn missing(field: &str, server: &str) -> Self {
        Self::MissingField {
            field: field.to_string(),
            context: format!("server '{}'", server),
        }
    }
}
