//! CLI command handlers.

pub mod call;
pub mod inspect;
pub mod read;
pub mod servers;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use skein_config::{LoadedConfig, load_config_with_options};
use skein_mcp::McpClient;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Overrides the user config directory.
    pub config_dir: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Load the layered config, surfacing loader warnings.
    pub fn load(&self) -> Result<LoadedConfig> {
        let loaded = load_config_with_options(None, self.config_dir.as_deref())?;
        for warning in &loaded.warnings {
            tracing::warn!("{}", warning);
        }
        Ok(loaded)
    }

    /// Connect to a configured server and complete the handshake.
    pub fn connect(&self, name: &str) -> Result<McpClient> {
        let loaded = self.load()?;
        let config = loaded.config.server_config(name)?;
        McpClient::connect(config).with_context(|| format!("connecting to '{}'", name))
    }
}

/// Cut `s` to `max` characters, marking the cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}
