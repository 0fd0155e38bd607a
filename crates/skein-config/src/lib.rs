//! Configuration for skein.
//!
//! Provides TOML-based configuration with:
//! - Transport defaults shared by every server (`[transport]`)
//! - Named server entries (`[[servers]]`) for stdio, HTTP and socket endpoints
//! - Config file layering (XDG user config + project-local overrides)
//! - Credentials given literally or through an environment variable
//!
//! Entries convert into [`skein_mcp::McpServerConfig`] ready for
//! [`skein_mcp::McpClient::connect`].

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    save_config, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
