//! Finding config files and stacking them.
//!
//! Layers, lowest precedence first:
//! 1. `~/.config/skein/config.toml`, or `$SKEIN_CONFIG_DIR/config.toml`
//! 2. `./skein.toml` in the project directory
//!
//! Command-line flags are applied by the caller on top.

use std::path::{Path, PathBuf};

use crate::{ConfigError, Result, SkeinConfig};

/// Project-local file name.
const PROJECT_CONFIG_FILE: &str = "skein.toml";

/// File name inside the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Directory name under the platform config dir.
const APP_NAME: &str = "skein";

/// Overrides the user config directory when set and non-empty.
const CONFIG_DIR_ENV: &str = "SKEIN_CONFIG_DIR";

/// One config file that discovery looked at.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Where the file is (or would be).
    pub path: PathBuf,
    /// True when the file existed and parsed.
    pub loaded: bool,
}

/// Merged config plus how it was assembled.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// All layers merged.
    pub config: SkeinConfig,
    /// Every file checked, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// First file that loaded; the natural target for `save_config`.
    pub source: Option<ConfigSource>,
    /// Unparseable layers and plaintext credentials.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of the files that contributed.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Discover and merge the user and project layers.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Like [`load_config`], with `config_dir` taking the place of
/// `SKEIN_CONFIG_DIR` and the platform default.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut config = SkeinConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    let user_config_path = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => xdg_config_path(),
    };
    if let Some(path) = user_config_path {
        sources.push(load_layer(&mut config, &path, &mut warnings)?);
    }

    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project_path, &mut warnings)?);

    check_plaintext_secrets(&config, &mut warnings);

    let source = sources.iter().find(|s| s.loaded).cloned();

    Ok(LoadedConfig {
        config,
        sources,
        source,
        warnings,
    })
}

/// Parse one file.
pub fn load_config_file(path: &Path) -> Result<SkeinConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    SkeinConfig::from_toml(&contents)
}

/// Save configuration to a file, creating parent directories.
pub fn save_config(config: &SkeinConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let contents = config.to_toml()?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

/// Path of the user config file.
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// User config directory: `SKEIN_CONFIG_DIR` if set, else the platform default.
pub fn xdg_config_dir() -> Option<PathBuf> {
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join(APP_NAME)),
    }
}

/// Merge `path` into `config` if it exists. A file that fails to parse
/// becomes a warning, not an error.
fn load_layer(
    config: &mut SkeinConfig,
    path: &Path,
    warnings: &mut Vec<String>,
) -> Result<ConfigSource> {
    let mut source = ConfigSource {
        path: path.to_path_buf(),
        loaded: false,
    };
    if !path.is_file() {
        return Ok(source);
    }

    match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            source.loaded = true;
        }
        Err(e) => warnings.push(format!("Failed to load {}: {}", path.display(), e)),
    }
    Ok(source)
}

fn check_plaintext_secrets(config: &SkeinConfig, warnings: &mut Vec<String>) {
    for server in config.servers.iter().filter(|s| s.has_plaintext_secret()) {
        warnings.push(format!(
            "[[servers]] '{}' contains a plaintext credential. \
             Consider bearer_token_env or api_key_env instead.",
            server.name
        ));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    use crate::ServerEntry;

    fn isolated(project: &TempDir) -> LoadedConfig {
        let empty_config_dir = TempDir::new().unwrap();
        load_config_with_options(Some(project.path()), Some(empty_config_dir.path())).unwrap()
    }

    #[test]
    fn test_xdg_config_path_exists() {
        if let Some(p) = xdg_config_path() {
            assert!(p.ends_with("config.toml"));
        }
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[[servers]]
name = "files"
command = "mcp-server-filesystem"
"#,
        )
        .unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.server("files").unwrap().command, "mcp-server-filesystem");
    }

    #[test]
    fn test_load_config_file_not_found() {
        let err = load_config_file(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_layer_becomes_warning() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("skein.toml"), "servers = 12").unwrap();

        let loaded = isolated(&dir);
        assert!(loaded.loaded_from().is_empty());
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].starts_with("Failed to load"));
    }

    #[test]
    fn test_load_config_no_files() {
        let dir = TempDir::new().unwrap();
        let loaded = isolated(&dir);
        assert!(loaded.config.servers.is_empty());
        assert!(loaded.loaded_from().is_empty());
        assert!(loaded.source.is_none());
    }

    #[test]
    fn test_load_config_layered_merge() {
        let user_dir = TempDir::new().unwrap();
        let project_dir = TempDir::new().unwrap();

        fs::write(
            user_dir.path().join("config.toml"),
            r#"
[transport]
read_timeout_secs = 30

[[servers]]
name = "files"
command = "user-fs"

[[servers]]
name = "search"
transport = "http"
url = "https://search.example.com/mcp"
"#,
        )
        .unwrap();
        fs::write(
            project_dir.path().join("skein.toml"),
            r#"
[[servers]]
name = "files"
command = "project-fs"
args = ["."]
"#,
        )
        .unwrap();

        let loaded =
            load_config_with_options(Some(project_dir.path()), Some(user_dir.path())).unwrap();
        let config = &loaded.config;

        assert_eq!(loaded.loaded_from().len(), 2);
        assert_eq!(
            loaded.source.as_ref().unwrap().path,
            user_dir.path().join("config.toml")
        );
        // Project-local replaces the user entry of the same name.
        assert_eq!(config.server("files").unwrap().command, "project-fs");
        assert!(config.server("search").is_some());
        assert_eq!(
            config.transport.as_ref().unwrap().read_timeout_secs,
            Some(30)
        );
    }

    #[test]
    fn test_plaintext_secret_warning() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("skein.toml"),
            r#"
[[servers]]
name = "remote"
transport = "http"
url = "https://mcp.example.com/mcp"
bearer_token = "tok_secret"

[[servers]]
name = "safe"
transport = "http"
url = "https://mcp.example.com/mcp"
bearer_token_env = "SAFE_TOKEN"
"#,
        )
        .unwrap();

        let loaded = isolated(&dir);
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].contains("plaintext"));
        assert!(loaded.warnings[0].contains("'remote'"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deeper/config.toml");

        let mut config = SkeinConfig::new();
        config.servers.push(
            ServerEntry::new("sqlite", "mcp-server-sqlite")
                .with_arg("--db")
                .with_env("DEBUG", "1"),
        );
        save_config(&config, &path).unwrap();

        let reloaded = load_config_file(&path).unwrap();
        assert_eq!(reloaded, config);
    }
}
