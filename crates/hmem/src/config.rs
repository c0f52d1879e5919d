//! Configuration management for hmem.
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. Environment variables (HMEM_DIR, HMEM_USER)
//! 2. Config file (~/.hmem/config.toml, or HMEM_CONFIG)
//! 3. Default values

use anyhow::{Context, Result};
use hmem_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_USER: &str = "default";

/// Config file contents. Engine sections (`decay`, `archive`, `scheduler`,
/// ...) sit at the top level next to `user` and `data_dir`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default user namespace
    pub user: Option<String>,

    /// Data directory (default: ~/.hmem)
    pub data_dir: Option<PathBuf>,

    #[serde(flatten)]
    pub engine: EngineConfig,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hmem")
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        if let Ok(dir) = std::env::var("HMEM_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }
        Ok(config)
    }

    /// Load a config file, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Get the config file path.
    pub fn config_path() -> PathBuf {
        match std::env::var("HMEM_CONFIG") {
            Ok(path) => PathBuf::from(path),
            Err(_) => default_data_dir().join("config.toml"),
        }
    }

    /// Engine configuration with the resolved data directory
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = self.engine.clone();
        engine.data_dir = self.data_dir.clone().unwrap_or_else(default_data_dir);
        engine
    }

    /// Command-line user, then config file user, then "default"
    pub fn resolve_user(&self, cli_user: Option<&str>) -> String {
        cli_user
            .or(self.user.as_deref())
            .unwrap_or(DEFAULT_USER)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp = tempdir().expect("Failed to create temp dir");
        let config = Config::load_from(&temp.path().join("config.toml")).unwrap();

        assert!(config.user.is_none());
        assert_eq!(config.engine.scheduler.age_days, 60);
        assert!(config.engine_config().data_dir.ends_with(".hmem"));
    }

    #[test]
    fn test_partial_file_overrides_sections() {
        let temp = tempdir().expect("Failed to create temp dir");
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
user = "alice"
data_dir = "/var/lib/hmem"

[scheduler]
enabled = true
interval_secs = 3600

[query]
archive_weight = 0.5
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.resolve_user(None), "alice");
        assert_eq!(config.resolve_user(Some("bob")), "bob");

        let engine = config.engine_config();
        assert_eq!(engine.data_dir, PathBuf::from("/var/lib/hmem"));
        assert!(engine.scheduler.enabled);
        assert_eq!(engine.scheduler.interval_secs, 3600);
        assert_eq!(engine.scheduler.age_days, 60);
        assert_eq!(engine.query.archive_weight, 0.5);
        assert!(engine.validate().is_ok());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp = tempdir().expect("Failed to create temp dir");
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[scheduler]\ninterval_secs = \"daily\"\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_user() {
        assert_eq!(Config::default().resolve_user(None), "default");
    }
}
