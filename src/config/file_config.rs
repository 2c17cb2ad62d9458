//! Configuration file discovery and generation.
//!
//! # Configuration File Format
//!
//! ```toml
//! [api_keys]
//! zenodo = "your-access-token"
//!
//! [http]
//! timeout_secs = 30
//! connect_timeout_secs = 10
//!
//! [rate_limits]
//! default_requests_per_second = 5.0
//! max_concurrent_requests = 4
//!
//! [retry]
//! max_attempts = 2
//! initial_delay_ms = 1000
//!
//! [sources]
//! enabled_sources = "openneuro,dandi"
//! disabled_sources = ""
//!
//! [sources.endpoints]
//! dandi = "https://api.dandiarchive.org/api"
//!
//! [cache]
//! directory = "~/.cache/dataset-master"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use std::path::{Path, PathBuf};

use super::Config;

/// File name looked up in the working directory
const LOCAL_CONFIG_NAME: &str = "dataset-master.toml";

/// Find a configuration file in the usual places
///
/// Checks `./dataset-master.toml`, then `<config dir>/dataset-master/config.toml`.
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG_NAME);
    if local.is_file() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|dir| dir.join("dataset-master").join("config.toml"))
        .filter(|path| path.is_file())
}

/// Write `config` as TOML, refusing to overwrite unless `force` is set
pub fn write_default_config(path: &Path, config: &Config, force: bool) -> Result<(), ConfigFileError> {
    if path.exists() && !force {
        return Err(ConfigFileError::Exists(path.to_path_buf()));
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigFileError::Serialize(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigFileError::Io(e.to_string()))?;
    }
    std::fs::write(path, content).map_err(|e| ConfigFileError::Io(e.to_string()))
}

/// Configuration file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Config file already exists: {} (use --force to overwrite)", .0.display())]
    Exists(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.rate_limits.default_requests_per_second = 2.0;
        config.sources.disabled_sources = Some("physionet".to_string());

        write_default_config(&path, &config, false).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.rate_limits.default_requests_per_second, 2.0);
        assert!(!loaded.sources.is_enabled("physionet"));
    }

    #[test]
    fn test_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();

        let result = write_default_config(&path, &Config::default(), false);
        assert!(matches!(result, Err(ConfigFileError::Exists(_))));
        assert!(write_default_config(&path, &Config::default(), true).is_ok());
    }

    #[test]
    fn test_load_nonexistent() {
        let path = PathBuf::from("/nonexistent/config.toml");
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("invalid.toml");
        std::fs::write(&path, "invalid = toml = content").unwrap();

        assert!(load_config(Some(&path)).is_err());
    }
}
