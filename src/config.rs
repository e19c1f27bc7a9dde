//! Sync layer configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Tunables for the sync coordinator.
///
/// All fields have defaults, so embedding applications can construct the
/// config directly or load it from a YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// How long cached entries stay fresh, in seconds.
  #[serde(default = "default_cache_ttl_secs")]
  pub cache_ttl_secs: u64,

  /// Timeout applied to every remote store call, in milliseconds.
  #[serde(default = "default_remote_timeout_ms")]
  pub remote_timeout_ms: u64,

  /// Connectivity assumed at startup when the environment reports
  /// nothing. Online is the safe default: a failing remote call degrades
  /// to queueing on the next attempt.
  #[serde(default = "default_assume_online")]
  pub assume_online: bool,
}

fn default_cache_ttl_secs() -> u64 {
  300
}

fn default_remote_timeout_ms() -> u64 {
  10_000
}

fn default_assume_online() -> bool {
  true
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      cache_ttl_secs: default_cache_ttl_secs(),
      remote_timeout_ms: default_remote_timeout_ms(),
      assume_online: default_assume_online(),
    }
  }
}

impl SyncConfig {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offsync/config.yaml
  ///
  /// Falls back to defaults when no file exists.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(ConfigError::NotFound(p.display().to_string()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
      path: path.display().to_string(),
      source: e,
    })?;

    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
      path: path.display().to_string(),
      source: e,
    })
  }

  /// Cache TTL as a chrono duration.
  pub fn cache_ttl(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.cache_ttl_secs as i64)
  }

  /// Remote-call timeout as a std duration.
  pub fn remote_timeout(&self) -> std::time::Duration {
    std::time::Duration::from_millis(self.remote_timeout_ms)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = SyncConfig::default();
    assert_eq!(config.cache_ttl(), chrono::Duration::minutes(5));
    assert_eq!(config.remote_timeout(), std::time::Duration::from_secs(10));
    assert!(config.assume_online);
  }

  #[test]
  fn test_partial_yaml_fills_defaults() {
    let config: SyncConfig = serde_yaml::from_str("cache_ttl_secs: 60").unwrap();
    assert_eq!(config.cache_ttl_secs, 60);
    assert_eq!(config.remote_timeout_ms, 10_000);
    assert!(config.assume_online);
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = SyncConfig::load(Some(Path::new("/nonexistent/offsync.yaml"))).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(_)));
  }
}
