use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{DurableConfig, PaginationConfig, VolatileConfig};
use crate::remote::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Base URL of the remote REST endpoint, e.g. `https://xyz.supabase.co/rest/v1`
  pub url: String,
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  #[serde(default = "default_base_delay_ms")]
  pub base_delay_ms: u64,
  /// Random stretch applied to each retry delay (0.2 = up to +20%), within 0..=1
  #[serde(default = "default_jitter")]
  pub jitter: f64,
}

fn default_timeout_ms() -> u64 {
  30_000
}

fn default_max_retries() -> u32 {
  3
}

fn default_base_delay_ms() -> u64 {
  1_000
}

fn default_jitter() -> f64 {
  0.2
}

impl RemoteConfig {
  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      timeout: Duration::from_millis(self.timeout_ms),
      max_retries: self.max_retries,
      base_delay: Duration::from_millis(self.base_delay_ms),
      jitter: self.jitter,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub volatile_ttl_secs: u64,
  pub volatile_max_size: usize,
  /// User profiles change rarely
  pub user_ttl_secs: u64,
  pub settings_ttl_secs: u64,
  pub page_memory_ttl_secs: u64,
  pub page_memory_max_size: usize,
  pub page_durable_ttl_secs: u64,
  pub page_size: u32,
  pub max_pages: u32,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      volatile_ttl_secs: 5 * 60,
      volatile_max_size: 100,
      user_ttl_secs: 10 * 60,
      settings_ttl_secs: 30 * 60,
      page_memory_ttl_secs: 2 * 60,
      page_memory_max_size: 50,
      page_durable_ttl_secs: 10 * 60,
      page_size: 20,
      max_pages: 10,
    }
  }
}

impl CacheConfig {
  pub fn users(&self) -> VolatileConfig {
    VolatileConfig {
      ttl: Duration::from_secs(self.user_ttl_secs),
      max_size: self.volatile_max_size,
    }
  }

  pub fn settings(&self) -> DurableConfig {
    DurableConfig {
      prefix: "settings_".to_string(),
      ttl: Duration::from_secs(self.settings_ttl_secs),
    }
  }

  pub fn pagination(&self) -> PaginationConfig {
    PaginationConfig {
      page_size: self.page_size,
      max_pages: self.max_pages,
      memory: VolatileConfig {
        ttl: Duration::from_secs(self.page_memory_ttl_secs),
        max_size: self.page_memory_max_size,
      },
      durable: DurableConfig {
        prefix: "pagination_".to_string(),
        ttl: Duration::from_secs(self.page_durable_ttl_secs),
      },
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite file (default: $XDG_DATA_HOME/courier-sync/store.db)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./courier-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/courier-sync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/courier-sync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("courier-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("courier-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    let jitter = config.remote.jitter;
    if !(0.0..=1.0).contains(&jitter) {
      return Err(eyre!("remote.jitter must be between 0 and 1, got {}", jitter));
    }
    Ok(config)
  }

  /// Get the remote API key from environment variables.
  ///
  /// Checks COURIER_SYNC_API_KEY first, then SUPABASE_ANON_KEY as fallback.
  /// Requests go out unauthenticated when neither is set.
  pub fn get_api_key() -> Option<String> {
    std::env::var("COURIER_SYNC_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("remote:\n  url: https://example.com/rest/v1\n").unwrap();

    let policy = config.remote.retry_policy();
    assert_eq!(policy.timeout, Duration::from_secs(30));
    assert_eq!(policy.max_retries, 3);
    assert_eq!(policy.base_delay, Duration::from_secs(1));

    let pagination = config.cache.pagination();
    assert_eq!(pagination.page_size, 20);
    assert_eq!(pagination.max_pages, 10);
    assert_eq!(pagination.memory.max_size, 50);
    assert_eq!(pagination.durable.ttl, Duration::from_secs(600));
    assert_eq!(config.cache.settings().ttl, Duration::from_secs(1800));
    assert!(config.storage.path.is_none());
  }

  #[test]
  fn test_overrides() {
    let yaml = r#"
remote:
  url: https://example.com
  max_retries: 5
  jitter: 0
cache:
  page_size: 50
storage:
  path: /tmp/courier.db
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.remote.max_retries, 5);
    assert_eq!(config.remote.jitter, 0.0);
    assert_eq!(config.cache.page_size, 50);
    assert_eq!(config.cache.max_pages, 10);
    assert_eq!(config.storage.path, Some(PathBuf::from("/tmp/courier.db")));
  }

  #[test]
  fn test_invalid_jitter_rejected() {
    assert!(Config::from_yaml("remote:\n  url: https://example.com\n  jitter: .nan\n").is_err());
    assert!(Config::from_yaml("remote:\n  url: https://example.com\n  jitter: 1.5\n").is_err());
    assert!(Config::from_yaml("remote:\n  url: https://example.com\n  jitter: 1\n").is_ok());
  }

  #[test]
  fn test_missing_remote_rejected() {
    assert!(Config::from_yaml("cache:\n  page_size: 10\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path() {
    assert!(Config::load(Some(Path::new("/nonexistent/courier.yaml"))).is_err());
  }
}
