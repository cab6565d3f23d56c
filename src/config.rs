use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub binaries: BinaryConfig,
  #[serde(default)]
  pub mirror: MirrorConfig,
  /// Database file (defaults to $XDG_DATA_HOME/casesync/casesync.db)
  pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Base URL of the case study API (e.g., "https://cases.example.com/api")
  pub base_url: String,
  /// Base URL of the upstream customer/item directory
  pub directory_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Seconds between timer-driven drain passes while online
  pub interval_secs: u64,
  pub max_retries: u32,
  pub request_timeout_secs: u64,
  /// Surface server rejections immediately instead of spending retries on them
  pub fail_fast_on_rejection: bool,
  /// Seconds between connectivity probes when the CLI watches the remote
  pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_secs: 30,
      max_retries: 3,
      request_timeout_secs: 30,
      fail_fast_on_rejection: false,
      probe_interval_secs: 10,
    }
  }
}

impl SyncConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BinaryConfig {
  /// Largest single file accepted, before encoding
  pub max_object_bytes: u64,
  /// Ceiling on total stored binary bytes, after encoding
  pub quota_bytes: u64,
  /// Longer side of the thumbnail bounding box, in pixels
  pub thumbnail_max_side: u32,
  /// JPEG quality used for thumbnails (1-100)
  pub thumbnail_quality: u8,
}

impl Default for BinaryConfig {
  fn default() -> Self {
    Self {
      max_object_bytes: 5 * 1024 * 1024,
      quota_bytes: 50 * 1024 * 1024,
      thumbnail_max_side: 320,
      thumbnail_quality: 70,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
  pub ttl_secs: u64,
  /// Upper bound for one serialized chunk
  pub chunk_budget_bytes: usize,
  /// Hard per-key limit of the cache backend
  pub max_entry_bytes: usize,
  pub fetch_timeout_secs: u64,
  pub page_size: usize,
}

impl Default for MirrorConfig {
  fn default() -> Self {
    Self {
      ttl_secs: 3600,
      chunk_budget_bytes: 900 * 1024,
      max_entry_bytes: 1024 * 1024,
      fetch_timeout_secs: 120,
      page_size: 500,
    }
  }
}

impl MirrorConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_secs(self.ttl_secs)
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_secs(self.fetch_timeout_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./casesync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/casesync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(Error::Config(format!("Config file not found: {}", p.display())));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(Error::Config(
        "No configuration file found. Create one at ~/.config/casesync/config.yaml".to_string(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("casesync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("casesync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    Self::parse(&contents)
      .map_err(|e| Error::Config(format!("Failed to parse config file {}: {}", path.display(), e)))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Directory holding the database and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("casesync"))
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database_path {
      Some(p) => Ok(p.clone()),
      None => Ok(Self::data_dir()?.join("casesync.db")),
    }
  }

  /// Get the API token from environment variables.
  ///
  /// Checks CASESYNC_API_TOKEN first, then CASESYNC_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("CASESYNC_API_TOKEN")
      .or_else(|_| std::env::var("CASESYNC_TOKEN"))
      .map_err(|_| {
        Error::Config("API token not found. Set CASESYNC_API_TOKEN environment variable.".to_string())
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse(
      "remote:\n  base_url: https://cases.example.com/api\n  directory_url: https://dir.example.com\n",
    )
    .unwrap();

    assert_eq!(config.sync.max_retries, 3);
    assert_eq!(config.binaries.quota_bytes, 50 * 1024 * 1024);
    assert_eq!(config.binaries.max_object_bytes, 5 * 1024 * 1024);
    assert!(config.mirror.chunk_budget_bytes < config.mirror.max_entry_bytes);
    assert!(!config.sync.fail_fast_on_rejection);
  }

  #[test]
  fn test_partial_section_override() {
    let config = Config::parse(
      "remote:\n  base_url: a\n  directory_url: b\nsync:\n  max_retries: 5\nmirror:\n  ttl_secs: 60\n",
    )
    .unwrap();

    assert_eq!(config.sync.max_retries, 5);
    assert_eq!(config.sync.interval_secs, 30);
    assert_eq!(config.mirror.ttl(), Duration::from_secs(60));
  }

  #[test]
  fn test_load_from_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("casesync.yaml");
    std::fs::write(
      &path,
      "remote:\n  base_url: a\n  directory_url: b\ndatabase_path: /tmp/x.db\n",
    )
    .unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/x.db"));
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let err = Config::load(Some(Path::new("/nonexistent/casesync.yaml"))).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
  }
}
