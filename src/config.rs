use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::{CacheGeneration, SqliteStorage};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin of the marketplace app; only same-origin requests are intercepted
  pub origin: String,
  /// Prefix of cache generation names (`{prefix}-{version}`)
  pub cache_prefix: String,
  /// Version of the generation this gateway installs
  pub version: String,
  /// Critical resources fetched at install time. Any failure aborts the install.
  pub precache: Vec<String>,
  /// Page served to navigations that can be satisfied by neither cache nor network
  pub offline_page: String,
  /// Activate right after install instead of waiting for SKIP_WAITING
  pub skip_waiting: bool,
  /// Path accepting share-target form posts
  pub share_target: String,
  pub routes: RouteConfig,
  pub sync: SyncConfig,
  pub network: NetworkConfig,
  pub logging: LoggingConfig,
  /// Cache database path (defaults to $XDG_DATA_HOME/vasa-gateway/cache.db)
  pub database: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
      cache_prefix: "vasa".to_string(),
      version: "v1".to_string(),
      precache: vec![
        "/".to_string(),
        "/offline.html".to_string(),
        "/manifest.json".to_string(),
        "/styles/globals.css".to_string(),
      ],
      offline_page: "/offline.html".to_string(),
      skip_waiting: false,
      share_target: "/share-target".to_string(),
      routes: RouteConfig::default(),
      sync: SyncConfig::default(),
      network: NetworkConfig::default(),
      logging: LoggingConfig::default(),
      database: None,
    }
  }
}

/// Path rules used to classify requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
  pub api_prefix: String,
  pub asset_prefixes: Vec<String>,
  /// Extensions without the leading dot
  pub asset_extensions: Vec<String>,
  /// Navigable pages served stale-while-revalidate
  pub page_prefixes: Vec<String>,
}

impl Default for RouteConfig {
  fn default() -> Self {
    Self {
      api_prefix: "/api/".to_string(),
      asset_prefixes: vec!["/icons/".to_string(), "/images/".to_string()],
      asset_extensions: ["css", "js", "png", "jpg", "svg"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
      page_prefixes: ["/search", "/listings", "/orders", "/messages"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    }
  }
}

/// Replay policy for queued offline actions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Attempts before an action is dropped
  pub max_attempts: u32,
  pub backoff_base_secs: u64,
  pub backoff_max_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      backoff_base_secs: 30,
      backoff_max_secs: 3600,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 30 }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Filter directive used when RUST_LOG is unset
  pub level: String,
  /// Also write logs to this file, rotated daily
  pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./vasa-gateway.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/vasa-gateway/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found. Environment
  /// overrides are applied last.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    config.with_env_overrides()
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("vasa-gateway.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("vasa-gateway").join("config.yaml");
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
    config.origin_url()?;
    Ok(config)
  }

  /// Apply VASA_GATEWAY_ORIGIN and VASA_GATEWAY_VERSION.
  fn with_env_overrides(mut self) -> Result<Self> {
    if let Ok(origin) = std::env::var("VASA_GATEWAY_ORIGIN") {
      self.origin = origin;
    }
    if let Ok(version) = std::env::var("VASA_GATEWAY_VERSION") {
      self.version = version;
    }
    self.origin_url()?;
    Ok(self)
  }

  /// The configured origin as a URL.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Name of the generation this gateway installs.
  pub fn generation_name(&self) -> String {
    CacheGeneration::<SqliteStorage>::name_for(&self.cache_prefix, &self.version)
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => SqliteStorage::default_path(),
    }
  }
}
