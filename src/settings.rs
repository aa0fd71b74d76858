use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const SETTINGS_DIR: &str = "freightdesk";
const SETTINGS_FILE: &str = "settings.json";

pub const ENV_API_URL: &str = "FREIGHTDESK_API_URL";
pub const ENV_REALTIME_URL: &str = "FREIGHTDESK_REALTIME_URL";
pub const ENV_KEYRING_SERVICE: &str = "FREIGHTDESK_KEYRING_SERVICE";

#[derive(Debug, Error)]
pub enum SettingsError {
  #[error("failed to read settings file {path}: {source}")]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("invalid settings file {path}: {source}")]
  Parse {
    path: PathBuf,
    source: serde_json::Error,
  },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
  pub api_base_url: String,
  pub realtime_url: String,
  pub keyring_service: String,
  pub request_timeout_seconds: u64,
  pub connect_timeout_seconds: u64,
  pub alert_duration_ms: u64,
  pub bookings_cache_ttl_seconds: u64,
  pub realtime: RealtimeSettings,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      api_base_url: "https://api.freightdesk.app/api".to_string(),
      realtime_url: "wss://api.freightdesk.app/realtime".to_string(),
      keyring_service: "app.freightdesk.client".to_string(),
      request_timeout_seconds: 30,
      connect_timeout_seconds: 10,
      alert_duration_ms: 5_000,
      bookings_cache_ttl_seconds: 60,
      realtime: RealtimeSettings::default(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RealtimeSettings {
  pub liveness_interval_ms: u64,
  pub reconnect_delay_ms: u64,
  pub auth_retry_delay_ms: u64,
  pub backoff_min_ms: u64,
  pub backoff_max_ms: u64,
  pub max_reconnect_attempts: u32,
  pub connect_timeout_ms: u64,
}

impl Default for RealtimeSettings {
  fn default() -> Self {
    Self {
      liveness_interval_ms: 5_000,
      reconnect_delay_ms: 3_000,
      auth_retry_delay_ms: 1_000,
      backoff_min_ms: 1_000,
      backoff_max_ms: 5_000,
      max_reconnect_attempts: 5,
      connect_timeout_ms: 10_000,
    }
  }
}

impl RealtimeSettings {
  pub fn liveness_interval(&self) -> Duration {
    Duration::from_millis(self.liveness_interval_ms.max(100))
  }

  pub fn reconnect_delay(&self) -> Duration {
    Duration::from_millis(self.reconnect_delay_ms)
  }

  pub fn auth_retry_delay(&self) -> Duration {
    Duration::from_millis(self.auth_retry_delay_ms)
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_millis(self.connect_timeout_ms.max(100))
  }
}

impl Settings {
  pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(SETTINGS_DIR).join(SETTINGS_FILE))
  }

  /// Reads `path` (or the default location) and applies environment
  /// overrides. A missing file yields the defaults.
  pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
    let path = path.map(Path::to_path_buf).or_else(Self::default_path);
    let mut settings = match path {
      Some(path) => Self::read_file(&path)?,
      None => Self::default(),
    };
    settings.apply_overrides(|key| std::env::var(key).ok());
    Ok(settings)
  }

  fn read_file(path: &Path) -> Result<Self, SettingsError> {
    let data = match std::fs::read_to_string(path) {
      Ok(data) => data,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
      Err(source) => {
        return Err(SettingsError::Read {
          path: path.to_path_buf(),
          source,
        })
      }
    };
    serde_json::from_str(&data).map_err(|source| SettingsError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| {
      lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    };
    if let Some(url) = read(ENV_API_URL) {
      self.api_base_url = url;
    }
    if let Some(url) = read(ENV_REALTIME_URL) {
      self.realtime_url = url;
    }
    if let Some(service) = read(ENV_KEYRING_SERVICE) {
      self.keyring_service = service;
    }
  }

  pub fn api_url(&self, path: &str) -> String {
    format!(
      "{}/{}",
      self.api_base_url.trim_end_matches('/'),
      path.trim_start_matches('/')
    )
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_seconds.max(1))
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_secs(self.connect_timeout_seconds.max(1))
  }

  pub fn alert_duration(&self) -> Duration {
    Duration::from_millis(self.alert_duration_ms)
  }

  pub fn bookings_cache_ttl(&self) -> Duration {
    Duration::from_secs(self.bookings_cache_ttl_seconds)
  }
}
