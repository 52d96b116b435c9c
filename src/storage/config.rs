//! Application configuration loaded from TOML.

use crate::persistence::BackendConfig;
use crate::recording::types::RecorderConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Signed-in user; rides cannot be saved without one
    pub user_id: Option<Uuid>,
    /// Recording settings
    pub recording: RecordingSettings,
    /// Sensor settings
    pub sensors: SensorSettings,
    /// Remote backend settings
    pub backend: BackendSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            user_id: None,
            recording: RecordingSettings::default(),
            sensors: SensorSettings::default(),
            backend: BackendSettings::default(),
        }
    }
}

impl AppConfig {
    /// Backend connection settings for the configured user.
    pub fn backend_config(&self) -> Option<BackendConfig> {
        let base_url = self.backend.base_url.clone()?;
        Some(BackendConfig {
            base_url,
            timeout_secs: self.backend.timeout_secs,
            access_token: self.backend.access_token.clone(),
            user_id: self.user_id,
        })
    }

    /// Path of the ride database inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("rides.db")
    }
}

/// Recording-related settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Autosave the session after this many applied samples
    pub autosave_every_samples: u32,
    /// Plausible lean range after calibration, in degrees
    pub max_lean_degrees: f64,
    /// Number of reported speeds averaged for display
    pub speed_smoothing_window: usize,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        let recorder = RecorderConfig::default();
        Self {
            autosave_every_samples: recorder.autosave_every_samples,
            max_lean_degrees: recorder.max_lean_degrees,
            speed_smoothing_window: recorder.speed_smoothing_window,
        }
    }
}

impl From<&RecordingSettings> for RecorderConfig {
    fn from(settings: &RecordingSettings) -> Self {
        Self {
            autosave_every_samples: settings.autosave_every_samples.max(1),
            max_lean_degrees: settings.max_lean_degrees,
            speed_smoothing_window: settings.speed_smoothing_window.max(1),
        }
    }
}

/// Sensor-related settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// Capacity of each producer's sample channel
    pub channel_capacity: usize,
    /// Record lean angle
    pub orientation_enabled: bool,
    /// Track pocket mode
    pub proximity_enabled: bool,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            orientation_enabled: true,
            proximity_enabled: true,
        }
    }
}

/// Remote backend settings. Rides are stored locally when no URL is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub access_token: Option<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 30,
            access_token: None,
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "ridetrack", "RideTrack")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load application configuration from file.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&get_config_path())
}

/// Load configuration from `path`, falling back to defaults if it does not exist.
pub fn load_config_from(path: &PathBuf) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        let config = AppConfig {
            data_dir: get_data_dir(),
            ..Default::default()
        };
        return Ok(config);
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let mut config: AppConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.data_dir = get_data_dir();

    Ok(config)
}

/// Save application configuration to file.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

pub fn save_config_to(config: &AppConfig, path: &PathBuf) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
