use crate::domain::models::{EndpointConfig, SessionConfig};
use crate::infrastructure::bluetooth::protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "braslet".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Endpoint Settings
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_telemetry_uuid")]
    pub ble_telemetry_char_uuid: String,

    // Timing Settings
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    #[serde(default = "default_teardown_timeout_ms")]
    pub teardown_timeout_ms: u64,

    // Device Selection
    #[serde(default)]
    pub preferred_device_name: Option<String>,
    #[serde(default)]
    pub last_connected_id: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            ble_service_uuid: default_service_uuid(),
            ble_telemetry_char_uuid: default_telemetry_uuid(),
            scan_timeout_secs: default_scan_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            teardown_timeout_ms: default_teardown_timeout_ms(),
            preferred_device_name: None,
            last_connected_id: None,
        }
    }
}

fn default_service_uuid() -> String {
    protocol::SERVICE_UUID.to_string()
}
fn default_telemetry_uuid() -> String {
    protocol::TELEMETRY_CHAR_UUID.to_string()
}
fn default_scan_timeout_secs() -> u64 {
    10
}
fn default_operation_timeout_secs() -> u64 {
    10
}
fn default_teardown_timeout_ms() -> u64 {
    2000
}

impl Settings {
    /// Parse the endpoint identifiers and timings into what the sessions consume.
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let service_uuid = Uuid::parse_str(self.ble_service_uuid.trim()).map_err(|e| {
            anyhow::anyhow!("Invalid service UUID {:?}: {}", self.ble_service_uuid, e)
        })?;
        let characteristic_uuid =
            Uuid::parse_str(self.ble_telemetry_char_uuid.trim()).map_err(|e| {
                anyhow::anyhow!(
                    "Invalid telemetry characteristic UUID {:?}: {}",
                    self.ble_telemetry_char_uuid,
                    e
                )
            })?;

        Ok(SessionConfig {
            scan_timeout: Duration::from_secs(self.scan_timeout_secs),
            endpoint: EndpointConfig {
                service_uuid,
                characteristic_uuid,
            },
            operation_timeout: Duration::from_secs(self.operation_timeout_secs),
            teardown_timeout: Duration::from_millis(self.teardown_timeout_ms),
        })
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults if it is missing or invalid.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!("Using default settings ({:?}): {}", settings_path, e);
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("Braslet");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn remember_device(&mut self, id: &str) -> anyhow::Result<()> {
        if self.settings.last_connected_id.as_deref() != Some(id) {
            self.settings.last_connected_id = Some(id.to_string());
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_produce_a_valid_session_config() {
        let config = Settings::default().session_config().unwrap();
        assert_eq!(config.scan_timeout, Duration::from_secs(10));
        assert_eq!(config.teardown_timeout, Duration::from_millis(2000));
        assert_eq!(
            config.endpoint.service_uuid,
            Uuid::parse_str(protocol::SERVICE_UUID).unwrap()
        );
    }

    #[test]
    fn invalid_uuid_is_rejected() {
        let settings = Settings {
            ble_service_uuid: "YourServiceId".to_string(),
            ..Settings::default()
        };
        let err = settings.session_config().unwrap_err();
        assert!(err.to_string().contains("YourServiceId"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"scan_timeout_secs": 3}"#).unwrap();
        assert_eq!(settings.scan_timeout_secs, 3);
        assert_eq!(settings.operation_timeout_secs, 10);
        assert_eq!(settings.log_settings.level, "info");
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut service = SettingsService::with_path(path.clone());
        service.get_mut().preferred_device_name = Some("Band".to_string());
        service.remember_device("AA:BB").unwrap();

        let reloaded = SettingsService::with_path(path);
        assert_eq!(reloaded.get().preferred_device_name.as_deref(), Some("Band"));
        assert_eq!(reloaded.get().last_connected_id.as_deref(), Some("AA:BB"));
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let service = SettingsService::with_path(path);
        assert_eq!(service.get().scan_timeout_secs, 10);
    }
}
