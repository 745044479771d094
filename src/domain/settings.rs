use crate::domain::values::DataFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
    /// Level for the Bluetooth stack alone, e.g. "trace" to see every
    /// descriptor write and notification without flooding the rest
    #[serde(default)]
    pub bluetooth_level: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
            bluetooth_level: None,
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
    "heart_monitor".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Filters and timings of the acquisition sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Case-insensitive substring of the peripheral's advertised name
    #[serde(default = "default_device_filter")]
    pub device_name_filter: String,
    #[serde(default = "default_service_filter")]
    pub service_name_filter: String,
    #[serde(default = "default_characteristic_filter")]
    pub characteristic_name_filter: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Extra wait after the service shows up, some peripherals need it
    /// before their characteristics can be queried
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_subscribe_max_attempts")]
    pub subscribe_max_attempts: u32,
    #[serde(default = "default_subscribe_retry_delay_ms")]
    pub subscribe_retry_delay_ms: u64,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            device_name_filter: default_device_filter(),
            service_name_filter: default_service_filter(),
            characteristic_name_filter: default_characteristic_filter(),
            connect_timeout_ms: default_connect_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            subscribe_max_attempts: default_subscribe_max_attempts(),
            subscribe_retry_delay_ms: default_subscribe_retry_delay_ms(),
        }
    }
}

impl AcquisitionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn subscribe_retry_delay(&self) -> Duration {
        Duration::from_millis(self.subscribe_retry_delay_ms)
    }
}

fn default_device_filter() -> String {
    "Polar".to_string()
}
fn default_service_filter() -> String {
    "Heart".to_string()
}
fn default_characteristic_filter() -> String {
    "Measurement".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_settle_delay_ms() -> u64 {
    1000
}
fn default_subscribe_max_attempts() -> u32 {
    5
}
fn default_subscribe_retry_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplaySettings {
    #[serde(default)]
    pub data_format: DataFormat,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_hot_threshold")]
    pub hot_threshold: f64,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            data_format: DataFormat::default(),
            buffer_capacity: default_buffer_capacity(),
            hot_threshold: default_hot_threshold(),
        }
    }
}

fn default_buffer_capacity() -> usize {
    10240
}
fn default_hot_threshold() -> f64 {
    100.0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub acquisition: AcquisitionSettings,

    #[serde(default)]
    pub display: DisplaySettings,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        Ok(Self {
            settings,
            settings_path,
        })
    }

    /// Settings stored at an explicit path
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("HeartMonitor");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &std::path::Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }
}
