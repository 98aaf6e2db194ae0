use crate::domain::calibration::CalibrationSource;
use crate::domain::models::ReportMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

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
    #[serde(default = "default_true")]
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
            show_thread_ids: default_true(),
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
    "wiimote_driver".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSettings {
    /// How long a status query or memory read may wait for its reply
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    /// Sleep between receive attempts when the transport has nothing queued
    #[serde(default = "default_receive_idle_ms")]
    pub receive_idle_ms: u64,

    // Handshake
    #[serde(default)]
    pub initial_report_mode: ReportMode,
    #[serde(default = "default_true")]
    pub ready_signal: bool,
    #[serde(default = "default_ready_signal_ms")]
    pub ready_signal_ms: u64,

    #[serde(default)]
    pub accel_calibration: CalibrationSource,

    /// Hardware settle time between speaker/extension register writes
    #[serde(default = "default_register_settle_ms")]
    pub register_settle_ms: u64,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            receive_timeout_ms: default_receive_timeout_ms(),
            receive_idle_ms: default_receive_idle_ms(),
            initial_report_mode: ReportMode::default(),
            ready_signal: default_true(),
            ready_signal_ms: default_ready_signal_ms(),
            accel_calibration: CalibrationSource::default(),
            register_settle_ms: default_register_settle_ms(),
            log_settings: LogSettings::default(),
        }
    }
}

impl DriverSettings {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn receive_idle(&self) -> Duration {
        Duration::from_millis(self.receive_idle_ms)
    }

    pub fn ready_signal_duration(&self) -> Duration {
        Duration::from_millis(self.ready_signal_ms)
    }

    pub fn register_settle(&self) -> Duration {
        Duration::from_millis(self.register_settle_ms)
    }
}

fn default_receive_timeout_ms() -> u64 {
    10_000
}
fn default_receive_idle_ms() -> u64 {
    1
}
fn default_ready_signal_ms() -> u64 {
    1000
}
fn default_register_settle_ms() -> u64 {
    200
}

pub struct SettingsService {
    settings: DriverSettings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load settings from the per-user config directory, falling back to
    /// defaults when the file is missing or invalid.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                DriverSettings::default()
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
        path.push("WiimoteDriver");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<DriverSettings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut DriverSettings {
        &mut self.settings
    }

    pub fn update_calibration_source(&mut self, source: CalibrationSource) -> anyhow::Result<()> {
        self.settings.accel_calibration = source;
        self.save()
    }
}
