use crate::domain::address::Address;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error" or a full filter directive
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
    "ble_session_bridge".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Per-operation completion deadlines, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_register_ms")]
    pub register_ms: u64,
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
    #[serde(default = "default_disconnect_ms")]
    pub disconnect_ms: u64,
    #[serde(default = "default_discovery_ms")]
    pub discovery_ms: u64,
    #[serde(default = "default_database_ms")]
    pub database_ms: u64,
    #[serde(default = "default_pair_ms")]
    pub pair_ms: u64,
    #[serde(default = "default_write_ms")]
    pub write_ms: u64,
    #[serde(default = "default_notify_ms")]
    pub notify_ms: u64,
}

impl Timeouts {
    pub fn register(&self) -> Duration {
        Duration::from_millis(self.register_ms)
    }
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
    pub fn disconnect(&self) -> Duration {
        Duration::from_millis(self.disconnect_ms)
    }
    pub fn discovery(&self) -> Duration {
        Duration::from_millis(self.discovery_ms)
    }
    pub fn database(&self) -> Duration {
        Duration::from_millis(self.database_ms)
    }
    pub fn pair(&self) -> Duration {
        Duration::from_millis(self.pair_ms)
    }
    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }
    pub fn notify(&self) -> Duration {
        Duration::from_millis(self.notify_ms)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            register_ms: default_register_ms(),
            connect_ms: default_connect_ms(),
            disconnect_ms: default_disconnect_ms(),
            discovery_ms: default_discovery_ms(),
            database_ms: default_database_ms(),
            pair_ms: default_pair_ms(),
            write_ms: default_write_ms(),
            notify_ms: default_notify_ms(),
        }
    }
}

fn default_register_ms() -> u64 {
    5_000
}
fn default_connect_ms() -> u64 {
    10_000
}
fn default_disconnect_ms() -> u64 {
    10_000
}
fn default_discovery_ms() -> u64 {
    10_000
}
fn default_database_ms() -> u64 {
    10_000
}
fn default_pair_ms() -> u64 {
    20_000
}
fn default_write_ms() -> u64 {
    5_000
}
fn default_notify_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub timeouts: Timeouts,

    // Radio bring-up
    #[serde(default = "default_radio_enable_max_attempts")]
    pub radio_enable_max_attempts: u32,
    #[serde(default = "default_radio_enable_retry_delay_ms")]
    pub radio_enable_retry_delay_ms: u64,

    #[serde(default = "default_false")]
    pub require_bond_before_connect: bool,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Device discovery
    #[serde(default = "default_device_name_prefix")]
    pub device_name_prefix: String,
    #[serde(default = "default_scan_budget_ms")]
    pub scan_budget_ms: u64,
    #[serde(default)]
    pub known_addresses: Vec<Address>,
    #[serde(default)]
    pub last_connected_address: Option<Address>,
}

impl Settings {
    pub fn radio_enable_retry_delay(&self) -> Duration {
        Duration::from_millis(self.radio_enable_retry_delay_ms)
    }

    pub fn scan_budget(&self) -> Duration {
        Duration::from_millis(self.scan_budget_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            radio_enable_max_attempts: default_radio_enable_max_attempts(),
            radio_enable_retry_delay_ms: default_radio_enable_retry_delay_ms(),
            require_bond_before_connect: false,
            log_settings: LogSettings::default(),
            device_name_prefix: default_device_name_prefix(),
            scan_budget_ms: default_scan_budget_ms(),
            known_addresses: Vec::new(),
            last_connected_address: None,
        }
    }
}

fn default_radio_enable_max_attempts() -> u32 {
    10
}
fn default_radio_enable_retry_delay_ms() -> u64 {
    500
}
fn default_device_name_prefix() -> String {
    "R02".to_string()
}
fn default_scan_budget_ms() -> u64 {
    10_000
}

fn settings_error(context: &str, err: impl std::fmt::Display) -> Error {
    Error::Settings(format!("{context}: {err}"))
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Loads from the per-user config directory, falling back to defaults
    /// when the file is missing or unreadable.
    pub fn new() -> Result<Self> {
        let settings_path = Self::default_settings_path()?;
        Ok(Self::load_from(settings_path))
    }

    pub fn load_from(path: impl Into<PathBuf>) -> Self {
        let settings_path = path.into();
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                if settings_path.exists() {
                    tracing::warn!(path = %settings_path.display(), error = %e, "Ignoring unreadable settings");
                }
                Settings::default()
            }
        };
        Self {
            settings,
            settings_path,
        }
    }

    fn default_settings_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| Error::Settings("could not determine config directory".to_string()))?;
        path.push("BleSessionBridge");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> Result<Settings> {
        let contents = fs::read_to_string(path).map_err(|e| settings_error("read", e))?;
        serde_json::from_str(&contents).map_err(|e| settings_error("parse", e))
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&self.settings_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| settings_error("create dir", e))?;
        }
        let json = serde_json::to_string_pretty(&self.settings).map_err(|e| settings_error("serialize", e))?;
        fs::write(path, json).map_err(|e| settings_error("write", e))
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn add_known_address(&mut self, address: Address) -> Result<()> {
        if !self.settings.known_addresses.contains(&address) {
            self.settings.known_addresses.push(address);
            self.save()?;
        }
        Ok(())
    }

    pub fn set_last_connected(&mut self, address: Address) -> Result<()> {
        self.settings.last_connected_address = Some(address);
        self.save()
    }

    /// Remembers a device after a successful session: adds it to the known
    /// list and marks it last connected, with a single save.
    pub fn record_connection(&mut self, address: Address) -> Result<()> {
        if !self.settings.known_addresses.contains(&address) {
            self.settings.known_addresses.push(address);
        }
        self.settings.last_connected_address = Some(address);
        self.save()
    }
}
