//! Configuration file support for Dosewatch.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/dosewatch/config.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub escalation: EscalationConfig,

    #[serde(default)]
    pub inventory: InventoryConfig,

    #[serde(default)]
    pub channel: ChannelConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Defaults applied when a user's own values are missing or malformed
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_wake_time")]
    pub default_wake_time: String,

    #[serde(default = "default_sleep_time")]
    pub default_sleep_time: String,

    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// Minimum spacing between two reminders of the same user
    #[serde(default = "default_conflict_threshold_minutes")]
    pub conflict_threshold_minutes: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            default_wake_time: default_wake_time(),
            default_sleep_time: default_sleep_time(),
            default_timezone: default_timezone(),
            conflict_threshold_minutes: default_conflict_threshold_minutes(),
        }
    }
}

/// Escalation timeline for unanswered reminders, in minutes since `sent_at`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// How far ahead of `now` an entry still counts as due
    #[serde(default = "default_due_window_minutes")]
    pub due_window_minutes: i64,

    #[serde(default = "default_first_resend_minutes")]
    pub first_resend_minutes: i64,

    #[serde(default = "default_second_resend_minutes")]
    pub second_resend_minutes: i64,

    #[serde(default = "default_auto_skip_minutes")]
    pub auto_skip_minutes: i64,

    /// Unsent entries later than this are closed as skipped instead of sent
    #[serde(default = "default_max_lateness_minutes")]
    pub max_lateness_minutes: i64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            due_window_minutes: default_due_window_minutes(),
            first_resend_minutes: default_first_resend_minutes(),
            second_resend_minutes: default_second_resend_minutes(),
            auto_skip_minutes: default_auto_skip_minutes(),
            max_lateness_minutes: default_max_lateness_minutes(),
        }
    }
}

/// Inventory notice thresholds
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InventoryConfig {
    #[serde(default = "default_low_supply_days")]
    pub low_supply_days: u32,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            low_supply_days: default_low_supply_days(),
        }
    }
}

/// Outbound channel configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ChannelConfig {
    /// When false, interactive calls are refused and reminders fall back to text
    #[serde(default)]
    pub calls_enabled: bool,
}

/// Aggregate store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: default_max_conflict_retries(),
        }
    }
}

/// Foreground tick loop configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(".local/share")
    });
    base.join("dosewatch")
}

fn default_wake_time() -> String {
    "08:00".into()
}

fn default_sleep_time() -> String {
    "22:00".into()
}

fn default_timezone() -> String {
    "UTC".into()
}

fn default_conflict_threshold_minutes() -> i64 {
    30
}

fn default_due_window_minutes() -> i64 {
    1
}

fn default_first_resend_minutes() -> i64 {
    20
}

fn default_second_resend_minutes() -> i64 {
    30
}

fn default_auto_skip_minutes() -> i64 {
    40
}

fn default_max_lateness_minutes() -> i64 {
    15
}

fn default_low_supply_days() -> u32 {
    2
}

fn default_max_conflict_retries() -> u32 {
    3
}

fn default_tick_seconds() -> u64 {
    60
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join(".config")
        });
        base.join("dosewatch").join("config.toml")
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Reject escalation timelines that could never progress in order
    pub fn validate(&self) -> Result<()> {
        let e = &self.escalation;
        if !(0 < e.first_resend_minutes
            && e.first_resend_minutes < e.second_resend_minutes
            && e.second_resend_minutes < e.auto_skip_minutes)
        {
            return Err(Error::Config(format!(
                "escalation minutes must be strictly increasing and positive, got {}/{}/{}",
                e.first_resend_minutes, e.second_resend_minutes, e.auto_skip_minutes
            )));
        }
        if e.max_lateness_minutes < 0 {
            return Err(Error::Config(format!(
                "max_lateness_minutes must not be negative, got {}",
                e.max_lateness_minutes
            )));
        }
        if self.schedule.conflict_threshold_minutes <= 0 {
            return Err(Error::Config(
                "conflict_threshold_minutes must be positive".into(),
            ));
        }
        Ok(())
    }
}
