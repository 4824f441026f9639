//! TOML-based application configuration.
//!
//! Stores:
//! - Upcoming-maintenance windows, one per consumer (monitor, quarterly view,
//!   dashboard). They are independent on purpose.
//! - Sweep trigger times, batch bounds and the lease TTL
//! - Notification recipients
//!
//! Configuration is stored at `~/.config/pmstrack/config.toml`.

use chrono::{Duration, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::{ConfigError, Result};
use crate::notify::{Role, OPERATIONAL_ROLES};

/// Look-ahead windows, in days, for each "upcoming maintenance" consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowsConfig {
    /// Daily monitoring sweep that sends reminders.
    #[serde(default = "default_monitor_days")]
    pub monitor_days: i64,
    /// Quarterly notifications view.
    #[serde(default = "default_quarterly_days")]
    pub quarterly_days: i64,
    /// Dashboard "upcoming" counter.
    #[serde(default = "default_dashboard_days")]
    pub dashboard_days: i64,
}

/// Sweep triggers and bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Daily due-soon sweep, `HH:MM` UTC.
    #[serde(default = "default_due_soon_at")]
    pub due_soon_at: String,
    /// Daily expiry sweep, `HH:MM` UTC.
    #[serde(default = "default_expiry_at")]
    pub expiry_at: String,
    #[serde(default = "default_weekly_report_day")]
    pub weekly_report_day: String,
    #[serde(default = "default_weekly_report_at")]
    pub weekly_report_at: String,
    /// Contracts handled per batch inside one sweep.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Upper bound on contracts touched by one sweep invocation.
    #[serde(default = "default_max_contracts_per_sweep")]
    pub max_contracts_per_sweep: usize,
    /// How long a sweep lease stays valid if its holder dies.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_operational_roles")]
    pub operational_roles: Vec<Role>,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/pmstrack/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub windows: WindowsConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

fn default_monitor_days() -> i64 {
    7
}
fn default_quarterly_days() -> i64 {
    9
}
fn default_dashboard_days() -> i64 {
    30
}
fn default_due_soon_at() -> String {
    "09:00".into()
}
fn default_expiry_at() -> String {
    "00:05".into()
}
fn default_weekly_report_day() -> String {
    "Mon".into()
}
fn default_weekly_report_at() -> String {
    "08:00".into()
}
fn default_batch_size() -> usize {
    100
}
fn default_max_contracts_per_sweep() -> usize {
    5000
}
fn default_lease_ttl_secs() -> u64 {
    900
}

/// Longest lease a sweep may hold, one day.
pub const MAX_LEASE_TTL_SECS: u64 = 86_400;
fn default_true() -> bool {
    true
}
fn default_operational_roles() -> Vec<Role> {
    OPERATIONAL_ROLES.to_vec()
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            monitor_days: default_monitor_days(),
            quarterly_days: default_quarterly_days(),
            dashboard_days: default_dashboard_days(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            due_soon_at: default_due_soon_at(),
            expiry_at: default_expiry_at(),
            weekly_report_day: default_weekly_report_day(),
            weekly_report_at: default_weekly_report_at(),
            batch_size: default_batch_size(),
            max_contracts_per_sweep: default_max_contracts_per_sweep(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            operational_roles: default_operational_roles(),
        }
    }
}

impl WindowsConfig {
    pub fn monitor(&self) -> u64 {
        self.monitor_days.max(0) as u64
    }

    pub fn quarterly(&self) -> u64 {
        self.quarterly_days.max(0) as u64
    }

    pub fn dashboard(&self) -> u64 {
        self.dashboard_days.max(0) as u64
    }
}

impl SweepConfig {
    /// Lease TTL clamped to `1..=MAX_LEASE_TTL_SECS`.
    pub fn lease_ttl(&self) -> Duration {
        Duration::seconds(self.lease_ttl_secs.clamp(1, MAX_LEASE_TTL_SECS) as i64)
    }

    pub fn due_soon_time(&self) -> Result<NaiveTime> {
        parse_clock_time("sweep.due_soon_at", &self.due_soon_at)
    }

    pub fn expiry_time(&self) -> Result<NaiveTime> {
        parse_clock_time("sweep.expiry_at", &self.expiry_at)
    }

    pub fn weekly_report_time(&self) -> Result<NaiveTime> {
        parse_clock_time("sweep.weekly_report_at", &self.weekly_report_at)
    }

    pub fn weekly_report_weekday(&self) -> Result<Weekday> {
        self.weekly_report_day.trim().parse::<Weekday>().map_err(|_| {
            ConfigError::InvalidValue {
                key: "sweep.weekly_report_day".into(),
                message: format!("'{}' is not a weekday", self.weekly_report_day),
            }
            .into()
        })
    }
}

fn parse_clock_time(key: &str, raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|_| {
        ConfigError::InvalidValue {
            key: key.into(),
            message: format!("'{raw}' is not an HH:MM time"),
        }
        .into()
    })
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> std::result::Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|_| invalid(format!("cannot parse '{value}' as bool")))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<i64>() {
                            serde_json::Value::Number(n.into())
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as integer")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    fn path() -> Result<PathBuf> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk, writing defaults on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&path, &content),
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
        }
    }

    /// Parse file contents and validate them.
    fn parse(path: &Path, content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, content).map_err(|e| ConfigError::SaveFailed {
            path,
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key and save.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut json = serde_json::to_value(&*self)?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        self.save()
    }

    /// Reject values that would make sweeps misbehave.
    ///
    /// # Errors
    /// `ConfigError::InvalidValue` naming the offending key.
    pub fn validate(&self) -> Result<()> {
        let windows = [
            ("windows.monitor_days", self.windows.monitor_days),
            ("windows.quarterly_days", self.windows.quarterly_days),
            ("windows.dashboard_days", self.windows.dashboard_days),
        ];
        for (key, days) in windows {
            if !(0..=365).contains(&days) {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: format!("{days} is outside 0..=365"),
                }
                .into());
            }
        }
        let minimums = [
            ("sweep.batch_size", self.sweep.batch_size),
            ("sweep.max_contracts_per_sweep", self.sweep.max_contracts_per_sweep),
        ];
        for (key, value) in minimums {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: "must be at least 1".into(),
                }
                .into());
            }
        }
        if !(1..=MAX_LEASE_TTL_SECS).contains(&self.sweep.lease_ttl_secs) {
            return Err(ConfigError::InvalidValue {
                key: "sweep.lease_ttl_secs".into(),
                message: format!(
                    "{} is outside 1..={MAX_LEASE_TTL_SECS}",
                    self.sweep.lease_ttl_secs
                ),
            }
            .into());
        }
        self.sweep.due_soon_time()?;
        self.sweep.expiry_time()?;
        self.sweep.weekly_report_time()?;
        self.sweep.weekly_report_weekday()?;
        Ok(())
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("falling back to default config: {e}");
            Self::default()
        })
    }
}
