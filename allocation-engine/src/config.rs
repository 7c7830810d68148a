//! Configuration for the allocation engine

use crate::{
    clock::{BusinessCalendar, DEFAULT_TIMEZONE},
    types::Settings,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Allocation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Allocation record store directory
    pub data_dir: PathBuf,

    /// Wallet ledger configuration
    pub ledger: wallet_ledger::Config,

    /// Job cadences
    pub jobs: JobsConfig,

    /// Business calendar
    pub calendar: CalendarConfig,

    /// Push and real-time delivery
    pub notifications: NotificationConfig,

    /// Settings used until an operator stores their own
    pub defaults: Settings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "allocation-engine".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::from("./data/allocations"),
            ledger: wallet_ledger::Config::default(),
            jobs: JobsConfig::default(),
            calendar: CalendarConfig::default(),
            notifications: NotificationConfig::default(),
            defaults: Settings::default(),
        }
    }
}

/// Job runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Cadence of "expire alerts" and "start accepted allocations"
    pub fast_interval_secs: u64,

    /// Cadence of "expire pending allocations" and "auto-complete"
    pub slow_interval_secs: u64,

    /// Run every check once when the jobs start
    pub run_on_startup: bool,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            fast_interval_secs: 30,
            slow_interval_secs: 60,
            run_on_startup: true,
        }
    }
}

/// Business calendar configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// IANA time zone of allocation dates and times
    pub timezone: String,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// NATS URL for real-time events (in-memory channel when absent)
    pub nats_url: Option<String>,

    /// Real-time subject prefix
    pub subject_prefix: String,

    /// Push gateway URL (push disabled when absent)
    pub push_gateway_url: Option<String>,

    /// Push request timeout in milliseconds
    pub push_timeout_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            nats_url: None,
            subject_prefix: "allocations".to_string(),
            push_gateway_url: None,
            push_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from `ALLOCATION_CONFIG` (if set) and apply environment overrides
    pub fn from_env() -> crate::Result<Self> {
        let mut config = match std::env::var("ALLOCATION_CONFIG") {
            Ok(path) => Config::from_file(path)?,
            Err(_) => Config::default(),
        };

        if let Ok(dir) = std::env::var("ALLOCATION_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("ALLOCATION_LEDGER_DIR") {
            config.ledger.data_dir = PathBuf::from(dir);
        }

        if let Ok(secs) = std::env::var("ALLOCATION_FAST_INTERVAL_SECS") {
            config.jobs.fast_interval_secs = parse_var("ALLOCATION_FAST_INTERVAL_SECS", &secs)?;
        }

        if let Ok(secs) = std::env::var("ALLOCATION_SLOW_INTERVAL_SECS") {
            config.jobs.slow_interval_secs = parse_var("ALLOCATION_SLOW_INTERVAL_SECS", &secs)?;
        }

        if let Ok(timezone) = std::env::var("ALLOCATION_TIMEZONE") {
            config.calendar.timezone = timezone.trim().to_string();
        }

        if let Ok(url) = std::env::var("ALLOCATION_NATS_URL") {
            config.notifications.nats_url = Some(url);
        }

        if let Ok(url) = std::env::var("ALLOCATION_PUSH_GATEWAY_URL") {
            config.notifications.push_gateway_url = Some(url);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject unusable values
    pub fn validate(&self) -> crate::Result<()> {
        if self.jobs.fast_interval_secs == 0 || self.jobs.slow_interval_secs == 0 {
            return Err(crate::Error::Config(
                "Job intervals must be at least one second".to_string(),
            ));
        }
        BusinessCalendar::new(&self.calendar.timezone)?;
        self.defaults.validate()
    }
}

fn parse_var<T>(name: &str, value: &str) -> crate::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| crate::Error::Config(format!("Invalid {}: {}", name, e)))
}
