//! Configuration management for Spotheat
//!
//! This module handles loading, validation, and management of the static
//! service configuration from YAML files with support for environment
//! variable overrides. The heater settings that the dashboard edits at runtime
//! live separately in [`crate::settings`].

use crate::error::{Result, SpotheatError};
#[cfg(feature = "openapi")]
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable holding an explicit config file path
pub const CONFIG_PATH_ENV: &str = "SPOTHEAT_CONFIG";

/// Environment variable that overrides `tibber.access_token`
pub const TIBBER_TOKEN_ENV: &str = "TIBBER_API_TOKEN";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(JsonSchema))]
#[serde(default)]
pub struct Config {
    /// Network relay driving the heating element
    pub relay: RelayConfig,

    /// Tibber API configuration for spot prices
    pub tibber: TibberConfig,

    /// Decision loop and state file configuration
    pub controller: ControllerConfig,

    /// Tick and price fetch schedule
    pub schedule: ScheduleConfig,

    /// Web server binding configuration
    pub web: WebConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// IANA timezone for "now" and price timestamps; empty means host local time
    pub timezone: String,
}

/// Shelly-style relay connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(JsonSchema))]
#[serde(default)]
pub struct RelayConfig {
    /// IP address or host name of the relay
    pub host: String,

    /// Switch channel on the device
    pub switch_id: u8,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

/// Tibber API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(JsonSchema))]
#[serde(default)]
pub struct TibberConfig {
    /// Tibber API access token
    pub access_token: String,

    /// GraphQL endpoint
    pub api_url: String,

    /// Optional specific home ID; first home when empty
    pub home_id: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

/// Decision loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(JsonSchema))]
#[serde(default)]
pub struct ControllerConfig {
    /// Number of decision cycles automatic control stays suspended after an
    /// external change of the relay state
    pub manual_override_nb_runs: u32,

    /// JSON file holding the runtime heater settings
    pub settings_file: String,

    /// JSON file holding the hour-keyed state log
    pub state_log_file: String,

    /// Persist the override countdown so it survives restarts
    pub persist_override: bool,

    /// JSON file holding the persisted override countdown
    pub state_file: String,
}

/// Scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(JsonSchema))]
#[serde(default)]
pub struct ScheduleConfig {
    /// Local times (HH:MM) at which the price table is refreshed every day
    pub price_fetch_times: Vec<String>,

    /// Delay before retrying a failed scheduled price fetch
    pub price_fetch_retry_minutes: u32,

    /// Maximum retries of one scheduled price fetch
    pub price_fetch_max_retries: u32,

    /// Delay of the extra decision tick queued after a fail-safe cycle
    pub failure_retry_minutes: u32,

    /// Fetch prices once before the first decision
    pub fetch_on_startup: bool,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(JsonSchema))]
#[serde(default)]
pub struct WebConfig {
    /// Whether to start the HTTP server
    pub enabled: bool,

    /// Bind address
    pub host: String,

    /// TCP port
    pub port: u16,

    /// Peer networks (CIDR) allowed besides loopback
    pub allowed_networks: Vec<String>,

    /// Directory with the dashboard's static files
    pub static_dir: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(JsonSchema))]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level
    pub console_level: Option<String>,

    /// Optional file-specific level
    pub file_level: Option<String>,

    /// Optional level for the web log stream
    pub web_level: Option<String>,

    /// Path to log file (its directory receives the rotated files)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.106".to_string(),
            switch_id: 0,
            timeout_secs: 5,
        }
    }
}

impl Default for TibberConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            api_url: "https://api.tibber.com/v1-beta/gql".to_string(),
            home_id: String::new(),
            timeout_secs: 15,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            manual_override_nb_runs: 5,
            settings_file: "heater_config.json".to_string(),
            state_log_file: "/data/spotheat_state_log.json".to_string(),
            persist_override: true,
            state_file: "/data/spotheat_state.json".to_string(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            price_fetch_times: vec!["21:42".to_string()],
            price_fetch_retry_minutes: 15,
            price_fetch_max_retries: 4,
            failure_retry_minutes: 5,
            fetch_on_startup: true,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8000,
            allowed_networks: vec!["100.64.0.0/10".to_string()],
            static_dir: "./webui".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            web_level: None,
            file: "/tmp/spotheat.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            tibber: TibberConfig::default(),
            controller: ControllerConfig::default(),
            schedule: ScheduleConfig::default(),
            web: WebConfig::default(),
            logging: LoggingConfig::default(),
            timezone: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from an explicit path, `SPOTHEAT_CONFIG`, or the
    /// default locations, then apply environment overrides
    pub fn load(explicit: Option<PathBuf>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let mut config = match explicit.or(from_env) {
            Some(path) => Self::from_file(path)?,
            None => Self::load_default_locations()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_default_locations() -> Result<Self> {
        let default_paths = [
            "spotheat.yaml",
            "/data/spotheat.yaml",
            "/etc/spotheat/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var(TIBBER_TOKEN_ENV) {
            let token = token.trim();
            if !token.is_empty() {
                self.tibber.access_token = token.to_string();
            }
        }
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.relay.host.trim().is_empty() {
            return Err(SpotheatError::validation(
                "relay.host",
                "Host cannot be empty",
            ));
        }

        if self.relay.timeout_secs == 0 {
            return Err(SpotheatError::validation(
                "relay.timeout_secs",
                "Must be greater than 0",
            ));
        }

        if self.tibber.timeout_secs == 0 {
            return Err(SpotheatError::validation(
                "tibber.timeout_secs",
                "Must be greater than 0",
            ));
        }

        if self.tibber.api_url.trim().is_empty() {
            return Err(SpotheatError::validation(
                "tibber.api_url",
                "URL cannot be empty",
            ));
        }

        if self.controller.manual_override_nb_runs == 0 {
            return Err(SpotheatError::validation(
                "controller.manual_override_nb_runs",
                "Must be greater than 0",
            ));
        }

        for time in &self.schedule.price_fetch_times {
            if chrono::NaiveTime::parse_from_str(time, "%H:%M").is_err() {
                return Err(SpotheatError::validation(
                    "schedule.price_fetch_times".to_string(),
                    format!("'{}' is not a HH:MM time", time),
                ));
            }
        }

        for net in &self.web.allowed_networks {
            if crate::net::IpNetwork::parse(net).is_err() {
                return Err(SpotheatError::validation(
                    "web.allowed_networks".to_string(),
                    format!("'{}' is not a valid CIDR network", net),
                ));
            }
        }

        crate::clock::LocalClock::from_config(self)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.relay.switch_id, 0);
        assert_eq!(config.relay.timeout_secs, 5);
        assert_eq!(config.tibber.timeout_secs, 15);
        assert_eq!(config.controller.manual_override_nb_runs, 5);
        assert_eq!(config.schedule.price_fetch_times, vec!["21:42".to_string()]);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.relay.host = String::new();
        assert!(config.validate().is_err());

        config = Config::default();
        config.schedule.price_fetch_times = vec!["25:99".to_string()];
        assert!(config.validate().is_err());

        config = Config::default();
        config.web.allowed_networks = vec!["100.64.0.0/99".to_string()];
        assert!(config.validate().is_err());

        config = Config::default();
        config.timezone = "Mars/Olympus_Mons".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "relay:\n  host: 10.0.0.7\ntimezone: Europe/Stockholm\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.relay.host, "10.0.0.7");
        assert_eq!(config.relay.timeout_secs, 5);
        assert_eq!(config.web.port, 8000);
        assert!(config.validate().is_ok());
    }
}
