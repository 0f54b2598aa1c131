//! Runtime heater settings
//!
//! These are the knobs the dashboard edits while the service runs (control
//! mode, price limit, number of cheap hours, master switch). They are stored
//! in a small JSON file and re-read by the controller at the start of every
//! cycle, so edits apply without a restart.

use crate::error::{Result, SpotheatError};
use crate::logging::get_logger;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Decision policy selected by the settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMode {
    /// ON while the current price is below `max_price`
    PriceLimit,
    /// ON during the `n_cheapest` cheapest hours of the current day
    NCheapestToday,
}

impl ControlMode {
    /// Parse the stored mode label
    pub fn parse(label: &str) -> Result<Self> {
        match label.trim().to_uppercase().as_str() {
            "PRICE_LIMIT" => Ok(Self::PriceLimit),
            "N_CHEAPEST_TODAY" => Ok(Self::NCheapestToday),
            other => Err(SpotheatError::config(format!(
                "Unrecognized control mode '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceLimit => "PRICE_LIMIT",
            Self::NCheapestToday => "N_CHEAPEST_TODAY",
        }
    }
}

impl std::fmt::Display for ControlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heater settings as stored on disk and exchanged with the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HeaterSettings {
    /// Mode label; kept as text so an unknown value reaches the controller as
    /// a configuration error instead of failing the load
    pub mode: String,

    /// Price limit for PRICE_LIMIT mode (currency/kWh)
    pub max_price: f64,

    /// Number of cheapest hours for N_CHEAPEST_TODAY mode
    pub n_cheapest: usize,

    /// Master switch; when false the heater is kept OFF
    pub enabled: bool,
}

impl Default for HeaterSettings {
    fn default() -> Self {
        Self {
            mode: ControlMode::NCheapestToday.as_str().to_string(),
            max_price: 0.2,
            n_cheapest: 8,
            enabled: true,
        }
    }
}

impl HeaterSettings {
    /// Parsed control mode
    pub fn control_mode(&self) -> Result<ControlMode> {
        ControlMode::parse(&self.mode)
    }

    /// Validate values coming from an external writer
    pub fn validate(&self) -> Result<()> {
        self.control_mode()?;
        if self.n_cheapest == 0 {
            return Err(SpotheatError::validation(
                "n_cheapest",
                "Must be at least 1",
            ));
        }
        if !self.max_price.is_finite() {
            return Err(SpotheatError::validation(
                "max_price",
                "Must be a finite number",
            ));
        }
        Ok(())
    }
}

/// Storage for heater settings
///
/// Read by the controller every cycle, written only by external requests.
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<HeaterSettings>;
    fn save(&self, settings: &HeaterSettings) -> Result<()>;
}

/// JSON file backed settings store
pub struct JsonSettingsStore {
    path: PathBuf,
    logger: crate::logging::StructuredLogger,
}

impl JsonSettingsStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            logger: get_logger("settings"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    /// Missing file: write and return defaults. Unparsable file: log and
    /// return defaults without touching the file.
    fn load(&self) -> Result<HeaterSettings> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.logger.info(&format!(
                    "No settings file at {}, writing defaults",
                    self.path.display()
                ));
                let defaults = HeaterSettings::default();
                self.save(&defaults)?;
                return Ok(defaults);
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<HeaterSettings>(&contents) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                self.logger.error(&format!(
                    "Error parsing settings file {}: {}; using defaults",
                    self.path.display(),
                    e
                ));
                Ok(HeaterSettings::default())
            }
        }
    }

    fn save(&self, settings: &HeaterSettings) -> Result<()> {
        let contents = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, contents)?;
        self.logger.debug("Saved heater settings to disk");
        Ok(())
    }
}

/// In-memory settings store, shared between clones
#[derive(Clone, Default)]
pub struct MemorySettingsStore {
    inner: Arc<RwLock<HeaterSettings>>,
}

impl MemorySettingsStore {
    pub fn new(settings: HeaterSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<HeaterSettings> {
        self.inner
            .read()
            .map(|s| s.clone())
            .map_err(|_| SpotheatError::generic("settings lock poisoned"))
    }

    fn save(&self, settings: &HeaterSettings) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| SpotheatError::generic("settings lock poisoned"))?;
        *guard = settings.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_labels() {
        assert_eq!(ControlMode::parse("PRICE_LIMIT").unwrap(), ControlMode::PriceLimit);
        assert_eq!(
            ControlMode::parse("n_cheapest_today").unwrap(),
            ControlMode::NCheapestToday
        );
        assert!(matches!(
            ControlMode::parse("SOLAR"),
            Err(SpotheatError::Config { .. })
        ));
        assert_eq!(ControlMode::PriceLimit.to_string(), "PRICE_LIMIT");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut s = HeaterSettings::default();
        assert!(s.validate().is_ok());
        s.n_cheapest = 0;
        assert!(s.validate().is_err());
        s = HeaterSettings::default();
        s.max_price = f64::NAN;
        assert!(s.validate().is_err());
        s = HeaterSettings::default();
        s.mode = "WHATEVER".to_string();
        assert!(s.validate().is_err());
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heater_config.json");
        let store = JsonSettingsStore::new(&path);
        let loaded = store.load().unwrap();
        assert_eq!(loaded, HeaterSettings::default());
        assert!(path.exists());
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heater_config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = JsonSettingsStore::new(&path);
        assert_eq!(store.load().unwrap(), HeaterSettings::default());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn reads_the_original_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heater_config.json");
        std::fs::write(
            &path,
            r#"{"max_price": 0.35, "n_cheapest": 6, "mode": "PRICE_LIMIT", "enabled": false}"#,
        )
        .unwrap();
        let loaded = JsonSettingsStore::new(&path).load().unwrap();
        assert_eq!(loaded.control_mode().unwrap(), ControlMode::PriceLimit);
        assert_eq!(loaded.n_cheapest, 6);
        assert!(!loaded.enabled);
    }
}
