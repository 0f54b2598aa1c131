//! Local wall-clock helpers
//!
//! Prices and decisions are keyed by naive local hours. The configured IANA
//! timezone decides what "local" means; without one the host's local time is
//! used.

use crate::config::Config;
use crate::error::{Result, SpotheatError};
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;

/// Source of local time for the decision loop
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock {
    tz: Option<Tz>,
}

impl LocalClock {
    /// Clock in the given IANA timezone, or host local time for `None`
    pub fn new(tz: Option<Tz>) -> Self {
        Self { tz }
    }

    /// Build the clock from `Config::timezone`
    pub fn from_config(config: &Config) -> Result<Self> {
        let name = config.timezone.trim();
        if name.is_empty() {
            return Ok(Self::new(None));
        }
        let tz = name
            .parse::<Tz>()
            .map_err(|e| SpotheatError::config(format!("Unknown timezone '{}': {}", name, e)))?;
        Ok(Self::new(Some(tz)))
    }

    /// Current local wall-clock time
    pub fn now(&self) -> NaiveDateTime {
        match self.tz {
            Some(tz) => Utc::now().with_timezone(&tz).naive_local(),
            None => Local::now().naive_local(),
        }
    }

    /// Convert an offset timestamp (as delivered by the price API) to local
    /// wall-clock time. Without a configured timezone the wall-clock reading
    /// of the given offset is kept.
    pub fn localize(&self, ts: DateTime<FixedOffset>) -> NaiveDateTime {
        match self.tz {
            Some(tz) => ts.with_timezone(&tz).naive_local(),
            None => ts.naive_local(),
        }
    }
}

/// Truncate a timestamp to the start of its hour
pub fn truncate_to_hour(ts: NaiveDateTime) -> NaiveDateTime {
    ts.date()
        .and_hms_opt(ts.hour(), 0, 0)
        .unwrap_or(ts)
}
