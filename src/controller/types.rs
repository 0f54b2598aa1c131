use crate::prices::PricePoint;
use crate::settings::HeaterSettings;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Most recent failure, kept until a clean cycle supersedes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LastError {
    pub message: String,
    pub timestamp: NaiveDateTime,
}

/// Result of one relay actuation step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    /// Relay state read before acting; `None` when unreachable
    pub observed: Option<bool>,
    /// Relay state after the step, as last known
    pub relay_on: Option<bool>,
    /// Whether an on/off command was sent
    pub actuated: bool,
    /// Whether an override suppressed actuation
    pub suppressed: bool,
    /// Failure raised while observing or actuating
    pub error: Option<String>,
}

/// Result of one decision cycle
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    /// State the policy asked for (OFF on failure)
    pub desired: bool,
    /// Whether the decision failed and OFF was forced
    pub fail_safe: bool,
    /// Whether a price re-fetch was attempted during the cycle
    pub refetched: bool,
    pub turn: TurnOutcome,
}

impl UpdateOutcome {
    /// A cycle with no failure of any kind
    pub fn is_clean(&self) -> bool {
        !self.fail_safe && self.turn.error.is_none()
    }
}

/// One hour of today's prices as shown on the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HourPrice {
    pub time: NaiveDateTime,
    pub price: f64,
    /// Among the N cheapest hours (N_CHEAPEST_TODAY mode only)
    pub cheap: bool,
}

/// Read-only view of the controller, broadcast after every change
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Snapshot {
    pub timestamp: NaiveDateTime,
    pub version: String,
    pub relay_on: Option<bool>,
    pub current_price: Option<f64>,
    pub mode: String,
    pub enabled: bool,
    pub overridden: bool,
    pub override_hours_left: u32,
    pub override_state: Option<bool>,
    pub last_desired: Option<bool>,
    pub last_error: Option<LastError>,
    pub last_update: Option<NaiveDateTime>,
    pub prices_fetched_at: Option<NaiveDateTime>,
    pub settings: HeaterSettings,
    pub today_prices: Vec<HourPrice>,
}

/// Full table as returned by the price endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PriceOverview {
    pub fetched_at: Option<NaiveDateTime>,
    pub current_price: Option<f64>,
    pub prices: Vec<PricePoint>,
}
