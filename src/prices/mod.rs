//! Hourly spot prices
//!
//! The [`PriceTable`] holds the rolling window of hour-keyed prices the
//! decision policy reads; a [`PriceSource`] refills it wholesale.

pub mod source;
pub mod table;
pub mod tibber;

pub use source::PriceSource;
pub use table::PriceTable;
pub use tibber::{TibberPriceSource, parse_price_info};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Price of one hour, keyed by naive local start time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PricePoint {
    /// Hour start (minute = second = 0)
    pub starts_at: NaiveDateTime,
    /// Total price, currency/kWh
    pub price: f64,
}

impl PricePoint {
    pub fn new(starts_at: NaiveDateTime, price: f64) -> Self {
        Self {
            starts_at: crate::clock::truncate_to_hour(starts_at),
            price,
        }
    }
}
