//! Heater decision policy

use crate::error::Result;
use crate::prices::PriceTable;
use crate::settings::{ControlMode, HeaterSettings};
use chrono::NaiveDateTime;

/// Desired relay state for `now`
///
/// A disabled heater is always OFF without consulting prices. Missing price
/// data and unknown modes are returned as errors; the caller decides how to
/// degrade.
pub fn decide(table: &PriceTable, now: NaiveDateTime, settings: &HeaterSettings) -> Result<bool> {
    if !settings.enabled {
        return Ok(false);
    }
    match settings.control_mode()? {
        ControlMode::PriceLimit => Ok(table.price_at(now)? < settings.max_price),
        ControlMode::NCheapestToday => table.is_among_n_cheapest_today(now, settings.n_cheapest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpotheatError;
    use crate::prices::PricePoint;
    use chrono::NaiveDate;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn table() -> PriceTable {
        PriceTable::from_points([
            PricePoint::new(at(9), 0.10),
            PricePoint::new(at(10), 0.30),
            PricePoint::new(at(11), 0.05),
        ])
    }

    fn settings(mode: ControlMode) -> HeaterSettings {
        HeaterSettings {
            mode: mode.as_str().to_string(),
            max_price: 0.20,
            n_cheapest: 2,
            enabled: true,
        }
    }

    #[test]
    fn n_cheapest_example() {
        assert!(decide(&table(), at(11), &settings(ControlMode::NCheapestToday)).unwrap());
    }

    #[test]
    fn price_limit_example() {
        let s = settings(ControlMode::PriceLimit);
        assert!(!decide(&table(), at(10), &s).unwrap());
        assert!(decide(&table(), at(9), &s).unwrap());
    }

    #[test]
    fn price_limit_is_strict() {
        let mut s = settings(ControlMode::PriceLimit);
        s.max_price = 0.10;
        assert!(!decide(&table(), at(9), &s).unwrap());
    }

    #[test]
    fn disabled_short_circuits_missing_data() {
        let mut s = settings(ControlMode::PriceLimit);
        s.enabled = false;
        assert!(!decide(&PriceTable::new(), at(3), &s).unwrap());
    }

    #[test]
    fn errors_propagate() {
        let s = settings(ControlMode::PriceLimit);
        assert!(matches!(
            decide(&table(), at(3), &s),
            Err(SpotheatError::NoData { .. })
        ));
        let mut s = settings(ControlMode::NCheapestToday);
        s.n_cheapest = 10;
        assert!(matches!(
            decide(&table(), at(9), &s),
            Err(SpotheatError::InsufficientData { .. })
        ));
        s.mode = "SOLAR_SURPLUS".to_string();
        assert!(matches!(
            decide(&table(), at(9), &s),
            Err(SpotheatError::Config { .. })
        ));
    }
}
