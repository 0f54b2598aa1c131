use super::{PricePoint, PriceSource};
use crate::clock::truncate_to_hour;
use crate::error::{Result, SpotheatError};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;

/// Hour-keyed price table for today and tomorrow
///
/// Keys are always truncated to the hour. The contents are only ever replaced
/// as a whole; a failed refresh leaves the previous table in place.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    prices: BTreeMap<NaiveDateTime, f64>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from points; later points win on duplicate hours
    pub fn from_points<I: IntoIterator<Item = PricePoint>>(points: I) -> Self {
        let prices = points
            .into_iter()
            .map(|p| (truncate_to_hour(p.starts_at), p.price))
            .collect();
        Self { prices }
    }

    /// Refill the table from `source`
    ///
    /// On error, or when the source returns nothing, the current contents are
    /// kept and the error is returned. Returns the number of hours loaded.
    pub async fn fetch(&mut self, source: &dyn PriceSource) -> Result<usize> {
        let points = source.fetch_prices().await?;
        if points.is_empty() {
            return Err(SpotheatError::fetch("Price source returned no prices"));
        }
        let fresh = Self::from_points(points);
        let count = fresh.len();
        *self = fresh;
        Ok(count)
    }

    /// Price of the hour containing `now`
    pub fn price_at(&self, now: NaiveDateTime) -> Result<f64> {
        let hour = truncate_to_hour(now);
        self.prices
            .get(&hour)
            .copied()
            .ok_or_else(|| SpotheatError::no_data(hour))
    }

    /// Whether the hour containing `now` is among the `n` cheapest hours of
    /// its day. Ties with the n-th cheapest price count as cheap.
    pub fn is_among_n_cheapest_today(&self, now: NaiveDateTime, n: usize) -> Result<bool> {
        if n == 0 {
            return Err(SpotheatError::validation(
                "n_cheapest",
                "Must be at least 1",
            ));
        }
        let current = self.price_at(now)?;
        let date = now.date();
        let mut today: Vec<f64> = self.day(date).map(|(_, price)| price).collect();
        if today.len() < n {
            return Err(SpotheatError::insufficient_data(date, today.len(), n));
        }
        today.sort_by(f64::total_cmp);
        Ok(current <= today[n - 1])
    }

    /// All prices of the day containing `now`, in hour order
    pub fn today_prices(&self, now: NaiveDateTime) -> Vec<PricePoint> {
        self.day(now.date())
            .map(|(starts_at, price)| PricePoint { starts_at, price })
            .collect()
    }

    /// Hours of the day containing `now` that are among its `n` cheapest
    pub fn cheapest_hours_today(&self, now: NaiveDateTime, n: usize) -> Vec<NaiveDateTime> {
        self.day(now.date())
            .filter(|(hour, _)| {
                self.is_among_n_cheapest_today(*hour, n)
                    .unwrap_or(false)
            })
            .map(|(hour, _)| hour)
            .collect()
    }

    /// Every stored price, in hour order
    pub fn points(&self) -> Vec<PricePoint> {
        self.prices
            .iter()
            .map(|(&starts_at, &price)| PricePoint { starts_at, price })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    fn day(&self, date: NaiveDate) -> impl Iterator<Item = (NaiveDateTime, f64)> + '_ {
        let start = date.and_time(chrono::NaiveTime::MIN);
        self.prices
            .range(start..)
            .take_while(move |(hour, _)| hour.date() == date)
            .map(|(&hour, &price)| (hour, price))
    }
}
