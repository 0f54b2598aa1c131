use super::PricePoint;
use crate::error::Result;

/// Upstream provider of hourly prices for today and, once published, tomorrow
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    /// Retrieve the full set of known hourly prices
    ///
    /// Any error means "no update"; callers keep their previous data.
    async fn fetch_prices(&self) -> Result<Vec<PricePoint>>;
}
