use async_trait::async_trait;

use crate::candles::CandleSeries;
pub use crate::error::FetchError;

/// The market-data collaborator. Implementations own retries and timeouts.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Fetch the candle series of `pair` on `exchange` for one candle period.
    /// An exchange that does not support the period returns an empty series.
    async fn fetch_candles(
        &self,
        pair: &str,
        exchange: &str,
        period: &str,
    ) -> Result<CandleSeries, FetchError>;
}
