//! Per-run cache of candle series, one fetch per (coordinate, period).

use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, warn};

use crate::candles::{CandleSeries, MarketCoordinate};
use crate::market_data::MarketData;

/// Parallel fetches in flight for one exchange.
const FETCH_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum CachedSeries {
    Series(Arc<CandleSeries>),
    /// The period is unsupported or the fetch failed.
    Empty,
}

type CacheKey = (MarketCoordinate, String);

#[derive(Debug, Default)]
pub struct CandleCache {
    entries: HashMap<CacheKey, CachedSeries>,
    fetches: usize,
}

impl CandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached series, fetching it first if this run has not seen it.
    pub async fn get(
        &mut self,
        source: &dyn MarketData,
        coordinate: &MarketCoordinate,
        period: &str,
    ) -> Option<Arc<CandleSeries>> {
        let key = (coordinate.clone(), period.to_owned());
        if !self.entries.contains_key(&key) {
            let entry = fetch(source, coordinate, period).await;
            self.fetches += 1;
            self.entries.insert(key, entry);
        }
        self.series(coordinate, period)
    }

    /// Fetches every requested (coordinate, period) that is not cached yet.
    pub async fn prefetch<I>(&mut self, source: &dyn MarketData, requests: I)
    where
        I: IntoIterator<Item = (MarketCoordinate, String)>,
    {
        let mut seen = HashSet::new();
        let missing: Vec<CacheKey> = requests
            .into_iter()
            .filter(|key| !self.entries.contains_key(key) && seen.insert(key.clone()))
            .collect();

        let fetched: Vec<(CacheKey, CachedSeries)> = stream::iter(missing)
            .map(|(coordinate, period)| async move {
                let entry = fetch(source, &coordinate, &period).await;
                ((coordinate, period), entry)
            })
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await;

        self.fetches += fetched.len();
        self.entries.extend(fetched);
    }

    /// `None` when the entry was never fetched.
    pub fn peek(&self, coordinate: &MarketCoordinate, period: &str) -> Option<&CachedSeries> {
        self.entries.get(&(coordinate.clone(), period.to_owned()))
    }

    /// The series if it was fetched and non-empty.
    pub fn series(&self, coordinate: &MarketCoordinate, period: &str) -> Option<Arc<CandleSeries>> {
        match self.peek(coordinate, period)? {
            CachedSeries::Series(series) => Some(Arc::clone(series)),
            CachedSeries::Empty => None,
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches
    }
}

async fn fetch(source: &dyn MarketData, coordinate: &MarketCoordinate, period: &str) -> CachedSeries {
    match source
        .fetch_candles(&coordinate.pair, &coordinate.exchange, period)
        .await
    {
        Ok(series) if series.is_empty() => {
            warn!(
                exchange = %coordinate.exchange,
                pair = %coordinate.pair,
                period,
                "no candle data, skipping period"
            );
            CachedSeries::Empty
        }
        Ok(series) => CachedSeries::Series(Arc::new(series)),
        Err(err) => {
            error!(
                exchange = %coordinate.exchange,
                pair = %coordinate.pair,
                period,
                error = %err,
                "failed to fetch candles, skipping period"
            );
            CachedSeries::Empty
        }
    }
}
