//! Candle data and the market coordinates it belongs to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An (exchange, pair) coordinate. The pair is always stored as uppercase `BASE/QUOTE`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketCoordinate {
    pub exchange: String,
    pub pair: String,
}

impl MarketCoordinate {
    pub fn new(exchange: impl Into<String>, pair: impl AsRef<str>) -> Self {
        MarketCoordinate {
            exchange: exchange.into(),
            pair: pair.as_ref().trim().to_uppercase(),
        }
    }

    /// Splits the pair into `(base, quote)`.
    pub fn assets(&self) -> Option<(&str, &str)> {
        self.pair.split_once('/')
    }
}

impl fmt::Display for MarketCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.pair, self.exchange)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time in milliseconds since the epoch.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// OHLCV records for one (coordinate, candle period), ordered by timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|candle| candle.timestamp);
        candles.dedup_by_key(|candle| candle.timestamp);
        CandleSeries { candles }
    }

    /// Appends a candle newer than the last one. Older or duplicate timestamps are rejected.
    pub fn push(&mut self, candle: Candle) -> bool {
        match self.candles.last() {
            Some(last) if last.timestamp >= candle.timestamp => false,
            _ => {
                self.candles.push(candle);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|candle| candle.close).collect()
    }
}

/// Symbol metadata resolved by the exchange client before a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketInfo {
    pub base: String,
    pub quote: String,
    /// Number of decimals the exchange quotes prices with.
    pub price_precision: u32,
}

/// exchange id -> pair -> metadata
pub type Markets = BTreeMap<String, BTreeMap<String, MarketInfo>>;

/// Fibonacci retracement levels keyed by level label (e.g. `"61.80"`).
pub type FibonacciLevels = BTreeMap<String, f64>;

pub type FibonacciBook = BTreeMap<MarketCoordinate, FibonacciLevels>;
