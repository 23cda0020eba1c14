use ta::indicators::{ExponentialMovingAverage, MoneyFlowIndex, RelativeStrengthIndex};
use ta::{DataItem, Next};

use crate::evaluator::CandleArgs;
use crate::informants::LaguerreRsi;
use crate::rules::{self, ResultRow, RuleError, RuleResult};

/// Applies the configured thresholds to the first configured signal.
fn classified(args: &CandleArgs<'_>, rows: Vec<ResultRow>) -> Result<RuleResult, RuleError> {
    let thresholds = args
        .thresholds
        .ok_or_else(|| RuleError::invalid(args.name, "missing hot/cold thresholds"))?;
    let column = args
        .signal
        .first()
        .ok_or_else(|| RuleError::invalid(args.name, "no signal configured"))?;
    rules::classify(args.name, rows, column, thresholds)
}

fn ta_error(args: &CandleArgs<'_>, err: impl std::fmt::Debug) -> RuleError {
    RuleError::invalid(args.name, format!("{err:?}"))
}

pub fn rsi(args: &CandleArgs<'_>) -> Result<RuleResult, RuleError> {
    let period = args.period_or(14);
    args.require_len(period + 1)?;

    let mut rsi_indicator = RelativeStrengthIndex::new(period).map_err(|e| ta_error(args, e))?;
    // `lrsi_filter` is the gamma of an extra Laguerre RSI column.
    let mut laguerre = match args.extras.get("lrsi_filter").copied() {
        Some(gamma) if !(0.0..1.0).contains(&gamma) => {
            return Err(RuleError::invalid(args.name, format!("lrsi_filter {gamma} outside [0, 1)")));
        }
        Some(gamma) => Some(LaguerreRsi::new(gamma)),
        None => None,
    };

    let mut rows = Vec::with_capacity(args.series.len().saturating_sub(period));
    for (i, candle) in args.series.iter().enumerate() {
        let value = rsi_indicator.next(candle.close);
        let lrsi = laguerre.as_mut().map(|filter| filter.next(candle.close));
        if i < period {
            continue;
        }
        let mut row = ResultRow::new(candle.timestamp).with("rsi", value);
        if let Some(lrsi) = lrsi {
            row = row.with("lrsi", lrsi);
        }
        rows.push(row);
    }
    classified(args, rows)
}

pub fn macd(args: &CandleArgs<'_>) -> Result<RuleResult, RuleError> {
    const FAST: usize = 12;
    const SLOW: usize = 26;
    let signal_period = args.period_or(9);
    args.require_len(SLOW + signal_period)?;

    let mut fast = ExponentialMovingAverage::new(FAST).map_err(|e| ta_error(args, e))?;
    let mut slow = ExponentialMovingAverage::new(SLOW).map_err(|e| ta_error(args, e))?;
    let mut signal = ExponentialMovingAverage::new(signal_period).map_err(|e| ta_error(args, e))?;

    let warm_up = SLOW + signal_period - 2;
    let mut rows = Vec::new();
    for (i, candle) in args.series.iter().enumerate() {
        let line = fast.next(candle.close) - slow.next(candle.close);
        if i + 1 < SLOW {
            continue;
        }
        let signal_line = signal.next(line);
        if i < warm_up {
            continue;
        }
        rows.push(
            ResultRow::new(candle.timestamp)
                .with("macd", line)
                .with("macd_signal", signal_line)
                .with("macd_hist", line - signal_line),
        );
    }
    classified(args, rows)
}

pub fn mfi(args: &CandleArgs<'_>) -> Result<RuleResult, RuleError> {
    let period = args.period_or(14);
    args.require_len(period + 1)?;

    let mut mfi_indicator = MoneyFlowIndex::new(period).map_err(|e| ta_error(args, e))?;
    let mut rows = Vec::new();
    for (i, candle) in args.series.iter().enumerate() {
        let item = DataItem::builder()
            .open(candle.open)
            .high(candle.high)
            .low(candle.low)
            .close(candle.close)
            .volume(candle.volume)
            .build()
            .map_err(|e| ta_error(args, e))?;
        let value = mfi_indicator.next(&item);
        if i < period {
            continue;
        }
        rows.push(ResultRow::new(candle.timestamp).with("mfi", value));
    }
    classified(args, rows)
}

/// Difference between the close and the close `period` candles earlier.
pub fn momentum(args: &CandleArgs<'_>) -> Result<RuleResult, RuleError> {
    let period = args.period_or(10);
    args.require_len(period + 1)?;

    let candles = args.series.as_slice();
    let rows = candles
        .windows(period + 1)
        .map(|window| {
            let (first, last) = (window[0], window[period]);
            ResultRow::new(last.timestamp).with("momentum", last.close - first.close)
        })
        .collect();
    classified(args, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::{Candle, CandleSeries};
    use crate::rules::{Status, Thresholds};
    use std::collections::BTreeMap;

    fn series(closes: &[f64]) -> CandleSeries {
        CandleSeries::new(
            closes
                .iter()
                .enumerate()
                .map(|(i, &close)| Candle {
                    timestamp: i as i64 * 60_000,
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 10.0,
                })
                .collect(),
        )
    }

    fn args<'a>(
        name: &'a str,
        series: &'a CandleSeries,
        signal: &'a [String],
        extras: &'a BTreeMap<String, f64>,
    ) -> CandleArgs<'a> {
        CandleArgs {
            name,
            series,
            signal,
            thresholds: Some(Thresholds::new(70.0, 30.0)),
            period_count: None,
            extras,
        }
    }

    #[test]
    fn rsi_of_steady_rally_is_hot() {
        let closes: Vec<f64> = (1..=40).map(|i| 100.0 + i as f64).collect();
        let candles = series(&closes);
        let signal = vec!["rsi".to_owned()];
        let extras = BTreeMap::new();
        let result = rsi(&args("rsi", &candles, &signal, &extras)).unwrap();

        assert_eq!(result.len(), 40 - 14);
        assert_eq!(result.status(), Some(Status::Hot));
        assert!(result.latest().unwrap().get("lrsi").is_none());
    }

    #[test]
    fn rsi_of_steady_decline_is_cold() {
        let closes: Vec<f64> = (1..=40).map(|i| 200.0 - i as f64).collect();
        let candles = series(&closes);
        let signal = vec!["rsi".to_owned()];
        let extras = BTreeMap::from([("lrsi_filter".to_owned(), 0.2)]);
        let result = rsi(&args("rsi", &candles, &signal, &extras)).unwrap();

        assert_eq!(result.status(), Some(Status::Cold));
        assert!(result.latest().unwrap().get("lrsi").is_some());
    }

    #[test]
    fn lrsi_filter_sets_the_laguerre_gamma() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let candles = series(&closes);
        let signal = vec!["rsi".to_owned()];
        let latest_lrsi = |gamma: f64| {
            let extras = BTreeMap::from([("lrsi_filter".to_owned(), gamma)]);
            let result = rsi(&args("rsi", &candles, &signal, &extras)).unwrap();
            result.latest().unwrap().get("lrsi").unwrap()
        };

        let mut expected = LaguerreRsi::new(0.2);
        let expected = closes.iter().map(|&close| expected.next(close)).last().unwrap();
        assert_eq!(latest_lrsi(0.2), expected);
        assert_ne!(latest_lrsi(0.2), latest_lrsi(0.8));

        let extras = BTreeMap::from([("lrsi_filter".to_owned(), 1.5)]);
        let err = rsi(&args("rsi", &candles, &signal, &extras)).unwrap_err();
        assert!(matches!(err, RuleError::InvalidArguments { .. }));
    }

    #[test]
    fn short_series_is_invalid() {
        let candles = series(&[1.0, 2.0, 3.0]);
        let signal = vec!["rsi".to_owned()];
        let extras = BTreeMap::new();
        let err = rsi(&args("rsi", &candles, &signal, &extras)).unwrap_err();
        assert!(matches!(err, RuleError::InvalidArguments { .. }));
    }

    #[test]
    fn macd_emits_all_columns() {
        let closes: Vec<f64> = (0..60).map(|i| 50.0 + (i as f64 * 0.3).sin()).collect();
        let candles = series(&closes);
        let signal = vec!["macd".to_owned()];
        let extras = BTreeMap::new();
        let mut macd_args = args("macd", &candles, &signal, &extras);
        macd_args.thresholds = Some(Thresholds::new(0.0, 0.0));
        let result = macd(&macd_args).unwrap();

        assert_eq!(result.len(), 60 - (26 + 9 - 2));
        let row = result.latest().unwrap();
        let (line, signal_line, hist) = (
            row.get("macd").unwrap(),
            row.get("macd_signal").unwrap(),
            row.get("macd_hist").unwrap(),
        );
        assert!((line - signal_line - hist).abs() < 1e-12);
    }

    #[test]
    fn momentum_compares_against_lookback() {
        let closes: Vec<f64> = (0..15).map(|i| i as f64 * 2.0).collect();
        let candles = series(&closes);
        let signal = vec!["momentum".to_owned()];
        let extras = BTreeMap::new();
        let mut momentum_args = args("momentum", &candles, &signal, &extras);
        momentum_args.thresholds = Some(Thresholds::new(0.0, 0.0));
        let result = momentum(&momentum_args).unwrap();

        assert_eq!(result.len(), 5);
        assert_eq!(result.latest().unwrap().get("momentum"), Some(20.0));
        assert_eq!(result.status(), Some(Status::Hot));
    }

    #[test]
    fn mfi_requires_thresholds() {
        let closes: Vec<f64> = (0..30).map(|i| 10.0 + i as f64).collect();
        let candles = series(&closes);
        let signal = vec!["mfi".to_owned()];
        let extras = BTreeMap::new();
        let mut mfi_args = args("mfi", &candles, &signal, &extras);
        mfi_args.thresholds = None;
        assert!(mfi(&mfi_args).is_err());

        mfi_args.thresholds = Some(Thresholds::new(80.0, 20.0));
        let result = mfi(&mfi_args).unwrap();
        assert_eq!(result.len(), 30 - 14);
    }
}
