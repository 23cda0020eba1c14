//! Informants: raw auxiliary series with no hot/cold classification.

use ta::Next;
use ta::indicators::{BollingerBands, ExponentialMovingAverage, SimpleMovingAverage};

use crate::evaluator::CandleArgs;
use crate::rules::{ResultRow, RuleError, RuleResult};

/// Laguerre RSI (John Ehlers). Output lies in `[0, 1]`.
#[derive(Debug, Clone)]
pub(crate) struct LaguerreRsi {
    gamma: f64,
    stages: Option<[f64; 4]>,
}

impl LaguerreRsi {
    pub(crate) fn new(gamma: f64) -> Self {
        LaguerreRsi {
            gamma,
            stages: None,
        }
    }

    pub(crate) fn next(&mut self, price: f64) -> f64 {
        let g = self.gamma;
        let [p0, p1, p2, p3] = self.stages.unwrap_or([price; 4]);
        let l0 = (1.0 - g) * price + g * p0;
        let l1 = -g * l0 + p0 + g * p1;
        let l2 = -g * l1 + p1 + g * p2;
        let l3 = -g * l2 + p2 + g * p3;
        self.stages = Some([l0, l1, l2, l3]);

        let (mut up, mut down) = (0.0, 0.0);
        for delta in [l0 - l1, l1 - l2, l2 - l3] {
            if delta >= 0.0 {
                up += delta;
            } else {
                down -= delta;
            }
        }
        if up + down == 0.0 { 0.0 } else { up / (up + down) }
    }
}

fn ta_error(args: &CandleArgs<'_>, err: impl std::fmt::Debug) -> RuleError {
    RuleError::invalid(args.name, format!("{err:?}"))
}

fn non_empty(args: &CandleArgs<'_>) -> Result<(), RuleError> {
    args.require_len(1)
}

pub fn ohlcv(args: &CandleArgs<'_>) -> Result<RuleResult, RuleError> {
    non_empty(args)?;
    let rows = args
        .series
        .iter()
        .map(|candle| {
            ResultRow::new(candle.timestamp)
                .with("open", candle.open)
                .with("high", candle.high)
                .with("low", candle.low)
                .with("close", candle.close)
                .with("volume", candle.volume)
        })
        .collect();
    Ok(RuleResult::from_rows(rows))
}

pub fn sma(args: &CandleArgs<'_>) -> Result<RuleResult, RuleError> {
    let period = args.period_or(15);
    args.require_len(period)?;
    let mut average = SimpleMovingAverage::new(period).map_err(|e| ta_error(args, e))?;
    let rows = args
        .series
        .iter()
        .map(|candle| (candle.timestamp, average.next(candle.close)))
        .skip(period - 1)
        .map(|(timestamp, value)| ResultRow::new(timestamp).with("sma", value))
        .collect();
    Ok(RuleResult::from_rows(rows))
}

pub fn ema(args: &CandleArgs<'_>) -> Result<RuleResult, RuleError> {
    let period = args.period_or(15);
    args.require_len(period)?;
    let mut average = ExponentialMovingAverage::new(period).map_err(|e| ta_error(args, e))?;
    let rows = args
        .series
        .iter()
        .map(|candle| (candle.timestamp, average.next(candle.close)))
        .skip(period - 1)
        .map(|(timestamp, value)| ResultRow::new(timestamp).with("ema", value))
        .collect();
    Ok(RuleResult::from_rows(rows))
}

pub fn bollinger_bands(args: &CandleArgs<'_>) -> Result<RuleResult, RuleError> {
    let period = args.period_or(20);
    args.require_len(period)?;
    let mut bands = BollingerBands::new(period, 2.0).map_err(|e| ta_error(args, e))?;
    let rows = args
        .series
        .iter()
        .map(|candle| (candle.timestamp, bands.next(candle.close)))
        .skip(period - 1)
        .map(|(timestamp, out)| {
            ResultRow::new(timestamp)
                .with("upperband", out.upper)
                .with("middleband", out.average)
                .with("lowerband", out.lower)
        })
        .collect();
    Ok(RuleResult::from_rows(rows))
}

pub fn lrsi(args: &CandleArgs<'_>) -> Result<RuleResult, RuleError> {
    non_empty(args)?;
    let gamma = args.extras.get("gamma").copied().unwrap_or(0.5);
    if !(0.0..1.0).contains(&gamma) {
        return Err(RuleError::invalid(args.name, format!("gamma {gamma} outside [0, 1)")));
    }
    let mut filter = LaguerreRsi::new(gamma);
    let rows = args
        .series
        .iter()
        .map(|candle| ResultRow::new(candle.timestamp).with("lrsi", filter.next(candle.close)))
        .collect();
    Ok(RuleResult::from_rows(rows))
}
