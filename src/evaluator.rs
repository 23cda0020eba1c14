//! Name-based dispatch of rules to their implementations.

use std::collections::{BTreeMap, HashMap};

use tracing::info;

use crate::candles::CandleSeries;
use crate::rules::{RuleError, RuleKind, RuleResult, Thresholds};
use crate::{crossovers, indicators, informants};

/// Argument bundle shared by indicators and informants.
#[derive(Debug, Clone, Copy)]
pub struct CandleArgs<'a> {
    pub name: &'a str,
    pub series: &'a CandleSeries,
    pub signal: &'a [String],
    /// Always present for indicators, absent for informants.
    pub thresholds: Option<Thresholds>,
    pub period_count: Option<usize>,
    pub extras: &'a BTreeMap<String, f64>,
}

impl CandleArgs<'_> {
    pub fn period_or(&self, default: usize) -> usize {
        self.period_count.unwrap_or(default)
    }

    /// Fails unless the series holds at least `needed` candles.
    pub fn require_len(&self, needed: usize) -> Result<(), RuleError> {
        if self.series.len() < needed {
            Err(RuleError::invalid(
                self.name,
                format!("needs {} candles, got {}", needed, self.series.len()),
            ))
        } else {
            Ok(())
        }
    }
}

/// Two results computed earlier in the same run, and the columns to compare.
#[derive(Debug, Clone, Copy)]
pub struct CrossoverArgs<'a> {
    pub name: &'a str,
    pub key: &'a RuleResult,
    pub key_signal: &'a str,
    pub key_index: usize,
    pub crossed: &'a RuleResult,
    pub crossed_signal: &'a str,
    pub crossed_index: usize,
}

pub type CandleRule = fn(&CandleArgs<'_>) -> Result<RuleResult, RuleError>;
pub type CrossoverRule = fn(&CrossoverArgs<'_>) -> Result<RuleResult, RuleError>;

pub struct RuleEvaluator {
    indicators: HashMap<String, CandleRule>,
    informants: HashMap<String, CandleRule>,
    crossovers: HashMap<String, CrossoverRule>,
}

impl Default for RuleEvaluator {
    fn default() -> Self {
        Self::standard()
    }
}

impl RuleEvaluator {
    pub fn empty() -> Self {
        RuleEvaluator {
            indicators: HashMap::new(),
            informants: HashMap::new(),
            crossovers: HashMap::new(),
        }
    }

    /// Evaluator with every built-in rule registered.
    pub fn standard() -> Self {
        let mut evaluator = Self::empty();
        evaluator
            .register_indicator("rsi", indicators::rsi)
            .register_indicator("macd", indicators::macd)
            .register_indicator("mfi", indicators::mfi)
            .register_indicator("momentum", indicators::momentum)
            .register_informant("ohlcv", informants::ohlcv)
            .register_informant("sma", informants::sma)
            .register_informant("ema", informants::ema)
            .register_informant("bollinger_bands", informants::bollinger_bands)
            .register_informant("lrsi", informants::lrsi)
            .register_crossover("std_crossover", crossovers::std_crossover);
        evaluator
    }

    pub fn register_indicator(&mut self, name: &str, rule: CandleRule) -> &mut Self {
        self.indicators.insert(name.to_owned(), rule);
        self
    }

    pub fn register_informant(&mut self, name: &str, rule: CandleRule) -> &mut Self {
        self.informants.insert(name.to_owned(), rule);
        self
    }

    pub fn register_crossover(&mut self, name: &str, rule: CrossoverRule) -> &mut Self {
        self.crossovers.insert(name.to_owned(), rule);
        self
    }

    pub fn supports(&self, kind: RuleKind, name: &str) -> bool {
        match kind {
            RuleKind::Indicator => self.indicators.contains_key(name),
            RuleKind::Informant => self.informants.contains_key(name),
            RuleKind::Crossover => self.crossovers.contains_key(name),
        }
    }

    /// Runs an indicator or informant.
    ///
    /// Only `UnknownRule` is returned as an error. Invalid arguments are logged and
    /// yield an empty result.
    pub fn evaluate_candles(
        &self,
        kind: RuleKind,
        args: &CandleArgs<'_>,
    ) -> Result<RuleResult, RuleError> {
        let table = match kind {
            RuleKind::Indicator => &self.indicators,
            RuleKind::Informant => &self.informants,
            RuleKind::Crossover => return Err(unknown(kind, args.name)),
        };
        let rule = table.get(args.name).ok_or_else(|| unknown(kind, args.name))?;
        absorb_invalid(kind, rule(args))
    }

    pub fn evaluate_crossover(&self, args: &CrossoverArgs<'_>) -> Result<RuleResult, RuleError> {
        let rule = self
            .crossovers
            .get(args.name)
            .ok_or_else(|| unknown(RuleKind::Crossover, args.name))?;
        absorb_invalid(RuleKind::Crossover, rule(args))
    }
}

fn unknown(kind: RuleKind, name: &str) -> RuleError {
    RuleError::UnknownRule {
        kind,
        name: name.to_owned(),
    }
}

fn absorb_invalid(
    kind: RuleKind,
    outcome: Result<RuleResult, RuleError>,
) -> Result<RuleResult, RuleError> {
    match outcome {
        Err(err @ RuleError::InvalidArguments { .. }) => {
            info!(%kind, error = %err, "rule could not be evaluated, using empty result");
            Ok(RuleResult::empty())
        }
        other => other,
    }
}
