//! This module contains the per-pair analysis pipeline logic.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::candle_cache::CandleCache;
use crate::candles::MarketCoordinate;
use crate::config::{AppConfig, CandleRuleConfig, CrossoverConfig, RuleConfig, SessionOverlay};
use crate::evaluator::{CandleArgs, CrossoverArgs, RuleEvaluator};
use crate::rules::{RuleError, RuleKind, RuleResult, Status};

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotEntry {
    /// Position of the entry in its rule's configuration list.
    pub index: usize,
    pub result: RuleResult,
    pub config: RuleConfig,
    /// `None` for informants and empty results.
    pub status: Option<Status>,
}

impl SnapshotEntry {
    /// Period a message about this entry is grouped under. Crossovers follow
    /// their key source, through other crossovers if needed.
    pub fn candle_period<'a>(&'a self, snapshot: &'a AnalysisSnapshot) -> Option<&'a str> {
        let mut entry = self;
        // sources are always inserted before the crossovers reading them, so the chain ends
        for _ in 0..=snapshot.len() {
            match &entry.config {
                RuleConfig::Crossover(config) => {
                    let key = config.key();
                    entry = snapshot.entry(key.kind, key.name, key.index)?;
                }
                other => return other.candle_period(),
            }
        }
        None
    }
}

/// kind -> rule name -> index -> entry, for one market coordinate and one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisSnapshot {
    rules: BTreeMap<RuleKind, BTreeMap<String, BTreeMap<usize, SnapshotEntry>>>,
}

impl AnalysisSnapshot {
    pub fn insert(&mut self, kind: RuleKind, name: &str, entry: SnapshotEntry) {
        self.rules
            .entry(kind)
            .or_default()
            .entry(name.to_owned())
            .or_default()
            .insert(entry.index, entry);
    }

    pub fn entry(&self, kind: RuleKind, name: &str, index: usize) -> Option<&SnapshotEntry> {
        self.rules.get(&kind)?.get(name)?.get(&index)
    }

    /// Entries of one kind in (name, index) order.
    pub fn entries(&self, kind: RuleKind) -> impl Iterator<Item = (&str, &SnapshotEntry)> {
        self.rules
            .get(&kind)
            .into_iter()
            .flat_map(|names| names.iter())
            .flat_map(|(name, entries)| entries.values().map(move |entry| (name.as_str(), entry)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (RuleKind, &str, &SnapshotEntry)> {
        self.rules.iter().flat_map(|(kind, names)| {
            names.iter().flat_map(move |(name, entries)| {
                entries
                    .values()
                    .map(move |entry| (*kind, name.as_str(), entry))
            })
        })
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

pub struct AnalysisRunner<'a> {
    evaluator: &'a RuleEvaluator,
    config: &'a AppConfig,
    overlay: &'a SessionOverlay,
}

impl<'a> AnalysisRunner<'a> {
    pub fn new(
        evaluator: &'a RuleEvaluator,
        config: &'a AppConfig,
        overlay: &'a SessionOverlay,
    ) -> Self {
        AnalysisRunner {
            evaluator,
            config,
            overlay,
        }
    }

    /// Candle periods any enabled indicator or informant needs.
    pub fn required_periods(&self) -> BTreeSet<String> {
        let mut periods = BTreeSet::new();
        self.collect_periods(&self.config.indicators, &mut periods);
        self.collect_periods(&self.config.informants, &mut periods);
        periods
    }

    fn collect_periods<C: CandleRuleConfig>(
        &self,
        rules: &BTreeMap<String, Vec<C>>,
        periods: &mut BTreeSet<String>,
    ) {
        for (name, entries) in rules {
            if !self.evaluator.supports(C::KIND, name) {
                continue;
            }
            for entry in entries {
                if self.is_enabled(name, entry) {
                    periods.insert(entry.candle_period().to_owned());
                }
            }
        }
    }

    fn is_enabled<C: CandleRuleConfig>(&self, name: &str, entry: &C) -> bool {
        self.overlay
            .is_enabled(name, Some(entry.candle_period()), entry.enabled())
    }

    /// Evaluates indicators, then informants, then crossovers for one pair.
    pub fn run(&self, coordinate: &MarketCoordinate, cache: &CandleCache) -> AnalysisSnapshot {
        let mut snapshot = AnalysisSnapshot::default();
        self.run_candle_rules(&self.config.indicators, coordinate, cache, &mut snapshot);
        self.run_candle_rules(&self.config.informants, coordinate, cache, &mut snapshot);
        self.run_crossovers(coordinate, &mut snapshot);
        snapshot
    }

    fn run_candle_rules<C: CandleRuleConfig>(
        &self,
        rules: &BTreeMap<String, Vec<C>>,
        coordinate: &MarketCoordinate,
        cache: &CandleCache,
        snapshot: &mut AnalysisSnapshot,
    ) {
        for (name, entries) in rules {
            if !self.evaluator.supports(C::KIND, name) {
                let err = RuleError::UnknownRule {
                    kind: C::KIND,
                    name: name.clone(),
                };
                warn!(%coordinate, error = %err, "skipping {} entries", C::KIND);
                continue;
            }
            for (index, entry) in entries.iter().enumerate() {
                if !self.is_enabled(name, entry) {
                    continue;
                }
                let period = entry.candle_period();
                let Some(series) = cache.series(coordinate, period) else {
                    debug!(%coordinate, rule = %name, index, period, "no candles for period");
                    continue;
                };

                let extras = entry.extras();
                let args = CandleArgs {
                    name,
                    series: &series,
                    signal: entry.signal(),
                    thresholds: entry.thresholds(),
                    period_count: entry.period_count(),
                    extras: &extras,
                };
                match self.evaluator.evaluate_candles(C::KIND, &args) {
                    Ok(result) => {
                        let status = match C::KIND {
                            RuleKind::Informant => None,
                            _ => result.status(),
                        };
                        snapshot.insert(
                            C::KIND,
                            name,
                            SnapshotEntry {
                                index,
                                result,
                                config: entry.to_rule_config(),
                                status,
                            },
                        );
                    }
                    Err(err) => {
                        warn!(%coordinate, error = %err, "skipping {} entries", C::KIND);
                        break;
                    }
                }
            }
        }
    }

    fn run_crossovers(&self, coordinate: &MarketCoordinate, snapshot: &mut AnalysisSnapshot) {
        for (name, entries) in &self.config.crossovers {
            for (index, entry) in entries.iter().enumerate() {
                if !self.overlay.is_enabled(name, None, entry.enabled) {
                    debug!(%coordinate, rule = %name, index, "crossover is disabled, skipping");
                    continue;
                }
                match self.evaluate_crossover(name, entry, snapshot) {
                    Ok(result) => {
                        let status = result.status();
                        snapshot.insert(
                            RuleKind::Crossover,
                            name,
                            SnapshotEntry {
                                index,
                                result,
                                config: RuleConfig::Crossover(entry.clone()),
                                status,
                            },
                        );
                    }
                    Err(err) => {
                        warn!(%coordinate, rule = %name, index, error = %err, "skipping crossover");
                    }
                }
            }
        }
    }

    fn evaluate_crossover(
        &self,
        name: &str,
        entry: &CrossoverConfig,
        snapshot: &AnalysisSnapshot,
    ) -> Result<RuleResult, RuleError> {
        if !self.evaluator.supports(RuleKind::Crossover, name) {
            return Err(RuleError::UnknownRule {
                kind: RuleKind::Crossover,
                name: name.to_owned(),
            });
        }
        let resolve = |kind: RuleKind, source: &str, index: usize| {
            snapshot
                .entry(kind, source, index)
                .ok_or_else(|| RuleError::UnresolvedReference {
                    kind,
                    name: source.to_owned(),
                    index,
                })
        };
        let (key_ref, crossed_ref) = (entry.key(), entry.crossed());
        let key = resolve(key_ref.kind, key_ref.name, key_ref.index)?;
        let crossed = resolve(crossed_ref.kind, crossed_ref.name, crossed_ref.index)?;

        self.evaluator.evaluate_crossover(&CrossoverArgs {
            name,
            key: &key.result,
            key_signal: key_ref.signal,
            key_index: key_ref.index,
            crossed: &crossed.result,
            crossed_signal: crossed_ref.signal,
            crossed_index: crossed_ref.index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::{Candle, CandleSeries};
    use crate::error::FetchError;
    use crate::market_data::MarketData;
    use async_trait::async_trait;

    struct Rally;

    #[async_trait]
    impl MarketData for Rally {
        async fn fetch_candles(
            &self,
            _pair: &str,
            _exchange: &str,
            period: &str,
        ) -> Result<CandleSeries, FetchError> {
            if period == "4h" {
                return Err(FetchError::Transient("timeout".to_owned()));
            }
            Ok(CandleSeries::new(
                (0..60)
                    .map(|i| {
                        let close = 100.0 + i as f64;
                        Candle {
                            timestamp: i * 3_600_000,
                            open: close - 0.5,
                            high: close + 1.0,
                            low: close - 1.0,
                            close,
                            volume: 5.0,
                        }
                    })
                    .collect(),
            ))
        }
    }

    const CONFIG: &str = r#"{
        "indicators": {
            "rsi": [
                { "candle_period": "1h", "signal": ["rsi"], "hot": 70, "cold": 30 },
                { "enabled": false, "candle_period": "1h", "signal": ["rsi"], "hot": 70, "cold": 30 },
                { "candle_period": "4h", "signal": ["rsi"], "hot": 70, "cold": 30 }
            ],
            "astrology": [ { "candle_period": "1h", "signal": ["stars"], "hot": 1, "cold": 0 } ]
        },
        "informants": {
            "ohlcv": [ { "candle_period": "1h", "signal": ["close"] } ],
            "sma": [ { "candle_period": "1h", "signal": ["sma"], "period_count": 5 } ]
        },
        "crossovers": {
            "std_crossover": [
                { "key_indicator": "ohlcv", "key_indicator_index": 0, "key_indicator_type": "informants",
                  "key_signal": "close", "crossed_indicator": "sma", "crossed_indicator_index": 0,
                  "crossed_indicator_type": "informants", "crossed_signal": "sma" },
                { "key_indicator": "rsi", "key_indicator_index": 1, "key_indicator_type": "indicators",
                  "key_signal": "rsi", "crossed_indicator": "sma", "crossed_indicator_index": 0,
                  "crossed_indicator_type": "informants", "crossed_signal": "sma" },
                { "key_indicator": "sma", "key_indicator_index": 7, "key_indicator_type": "informants",
                  "key_signal": "sma", "crossed_indicator": "sma", "crossed_indicator_index": 0,
                  "crossed_indicator_type": "informants", "crossed_signal": "sma" }
            ]
        }
    }"#;

    async fn analyse(config: &AppConfig, overlay: &SessionOverlay) -> AnalysisSnapshot {
        let evaluator = RuleEvaluator::standard();
        let runner = AnalysisRunner::new(&evaluator, config, overlay);
        let coordinate = MarketCoordinate::new("binance", "BTC/USDT");
        let mut cache = CandleCache::new();
        cache
            .prefetch(
                &Rally,
                runner
                    .required_periods()
                    .into_iter()
                    .map(|period| (coordinate.clone(), period)),
            )
            .await;
        runner.run(&coordinate, &cache)
    }

    #[tokio::test]
    async fn evaluates_indicators_informants_and_crossovers() {
        let config: AppConfig = serde_json::from_str(CONFIG).unwrap();
        let snapshot = analyse(&config, &SessionOverlay::new()).await;

        let rsi = snapshot.entry(RuleKind::Indicator, "rsi", 0).unwrap();
        assert_eq!(rsi.status, Some(Status::Hot));
        // disabled entry keeps its index free, failed period is absent
        assert!(snapshot.entry(RuleKind::Indicator, "rsi", 1).is_none());
        assert!(snapshot.entry(RuleKind::Indicator, "rsi", 2).is_none());
        assert!(snapshot.entries(RuleKind::Indicator).all(|(name, _)| name != "astrology"));

        let ohlcv = snapshot.entry(RuleKind::Informant, "ohlcv", 0).unwrap();
        assert_eq!(ohlcv.status, None);

        let crossover = snapshot.entry(RuleKind::Crossover, "std_crossover", 0).unwrap();
        assert_eq!(crossover.status, Some(Status::Hot));
        assert_eq!(crossover.candle_period(&snapshot), Some("1h"));
        assert!(snapshot.entry(RuleKind::Crossover, "std_crossover", 1).is_none());
        assert!(snapshot.entry(RuleKind::Crossover, "std_crossover", 2).is_none());
        assert_eq!(snapshot.len(), 4);
    }

    #[tokio::test]
    async fn chained_crossover_uses_the_root_period() {
        let config: AppConfig = serde_json::from_str(
            r#"{
            "informants": {
                "ohlcv": [ { "candle_period": "1h", "signal": ["close"] } ],
                "sma": [ { "candle_period": "1h", "signal": ["sma"], "period_count": 5 } ]
            },
            "crossovers": {
                "std_crossover": [
                    { "key_indicator": "ohlcv", "key_indicator_index": 0, "key_indicator_type": "informants",
                      "key_signal": "close", "crossed_indicator": "sma", "crossed_indicator_index": 0,
                      "crossed_indicator_type": "informants", "crossed_signal": "sma" },
                    { "key_indicator": "std_crossover", "key_indicator_index": 0, "key_indicator_type": "crossovers",
                      "key_signal": "close_0", "crossed_indicator": "sma", "crossed_indicator_index": 0,
                      "crossed_indicator_type": "informants", "crossed_signal": "sma" }
                ]
            }
        }"#,
        )
        .unwrap();
        let snapshot = analyse(&config, &SessionOverlay::new()).await;

        let chained = snapshot.entry(RuleKind::Crossover, "std_crossover", 1).unwrap();
        assert!(!chained.result.is_empty());
        assert_eq!(chained.candle_period(&snapshot), Some("1h"));
    }

    #[tokio::test]
    async fn unknown_rule_is_warned_even_without_candles() {
        use std::sync::{Arc, Mutex};
        use tracing::field::{Field, Visit};
        use tracing::{Event, Level, Subscriber};
        use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

        #[derive(Clone, Default)]
        struct Warnings(Arc<Mutex<Vec<String>>>);

        struct Fields(String);

        impl Visit for Fields {
            fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
                self.0.push_str(&format!("{}={:?} ", field.name(), value));
            }
        }

        impl<S: Subscriber> Layer<S> for Warnings {
            fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
                if *event.metadata().level() == Level::WARN {
                    let mut fields = Fields(String::new());
                    event.record(&mut fields);
                    self.0.lock().unwrap().push(fields.0);
                }
            }
        }

        let config: AppConfig = serde_json::from_str(
            r#"{
            "indicators": {
                "rsi": [ { "candle_period": "1h", "signal": ["rsi"], "hot": 70, "cold": 30 } ],
                "astrology": [ { "candle_period": "12h", "signal": ["stars"], "hot": 1, "cold": 0 } ]
            }
        }"#,
        )
        .unwrap();
        let evaluator = RuleEvaluator::standard();
        let overlay = SessionOverlay::new();
        let runner = AnalysisRunner::new(&evaluator, &config, &overlay);
        assert!(!runner.required_periods().contains("12h"));

        let coordinate = MarketCoordinate::new("binance", "BTC/USDT");
        let mut cache = CandleCache::new();
        cache
            .prefetch(&Rally, [(coordinate.clone(), "1h".to_owned())])
            .await;

        let warnings = Warnings::default();
        let subscriber = tracing_subscriber::registry().with(warnings.clone());
        let snapshot = tracing::subscriber::with_default(subscriber, || runner.run(&coordinate, &cache));

        assert!(snapshot.entry(RuleKind::Indicator, "rsi", 0).is_some());
        let warnings = warnings.0.lock().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("no such indicator astrology"), "{warnings:?}");
    }

    #[tokio::test]
    async fn overlay_toggles_change_what_runs() {
        let config: AppConfig = serde_json::from_str(CONFIG).unwrap();
        let evaluator = RuleEvaluator::standard();
        let mut overlay = SessionOverlay::new();
        overlay.set_rule_enabled("rsi", "4h", false);
        let runner = AnalysisRunner::new(&evaluator, &config, &overlay);
        assert_eq!(
            runner.required_periods().into_iter().collect::<Vec<_>>(),
            vec!["1h".to_owned()]
        );

        overlay.set_rule_enabled("rsi", "1h", true);
        let snapshot = analyse(&config, &overlay).await;
        assert!(snapshot.entry(RuleKind::Indicator, "rsi", 1).is_some());
        assert!(snapshot.entry(RuleKind::Crossover, "std_crossover", 1).is_some());
    }
}
