//! Alert message rendering for the entries the decider lets through.

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::{debug, error, warn};

use crate::alerts::{AlertDecider, Decision};
use crate::analysis::{AnalysisSnapshot, SnapshotEntry};
use crate::candles::{MarketCoordinate, MarketInfo};
use crate::config::RuleConfig;
use crate::crossovers::column_name;
use crate::error::RenderError;
use crate::rules::RuleKind;
use crate::template::{Template, title_case};

/// Informant values of one candle period that alert text may quote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Companions {
    /// `ohlcv` values of the latest candle, in configured signal order.
    pub prices: Vec<(String, f64)>,
    pub lrsi: Option<f64>,
}

/// Collects companion values per candle period from a pair's informants.
pub fn companions(snapshot: &AnalysisSnapshot) -> BTreeMap<String, Companions> {
    let mut by_period: BTreeMap<String, Companions> = BTreeMap::new();
    for (name, entry) in snapshot.entries(RuleKind::Informant) {
        let (Some(period), Some(latest)) = (entry.config.candle_period(), entry.result.latest()) else {
            continue;
        };
        match name {
            "ohlcv" => {
                let prices = entry
                    .config
                    .signal()
                    .iter()
                    .filter_map(|signal| Some((signal.clone(), latest.get(signal)?)))
                    .collect();
                by_period.entry(period.to_owned()).or_default().prices = prices;
            }
            "lrsi" => {
                by_period.entry(period.to_owned()).or_default().lrsi = latest.get("lrsi");
            }
            _ => {}
        }
    }
    by_period
}

pub fn format_decimal(value: f64, precision: u32) -> String {
    format!("{value:.prec$}", prec = precision as usize)
}

/// `" Open: 1.00 Close: 2.00"`, with a leading space per price.
pub fn format_prices(prices: &[(String, f64)], precision: u32) -> String {
    prices
        .iter()
        .map(|(name, value)| format!(" {}: {}", title_case(name), format_decimal(*value, precision)))
        .collect()
}

/// Latest values of an entry, formatted to the market's price precision.
fn entry_values(entry: &SnapshotEntry, precision: u32) -> Map<String, Value> {
    let Some(latest) = entry.result.latest() else {
        return Map::new();
    };
    let columns: Vec<String> = match &entry.config {
        RuleConfig::Crossover(config) => vec![
            column_name(&config.key_signal, config.key_indicator_index),
            column_name(&config.crossed_signal, config.crossed_indicator_index),
        ],
        other => other.signal().to_vec(),
    };
    columns
        .into_iter()
        .filter_map(|column| {
            let value = latest.get(&column)?;
            Some((column, Value::String(format_decimal(value, precision))))
        })
        .collect()
}

/// Everything a template can reference about one alert.
pub struct AlertContext<'a> {
    pub coordinate: &'a MarketCoordinate,
    pub market: &'a MarketInfo,
    pub kind: RuleKind,
    pub name: &'a str,
    pub entry: &'a SnapshotEntry,
    pub decision: Decision,
    pub companions: Option<&'a Companions>,
}

impl AlertContext<'_> {
    fn to_value(&self) -> Value {
        let precision = self.market.price_precision;
        let prices = self
            .companions
            .map(|companions| format_prices(&companions.prices, precision))
            .unwrap_or_default();
        let lrsi = self
            .companions
            .and_then(|companions| companions.lrsi)
            .map(Value::from)
            .unwrap_or_else(|| Value::String(String::new()));

        json!({
            "values": entry_values(self.entry, precision),
            "exchange": self.coordinate.exchange,
            "market": self.coordinate.pair,
            "base_currency": self.market.base,
            "quote_currency": self.market.quote,
            "indicator": self.name,
            "indicator_type": self.kind,
            "indicator_number": self.entry.index,
            "analysis": {
                "result": self.entry.result.latest(),
                "config": self.entry.config,
                "status": self.entry.status,
            },
            "status": self.decision.status,
            "last_status": self.decision.previous.map(|status| status.as_str()).unwrap_or_default(),
            "prices": prices,
            "lrsi": lrsi,
        })
    }
}

pub struct MessageRenderer {
    template: Template,
}

impl MessageRenderer {
    pub fn new(source: &str) -> Result<Self, RenderError> {
        Ok(MessageRenderer {
            template: Template::parse(source)?,
        })
    }

    pub fn render(&self, context: &AlertContext<'_>) -> Result<String, RenderError> {
        self.template.render(&context.to_value())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderFailure {
    pub coordinate: MarketCoordinate,
    pub kind: RuleKind,
    pub name: String,
    pub index: usize,
    pub error: RenderError,
}

/// Messages of one pair, grouped by candle period.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairMessages {
    /// Every period with a non-empty result appears, possibly with no messages.
    pub by_period: BTreeMap<String, Vec<String>>,
    pub failures: Vec<RenderFailure>,
}

/// Decides and renders the alerts of one pair's snapshot.
pub fn pair_messages(
    coordinate: &MarketCoordinate,
    market: &MarketInfo,
    snapshot: &AnalysisSnapshot,
    decider: &AlertDecider<'_>,
    renderer: &MessageRenderer,
) -> PairMessages {
    let companions = companions(snapshot);
    let mut out = PairMessages::default();

    for (kind, name, entry) in snapshot.iter() {
        if kind == RuleKind::Informant || entry.result.is_empty() {
            continue;
        }
        let Some(period) = entry.candle_period(snapshot) else {
            warn!(%coordinate, rule = name, index = entry.index, "no candle period for entry, dropping its alert");
            continue;
        };
        let messages = out.by_period.entry(period.to_owned()).or_default();

        let Some(decision) = decider.decide(coordinate, kind, name, entry) else {
            debug!(%coordinate, rule = name, index = entry.index, "no alert");
            continue;
        };
        let context = AlertContext {
            coordinate,
            market,
            kind,
            name,
            entry,
            decision,
            companions: companions.get(period),
        };
        match renderer.render(&context) {
            Ok(message) => messages.push(message),
            Err(err) => {
                error!(%coordinate, rule = name, index = entry.index, error = %err, "failed to render alert");
                out.failures.push(RenderFailure {
                    coordinate: coordinate.clone(),
                    kind,
                    name: name.to_owned(),
                    index: entry.index,
                    error: err,
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertHistory;
    use crate::config::{AlertFrequency, IndicatorConfig, InformantConfig};
    use crate::rules::{ResultRow, RuleResult, Status};

    fn indicator(status: Status, rsi: f64) -> SnapshotEntry {
        let mut row = ResultRow::new(10).with("rsi", rsi);
        row.is_hot = status == Status::Hot;
        row.is_cold = status == Status::Cold;
        SnapshotEntry {
            index: 0,
            result: RuleResult::from_rows(vec![row]),
            config: RuleConfig::Indicator(IndicatorConfig {
                enabled: true,
                candle_period: "1h".to_owned(),
                signal: vec!["rsi".to_owned()],
                hot: 70.0,
                cold: 30.0,
                period_count: None,
                alert_enabled: true,
                alert_frequency: AlertFrequency::Once,
                lrsi_filter: None,
            }),
            status: Some(status),
        }
    }

    fn informant(index: usize, signal: &[&str], row: ResultRow) -> SnapshotEntry {
        SnapshotEntry {
            index,
            result: RuleResult::from_rows(vec![row]),
            config: RuleConfig::Informant(InformantConfig {
                enabled: true,
                candle_period: "1h".to_owned(),
                signal: signal.iter().map(|s| s.to_string()).collect(),
                period_count: None,
                gamma: None,
            }),
            status: None,
        }
    }

    fn btc() -> (MarketCoordinate, MarketInfo) {
        (
            MarketCoordinate::new("binance", "BTC/USDT"),
            MarketInfo {
                base: "BTC".to_owned(),
                quote: "USDT".to_owned(),
                price_precision: 2,
            },
        )
    }

    #[test]
    fn renders_values_prices_and_filter() {
        let mut snapshot = AnalysisSnapshot::default();
        snapshot.insert(RuleKind::Indicator, "rsi", indicator(Status::Hot, 75.123));
        snapshot.insert(
            RuleKind::Informant,
            "ohlcv",
            informant(0, &["open", "close"], ResultRow::new(10).with("open", 1.0).with("close", 2.5)),
        );
        snapshot.insert(
            RuleKind::Informant,
            "lrsi",
            informant(0, &["lrsi"], ResultRow::new(10).with("lrsi", 0.25)),
        );

        let (coordinate, market) = btc();
        let history = AlertHistory::new();
        let renderer = MessageRenderer::new(
            "{{ market }} {{ indicator | upper }} {{ status }} {{ values.rsi }} [{{ last_status }}]{{ prices }} {{ lrsi }} {{ quote_currency }}",
        )
        .unwrap();
        let messages = pair_messages(&coordinate, &market, &snapshot, &AlertDecider::new(&history), &renderer);

        assert!(messages.failures.is_empty());
        assert_eq!(
            messages.by_period["1h"],
            vec!["BTC/USDT RSI hot 75.12 [] Open: 1.00 Close: 2.50 0.25 USDT".to_owned()]
        );
    }

    #[test]
    fn neutral_entries_keep_the_period_but_emit_nothing() {
        let mut snapshot = AnalysisSnapshot::default();
        snapshot.insert(RuleKind::Indicator, "rsi", indicator(Status::Neutral, 50.0));
        let (coordinate, market) = btc();
        let history = AlertHistory::new();
        let renderer = MessageRenderer::new("{{ market }}").unwrap();
        let messages = pair_messages(&coordinate, &market, &snapshot, &AlertDecider::new(&history), &renderer);
        assert_eq!(messages.by_period["1h"], Vec::<String>::new());
    }

    #[test]
    fn broken_template_reports_each_failure() {
        let mut snapshot = AnalysisSnapshot::default();
        snapshot.insert(RuleKind::Indicator, "rsi", indicator(Status::Cold, 20.0));
        let (coordinate, market) = btc();
        let history = AlertHistory::new();
        let renderer = MessageRenderer::new("{{ values.macd }}").unwrap();
        let messages = pair_messages(&coordinate, &market, &snapshot, &AlertDecider::new(&history), &renderer);

        assert!(messages.by_period["1h"].is_empty());
        assert_eq!(messages.failures.len(), 1);
        assert_eq!(
            messages.failures[0].error,
            RenderError::MissingField("values.macd".to_owned())
        );
    }

    #[test]
    fn prices_use_exchange_precision() {
        let prices = vec![("open".to_owned(), 1.23456), ("high".to_owned(), 2.0)];
        assert_eq!(format_prices(&prices, 3), " Open: 1.235 High: 2.000");
        assert_eq!(format_prices(&[], 3), "");
    }
}
