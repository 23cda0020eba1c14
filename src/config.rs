//! Application configuration, loaded from `storage/config.json`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::console::OutputMode;
use crate::logger::LogMode;
use crate::rules::{RuleKind, Thresholds};

pub const DEFAULT_TEMPLATE: &str =
    "{{ exchange }}-{{ market }}-{{ indicator }}-{{ indicator_number }} is {{ status }}!{{ prices }}";

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub exchanges: BTreeMap<String, ExchangeConfig>,
    #[serde(default)]
    pub indicators: BTreeMap<String, Vec<IndicatorConfig>>,
    #[serde(default)]
    pub informants: BTreeMap<String, Vec<InformantConfig>>,
    #[serde(default)]
    pub crossovers: BTreeMap<String, Vec<CrossoverConfig>>,
    #[serde(default)]
    pub notifiers: NotifierConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Settings {
    pub log_level: String,
    pub log_mode: LogMode,
    pub output_mode: OutputMode,
    /// Seconds between two analysis cycles.
    pub update_interval: u64,
    /// Pairs to analyse. Empty means every market quoted in `quote_asset`.
    pub market_pairs: Vec<String>,
    pub quote_asset: String,
    pub exchange_concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            log_level: "INFO".to_owned(),
            log_mode: LogMode::Text,
            output_mode: OutputMode::Cli,
            update_interval: 300,
            market_pairs: Vec::new(),
            quote_asset: "USDT".to_owned(),
            exchange_concurrency: 5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ExchangeConfig {
    pub enabled: bool,
    pub candle_limit: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            enabled: true,
            candle_limit: 500,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NotifierConfig {
    #[serde(default = "default_template")]
    pub template: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        NotifierConfig {
            template: default_template(),
        }
    }
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_owned()
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertFrequency {
    Always,
    #[default]
    Once,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    pub frequency: AlertFrequency,
    pub enabled: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IndicatorConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub candle_period: String,
    pub signal: Vec<String>,
    pub hot: f64,
    pub cold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_count: Option<usize>,
    #[serde(default = "enabled_by_default")]
    pub alert_enabled: bool,
    #[serde(default)]
    pub alert_frequency: AlertFrequency,
    /// rsi only: gamma in `[0, 1)` of an extra `lrsi` column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lrsi_filter: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InformantConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub candle_period: String,
    #[serde(default)]
    pub signal: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
}

/// A reference to an entry computed earlier in the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRef<'a> {
    pub kind: RuleKind,
    pub name: &'a str,
    pub index: usize,
    pub signal: &'a str,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CrossoverConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default = "enabled_by_default")]
    pub alert_enabled: bool,
    #[serde(default)]
    pub alert_frequency: AlertFrequency,
    pub key_indicator: String,
    pub key_indicator_index: usize,
    pub key_indicator_type: RuleKind,
    pub key_signal: String,
    pub crossed_indicator: String,
    pub crossed_indicator_index: usize,
    pub crossed_indicator_type: RuleKind,
    pub crossed_signal: String,
}

impl CrossoverConfig {
    pub fn key(&self) -> SourceRef<'_> {
        SourceRef {
            kind: self.key_indicator_type,
            name: &self.key_indicator,
            index: self.key_indicator_index,
            signal: &self.key_signal,
        }
    }

    pub fn crossed(&self) -> SourceRef<'_> {
        SourceRef {
            kind: self.crossed_indicator_type,
            name: &self.crossed_indicator,
            index: self.crossed_indicator_index,
            signal: &self.crossed_signal,
        }
    }
}

/// Fields the analysis runner needs from an indicator or informant entry.
pub trait CandleRuleConfig {
    const KIND: RuleKind;

    fn enabled(&self) -> bool;
    fn candle_period(&self) -> &str;
    fn signal(&self) -> &[String];
    fn period_count(&self) -> Option<usize>;
    fn thresholds(&self) -> Option<Thresholds>;
    fn extras(&self) -> BTreeMap<String, f64>;
    fn to_rule_config(&self) -> RuleConfig;
}

impl CandleRuleConfig for IndicatorConfig {
    const KIND: RuleKind = RuleKind::Indicator;

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn candle_period(&self) -> &str {
        &self.candle_period
    }

    fn signal(&self) -> &[String] {
        &self.signal
    }

    fn period_count(&self) -> Option<usize> {
        self.period_count
    }

    fn thresholds(&self) -> Option<Thresholds> {
        Some(Thresholds::new(self.hot, self.cold))
    }

    fn extras(&self) -> BTreeMap<String, f64> {
        self.lrsi_filter
            .map(|filter| ("lrsi_filter".to_owned(), filter))
            .into_iter()
            .collect()
    }

    fn to_rule_config(&self) -> RuleConfig {
        RuleConfig::Indicator(self.clone())
    }
}

impl CandleRuleConfig for InformantConfig {
    const KIND: RuleKind = RuleKind::Informant;

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn candle_period(&self) -> &str {
        &self.candle_period
    }

    fn signal(&self) -> &[String] {
        &self.signal
    }

    fn period_count(&self) -> Option<usize> {
        self.period_count
    }

    fn thresholds(&self) -> Option<Thresholds> {
        None
    }

    fn extras(&self) -> BTreeMap<String, f64> {
        self.gamma
            .map(|gamma| ("gamma".to_owned(), gamma))
            .into_iter()
            .collect()
    }

    fn to_rule_config(&self) -> RuleConfig {
        RuleConfig::Informant(self.clone())
    }
}

/// The configuration an entry in a snapshot was evaluated with.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum RuleConfig {
    Indicator(IndicatorConfig),
    Informant(InformantConfig),
    Crossover(CrossoverConfig),
}

impl RuleConfig {
    pub fn kind(&self) -> RuleKind {
        match self {
            RuleConfig::Indicator(_) => RuleKind::Indicator,
            RuleConfig::Informant(_) => RuleKind::Informant,
            RuleConfig::Crossover(_) => RuleKind::Crossover,
        }
    }

    /// Crossovers carry no period of their own.
    pub fn candle_period(&self) -> Option<&str> {
        match self {
            RuleConfig::Indicator(config) => Some(&config.candle_period),
            RuleConfig::Informant(config) => Some(&config.candle_period),
            RuleConfig::Crossover(_) => None,
        }
    }

    pub fn signal(&self) -> &[String] {
        match self {
            RuleConfig::Indicator(config) => &config.signal,
            RuleConfig::Informant(config) => &config.signal,
            RuleConfig::Crossover(_) => &[],
        }
    }

    /// `None` for informants, which never alert.
    pub fn alert_policy(&self) -> Option<AlertPolicy> {
        match self {
            RuleConfig::Indicator(config) => Some(AlertPolicy {
                frequency: config.alert_frequency,
                enabled: config.alert_enabled,
            }),
            RuleConfig::Crossover(config) => Some(AlertPolicy {
                frequency: config.alert_frequency,
                enabled: config.alert_enabled,
            }),
            RuleConfig::Informant(_) => None,
        }
    }
}

/// Per-session overrides on top of the shared [`AppConfig`].
///
/// Only the fields a session may change are stored; everything else is read from
/// the base configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionOverlay {
    update_interval: Option<u64>,
    market_pairs: Option<Vec<String>>,
    // (rule name, candle period) -> enabled
    toggles: HashMap<(String, String), bool>,
}

impl SessionOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_update_interval(&mut self, seconds: u64) {
        self.update_interval = Some(seconds);
    }

    pub fn set_market_pairs(&mut self, pairs: Vec<String>) {
        self.market_pairs = Some(pairs.iter().map(|pair| pair.trim().to_uppercase()).collect());
    }

    /// Enables or disables every entry of `rule` on `candle_period`.
    pub fn set_rule_enabled(&mut self, rule: &str, candle_period: &str, enabled: bool) {
        self.toggles
            .insert((rule.to_lowercase(), candle_period.to_owned()), enabled);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn update_interval(&self, base: &AppConfig) -> Duration {
        Duration::from_secs(
            self.update_interval
                .unwrap_or(base.settings.update_interval)
                .max(1),
        )
    }

    pub fn market_pairs<'a>(&'a self, base: &'a AppConfig) -> &'a [String] {
        self.market_pairs
            .as_deref()
            .unwrap_or(&base.settings.market_pairs)
    }

    pub fn is_enabled(&self, rule: &str, candle_period: Option<&str>, base_enabled: bool) -> bool {
        candle_period
            .and_then(|period| {
                self.toggles
                    .get(&(rule.to_lowercase(), period.to_owned()))
                    .copied()
            })
            .unwrap_or(base_enabled)
    }
}
