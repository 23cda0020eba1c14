//! One analysis cycle across every configured exchange.

use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::alerts::{AlertDecider, AlertHistory};
use crate::analysis::{AnalysisRunner, AnalysisSnapshot};
use crate::candle_cache::CandleCache;
use crate::candles::{CandleSeries, FibonacciBook, FibonacciLevels, MarketCoordinate, MarketInfo, Markets};
use crate::config::{AppConfig, SessionOverlay};
use crate::console;
use crate::error::PipelineError;
use crate::evaluator::RuleEvaluator;
use crate::market_data::MarketData;
use crate::messages::{MessageRenderer, RenderFailure, pair_messages};

/// pair -> candle period -> messages
pub type ExchangeMessages = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// A (pair, period) with at least one alert, handed to the charting side.
#[derive(Debug, Clone)]
pub struct ChartRequest {
    pub coordinate: MarketCoordinate,
    pub period: String,
    pub series: Option<Arc<CandleSeries>>,
    pub fibonacci: Option<FibonacciLevels>,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    /// exchange -> pair -> period -> messages
    pub messages: BTreeMap<String, ExchangeMessages>,
    pub charts: Vec<ChartRequest>,
    /// Exchanges that could not be analysed this cycle.
    pub failures: Vec<PipelineError>,
    pub render_failures: Vec<RenderFailure>,
}

impl CycleReport {
    pub fn messages_for(&self, exchange: &str, pair: &str, period: &str) -> &[String] {
        self.messages
            .get(exchange)
            .and_then(|pairs| pairs.get(pair))
            .and_then(|periods| periods.get(period))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every message in (exchange, pair, period) order.
    pub fn all_messages(&self) -> impl Iterator<Item = &str> {
        self.messages
            .values()
            .flat_map(|pairs| pairs.values())
            .flat_map(|periods| periods.values())
            .flat_map(|messages| messages.iter().map(String::as_str))
    }

    pub fn message_count(&self) -> usize {
        self.all_messages().count()
    }
}

struct ExchangeOutcome {
    exchange: String,
    messages: ExchangeMessages,
    charts: Vec<ChartRequest>,
    render_failures: Vec<RenderFailure>,
    snapshots: Vec<(MarketCoordinate, AnalysisSnapshot)>,
}

/// Owned inputs of one exchange's task.
struct ExchangeJob {
    exchange: String,
    pairs: Vec<(String, MarketInfo)>,
    fibonacci: FibonacciBook,
    config: Arc<AppConfig>,
    overlay: Arc<SessionOverlay>,
    source: Arc<dyn MarketData>,
    evaluator: Arc<RuleEvaluator>,
    renderer: Arc<MessageRenderer>,
    history: Arc<AlertHistory>,
}

impl ExchangeJob {
    async fn run(self) -> ExchangeOutcome {
        let runner = AnalysisRunner::new(&self.evaluator, &self.config, &self.overlay);
        let periods = runner.required_periods();
        info!(
            exchange = %self.exchange,
            pairs = self.pairs.len(),
            periods = periods.len(),
            "analysing exchange"
        );

        let coordinates: Vec<(MarketCoordinate, &MarketInfo)> = self
            .pairs
            .iter()
            .map(|(pair, market)| (MarketCoordinate::new(&self.exchange, pair), market))
            .collect();

        let mut cache = CandleCache::new();
        let requests: Vec<(MarketCoordinate, String)> = coordinates
            .iter()
            .flat_map(|(coordinate, _)| periods.iter().map(move |period| (coordinate.clone(), period.clone())))
            .collect();
        cache.prefetch(self.source.as_ref(), requests).await;
        debug!(exchange = %self.exchange, fetches = cache.fetch_count(), "candles fetched");

        let decider = AlertDecider::new(&self.history);
        let mut outcome = ExchangeOutcome {
            exchange: self.exchange.clone(),
            messages: BTreeMap::new(),
            charts: Vec::new(),
            render_failures: Vec::new(),
            snapshots: Vec::with_capacity(coordinates.len()),
        };

        for (coordinate, market) in coordinates {
            let snapshot = runner.run(&coordinate, &cache);
            console::mirror(self.config.settings.output_mode, &coordinate, &snapshot);

            let rendered = pair_messages(&coordinate, market, &snapshot, &decider, &self.renderer);
            for (period, messages) in &rendered.by_period {
                if messages.is_empty() {
                    continue;
                }
                outcome.charts.push(ChartRequest {
                    coordinate: coordinate.clone(),
                    period: period.clone(),
                    series: cache.series(&coordinate, period),
                    fibonacci: self.fibonacci.get(&coordinate).cloned(),
                });
            }
            outcome.render_failures.extend(rendered.failures);
            outcome
                .messages
                .insert(coordinate.pair.clone(), rendered.by_period);
            outcome.snapshots.push((coordinate, snapshot));
        }
        outcome
    }
}

pub struct PipelineOrchestrator {
    config: Arc<AppConfig>,
    source: Arc<dyn MarketData>,
    evaluator: Arc<RuleEvaluator>,
    renderer: Arc<MessageRenderer>,
    history: Arc<AlertHistory>,
    concurrency: usize,
}

impl PipelineOrchestrator {
    /// Fails with [`PipelineError::Render`] when the configured alert template does not parse.
    pub fn new(config: Arc<AppConfig>, source: Arc<dyn MarketData>) -> Result<Self, PipelineError> {
        let renderer = MessageRenderer::new(&config.notifiers.template)?;
        let concurrency = config.settings.exchange_concurrency.max(1);
        Ok(PipelineOrchestrator {
            config,
            source,
            evaluator: Arc::new(RuleEvaluator::standard()),
            renderer: Arc::new(renderer),
            history: Arc::new(AlertHistory::new()),
            concurrency,
        })
    }

    pub fn with_evaluator(mut self, evaluator: RuleEvaluator) -> Self {
        self.evaluator = Arc::new(evaluator);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn history(&self) -> &AlertHistory {
        &self.history
    }

    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    fn jobs(
        &self,
        markets: &Markets,
        overlay: &Arc<SessionOverlay>,
        fibonacci: &FibonacciBook,
        failures: &mut Vec<PipelineError>,
    ) -> Vec<ExchangeJob> {
        let wanted = overlay.market_pairs(&self.config);
        let mut jobs = Vec::new();

        for (exchange, settings) in &self.config.exchanges {
            if !settings.enabled {
                debug!(%exchange, "exchange disabled, skipping");
                continue;
            }
            let Some(listed) = markets.get(exchange) else {
                error!(%exchange, "exchange has no resolved markets");
                failures.push(PipelineError::UnknownExchange(exchange.clone()));
                continue;
            };

            let pairs: Vec<(String, MarketInfo)> = if wanted.is_empty() {
                listed.iter().map(|(pair, market)| (pair.clone(), market.clone())).collect()
            } else {
                wanted
                    .iter()
                    .map(|pair| pair.trim().to_uppercase())
                    .filter_map(|pair| match listed.get(&pair) {
                        Some(market) => Some((pair, market.clone())),
                        None => {
                            warn!(%exchange, %pair, "pair not listed on exchange, skipping");
                            None
                        }
                    })
                    .collect()
            };

            jobs.push(ExchangeJob {
                exchange: exchange.clone(),
                pairs,
                fibonacci: fibonacci
                    .iter()
                    .filter(|(coordinate, _)| &coordinate.exchange == exchange)
                    .map(|(coordinate, levels)| (coordinate.clone(), levels.clone()))
                    .collect(),
                config: Arc::clone(&self.config),
                overlay: Arc::clone(overlay),
                source: Arc::clone(&self.source),
                evaluator: Arc::clone(&self.evaluator),
                renderer: Arc::clone(&self.renderer),
                history: Arc::clone(&self.history),
            });
        }
        jobs
    }

    /// Runs every enabled exchange with bounded parallelism. A panicking
    /// exchange task is reported in [`CycleReport::failures`] and the others
    /// still complete. Alert history is merged once, after every task is done.
    pub async fn run_cycle(
        &mut self,
        markets: &Markets,
        overlay: &SessionOverlay,
        fibonacci: &FibonacciBook,
    ) -> CycleReport {
        let mut report = CycleReport::default();
        let overlay = Arc::new(overlay.clone());
        let jobs = self.jobs(markets, &overlay, fibonacci, &mut report.failures);

        let results: Vec<_> = stream::iter(jobs)
            .map(|job| {
                let exchange = job.exchange.clone();
                let handle = tokio::spawn(job.run());
                async move { (exchange, handle.await) }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut snapshots = Vec::new();
        for (exchange, result) in results {
            match result {
                Ok(outcome) => {
                    report.messages.insert(outcome.exchange, outcome.messages);
                    report.charts.extend(outcome.charts);
                    report.render_failures.extend(outcome.render_failures);
                    snapshots.extend(outcome.snapshots);
                }
                Err(err) => {
                    error!(%exchange, error = %err, "exchange task aborted");
                    report.failures.push(PipelineError::ExchangeTask {
                        exchange,
                        reason: err.to_string(),
                    });
                }
            }
        }

        Arc::make_mut(&mut self.history).merge(snapshots.iter().map(|(coordinate, snapshot)| (coordinate, snapshot)));
        info!(
            exchanges = report.messages.len(),
            messages = report.message_count(),
            failures = report.failures.len(),
            "cycle complete"
        );
        report
    }
}
