pub mod alerts;
pub mod analysis;
pub mod candle_cache;
pub mod candles;
pub mod config;
pub mod console;
pub mod crossovers;
pub mod error;
pub mod evaluator;
pub mod indicators;
pub mod informants;
pub mod klines;
pub mod logger;
pub mod market_data;
pub mod messages;
pub mod pipeline;
pub mod rules;
pub mod storage_utils;
pub mod template;

pub use alerts::{AlertDecider, AlertHistory};
pub use analysis::{AnalysisRunner, AnalysisSnapshot, SnapshotEntry};
pub use candle_cache::CandleCache;
pub use candles::{Candle, CandleSeries, FibonacciBook, MarketCoordinate, MarketInfo, Markets};
pub use config::{AppConfig, SessionOverlay};
pub use evaluator::RuleEvaluator;
pub use market_data::MarketData;
pub use messages::MessageRenderer;
pub use pipeline::{CycleReport, PipelineOrchestrator};
pub use rules::{RuleKind, RuleResult, Status};
