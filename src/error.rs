use thiserror::Error;

use crate::rules::RuleKind;

/// Failures raised by a [`MarketData`](crate::market_data::MarketData) source.
/// The candle cache treats all of them as "no data for this period".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("too many retries ({attempts}) fetching candles")]
    RetryExhausted { attempts: u32 },
    #[error("exchange supplied bad data: {0}")]
    ExchangeData(String),
    #[error("transient fetch failure: {0}")]
    Transient(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("no such {kind} {name}")]
    UnknownRule { kind: RuleKind, name: String },
    #[error("invalid arguments for {name}: {reason}")]
    InvalidArguments { name: String, reason: String },
    #[error("unresolved reference to {kind} {name}[{index}]")]
    UnresolvedReference {
        kind: RuleKind,
        name: String,
        index: usize,
    },
}

impl RuleError {
    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        RuleError::InvalidArguments {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("template references missing field `{0}`")]
    MissingField(String),
    #[error("template uses unknown filter `{0}`")]
    UnknownFilter(String),
    #[error("malformed template: {0}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("exchange {0} is configured but has no resolved markets")]
    UnknownExchange(String),
    #[error("analysis of {exchange} aborted: {reason}")]
    ExchangeTask { exchange: String, reason: String },
    #[error(transparent)]
    Render(#[from] RenderError),
}
