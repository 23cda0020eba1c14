//! Rule outputs: result tables, hot/cold classification and status.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use crate::error::RuleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    #[serde(alias = "indicators")]
    Indicator,
    #[serde(alias = "informants")]
    Informant,
    #[serde(alias = "crossovers")]
    Crossover,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RuleKind::Indicator => "indicator",
            RuleKind::Informant => "informant",
            RuleKind::Crossover => "crossover",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Hot,
    Cold,
    Neutral,
}

impl Status {
    /// Hot wins over cold when a row carries both flags.
    pub fn from_flags(is_hot: bool, is_cold: bool) -> Self {
        if is_hot {
            Status::Hot
        } else if is_cold {
            Status::Cold
        } else {
            Status::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Hot => "hot",
            Status::Cold => "cold",
            Status::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timestamped row of a rule's output table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub timestamp: i64,
    pub values: BTreeMap<String, f64>,
    pub is_hot: bool,
    pub is_cold: bool,
}

impl ResultRow {
    pub fn new(timestamp: i64) -> Self {
        ResultRow {
            timestamp,
            values: BTreeMap::new(),
            is_hot: false,
            is_cold: false,
        }
    }

    pub fn with(mut self, column: &str, value: f64) -> Self {
        self.values.insert(column.to_owned(), value);
        self
    }

    pub fn get(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleResult {
    rows: Vec<ResultRow>,
}

impl RuleResult {
    pub fn empty() -> Self {
        RuleResult::default()
    }

    pub fn from_rows(rows: Vec<ResultRow>) -> Self {
        RuleResult { rows }
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn latest(&self) -> Option<&ResultRow> {
        self.rows.last()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Status of the latest row, `None` for an empty result.
    pub fn status(&self) -> Option<Status> {
        self.latest()
            .map(|row| Status::from_flags(row.is_hot, row.is_cold))
    }
}

/// Hot/cold thresholds of an indicator.
///
/// `hot > cold` reads "high values are hot", `hot < cold` reads "low values are hot".
/// Equal thresholds split the range with strict comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub hot: f64,
    pub cold: f64,
}

impl Thresholds {
    pub fn new(hot: f64, cold: f64) -> Self {
        Thresholds { hot, cold }
    }

    /// Returns `(is_hot, is_cold)` for a value.
    pub fn classify(&self, value: f64) -> (bool, bool) {
        if value.is_nan() {
            return (false, false);
        }
        if self.hot > self.cold {
            (value >= self.hot, value <= self.cold)
        } else if self.hot < self.cold {
            (value <= self.hot, value >= self.cold)
        } else {
            (value > self.hot, value < self.cold)
        }
    }
}

/// Flags every row by comparing `column` against the thresholds.
pub fn classify(
    name: &str,
    mut rows: Vec<ResultRow>,
    column: &str,
    thresholds: Thresholds,
) -> Result<RuleResult, RuleError> {
    for row in rows.iter_mut() {
        let value = row
            .get(column)
            .ok_or_else(|| RuleError::invalid(name, format!("no signal named {column}")))?;
        let (is_hot, is_cold) = thresholds.classify(value);
        row.is_hot = is_hot;
        row.is_cold = is_cold;
    }
    Ok(RuleResult::from_rows(rows))
}
