use std::collections::BTreeMap;

use crate::evaluator::CrossoverArgs;
use crate::rules::{ResultRow, RuleError, RuleResult};

/// Name of a crossover column for a source signal, e.g. `close_0`.
pub fn column_name(signal: &str, index: usize) -> String {
    format!("{signal}_{index}")
}

/// Joins the two sources on timestamp. Hot while the key signal is above the crossed
/// signal, cold while it is below.
pub fn std_crossover(args: &CrossoverArgs<'_>) -> Result<RuleResult, RuleError> {
    if args.key.is_empty() || args.crossed.is_empty() {
        return Err(RuleError::invalid(args.name, "a source result is empty"));
    }

    let crossed: BTreeMap<i64, f64> = args
        .crossed
        .rows()
        .iter()
        .filter_map(|row| Some((row.timestamp, row.get(args.crossed_signal)?)))
        .collect();
    if crossed.is_empty() {
        return Err(RuleError::invalid(
            args.name,
            format!("crossed source has no signal {}", args.crossed_signal),
        ));
    }

    let key_column = column_name(args.key_signal, args.key_index);
    let crossed_column = column_name(args.crossed_signal, args.crossed_index);

    let rows: Vec<ResultRow> = args
        .key
        .rows()
        .iter()
        .filter_map(|row| {
            let key_value = row.get(args.key_signal)?;
            let crossed_value = *crossed.get(&row.timestamp)?;
            let mut out = ResultRow::new(row.timestamp)
                .with(&key_column, key_value)
                .with(&crossed_column, crossed_value);
            out.is_hot = key_value > crossed_value;
            out.is_cold = key_value < crossed_value;
            Some(out)
        })
        .collect();

    if rows.is_empty() {
        return Err(RuleError::invalid(args.name, "sources share no rows"));
    }
    Ok(RuleResult::from_rows(rows))
}
