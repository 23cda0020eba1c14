//! Console mirroring of analysis snapshots.

use chrono::DateTime;
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::analysis::{AnalysisSnapshot, SnapshotEntry};
use crate::candles::MarketCoordinate;
use crate::rules::{RuleKind, Status};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Cli,
    Table,
    Json,
    /// No console output, alerts only.
    Off,
}

fn format_timestamp(ts_ms: i64) -> String {
    match DateTime::from_timestamp_millis(ts_ms) {
        Some(dt) => dt.format("%d-%m-%Y %H:%M:%S").to_string(),
        None => "unknown time".to_owned(),
    }
}

/// `name=value` pairs of the latest row, in column order.
fn latest_values(entry: &SnapshotEntry) -> String {
    entry
        .result
        .latest()
        .map(|row| {
            row.values
                .iter()
                .map(|(name, value)| format!("{name}={value:.8}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

fn status_label(entry: &SnapshotEntry) -> &'static str {
    entry.status.map(|status| status.as_str()).unwrap_or("-")
}

fn period_label<'a>(entry: &'a SnapshotEntry, snapshot: &'a AnalysisSnapshot) -> &'a str {
    entry.candle_period(snapshot).unwrap_or("-")
}

fn render_cli(coordinate: &MarketCoordinate, snapshot: &AnalysisSnapshot) -> String {
    let mut out = format!("{}:", coordinate);
    for (kind, name, entry) in snapshot.iter() {
        out.push_str(&format!(
            "\n  {kind} {name} #{} [{}] {} {}",
            entry.index,
            period_label(entry, snapshot),
            latest_values(entry),
            status_label(entry),
        ));
    }
    out
}

fn status_color(status: Option<Status>) -> Color {
    match status {
        Some(Status::Hot) => Color::Red,
        Some(Status::Cold) => Color::Cyan,
        Some(Status::Neutral) => Color::Grey,
        None => Color::DarkGrey,
    }
}

fn render_table(coordinate: &MarketCoordinate, snapshot: &AnalysisSnapshot) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Kind").add_attribute(Attribute::Bold),
            Cell::new("Rule").add_attribute(Attribute::Bold),
            Cell::new("#").add_attribute(Attribute::Bold),
            Cell::new("Period").add_attribute(Attribute::Bold),
            Cell::new("Candle").add_attribute(Attribute::Bold),
            Cell::new("Values").add_attribute(Attribute::Bold),
            Cell::new("Status")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
        ]);

    for (kind, name, entry) in snapshot.iter() {
        let kind_color = match kind {
            RuleKind::Informant => Color::DarkGrey,
            _ => Color::White,
        };
        let candle = entry
            .result
            .latest()
            .map(|row| format_timestamp(row.timestamp))
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(kind).fg(kind_color),
            Cell::new(name),
            Cell::new(entry.index).fg(Color::DarkGrey),
            Cell::new(period_label(entry, snapshot)),
            Cell::new(candle).fg(Color::DarkGrey),
            Cell::new(latest_values(entry)),
            Cell::new(status_label(entry))
                .fg(status_color(entry.status))
                .set_alignment(CellAlignment::Right),
        ]);
    }
    format!("\n{}\n{}", coordinate, table)
}

fn render_json(coordinate: &MarketCoordinate, snapshot: &AnalysisSnapshot) -> Option<String> {
    match serde_json::to_string(&json!({ "coordinate": coordinate, "analysis": snapshot })) {
        Ok(text) => Some(text),
        Err(err) => {
            error!(%coordinate, error = %err, "failed to serialise snapshot");
            None
        }
    }
}

/// The console text for one analysed pair, `None` when `mode` is `off`.
pub fn render(mode: OutputMode, coordinate: &MarketCoordinate, snapshot: &AnalysisSnapshot) -> Option<String> {
    match mode {
        OutputMode::Cli => Some(render_cli(coordinate, snapshot)),
        OutputMode::Table => Some(render_table(coordinate, snapshot)),
        OutputMode::Json => render_json(coordinate, snapshot),
        OutputMode::Off => None,
    }
}

pub fn mirror(mode: OutputMode, coordinate: &MarketCoordinate, snapshot: &AnalysisSnapshot) {
    if let Some(text) = render(mode, coordinate, snapshot) {
        println!("{text}");
    }
}
