//! Alert deduplication against the statuses of the previous run.

use std::collections::BTreeMap;

use crate::analysis::{AnalysisSnapshot, SnapshotEntry};
use crate::candles::MarketCoordinate;
use crate::config::{AlertFrequency, AlertPolicy};
use crate::rules::{RuleKind, Status};

type EntryKey = (RuleKind, String, usize);

/// Last recorded status per (coordinate, kind, rule name, index), kept for the process lifetime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertHistory {
    statuses: BTreeMap<MarketCoordinate, BTreeMap<EntryKey, Status>>,
}

impl AlertHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &self,
        coordinate: &MarketCoordinate,
        kind: RuleKind,
        name: &str,
        index: usize,
    ) -> Option<Status> {
        self.statuses
            .get(coordinate)?
            .get(&(kind, name.to_owned(), index))
            .copied()
    }

    /// Overwrites the statuses of one coordinate with those of a fresh snapshot.
    /// Entries missing from the snapshot keep their previous status.
    pub fn record(&mut self, coordinate: &MarketCoordinate, snapshot: &AnalysisSnapshot) {
        let mut statuses = snapshot
            .iter()
            .filter_map(|(kind, name, entry)| {
                Some(((kind, name.to_owned(), entry.index), entry.status?))
            })
            .peekable();
        if statuses.peek().is_none() {
            return;
        }
        self.statuses
            .entry(coordinate.clone())
            .or_default()
            .extend(statuses);
    }

    pub fn merge<'a, I>(&mut self, snapshots: I)
    where
        I: IntoIterator<Item = (&'a MarketCoordinate, &'a AnalysisSnapshot)>,
    {
        for (coordinate, snapshot) in snapshots {
            self.record(coordinate, snapshot);
        }
    }

    pub fn len(&self) -> usize {
        self.statuses.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Neutral never alerts, disabled alerts never fire, and `once` stays quiet
/// while the status matches the previous run.
pub fn should_alert(status: Status, previous: Option<Status>, policy: AlertPolicy) -> bool {
    if status == Status::Neutral || !policy.enabled {
        return false;
    }
    !(policy.frequency == AlertFrequency::Once && previous == Some(status))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub status: Status,
    pub previous: Option<Status>,
}

pub struct AlertDecider<'a> {
    history: &'a AlertHistory,
}

impl<'a> AlertDecider<'a> {
    pub fn new(history: &'a AlertHistory) -> Self {
        AlertDecider { history }
    }

    /// `Some` when the entry should produce an alert this run.
    pub fn decide(
        &self,
        coordinate: &MarketCoordinate,
        kind: RuleKind,
        name: &str,
        entry: &SnapshotEntry,
    ) -> Option<Decision> {
        let status = entry.status?;
        let policy = entry.config.alert_policy()?;
        let previous = self.history.get(coordinate, kind, name, entry.index);
        should_alert(status, previous, policy).then_some(Decision { status, previous })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndicatorConfig, RuleConfig};
    use crate::rules::RuleResult;

    const ONCE: AlertPolicy = AlertPolicy {
        frequency: AlertFrequency::Once,
        enabled: true,
    };
    const ALWAYS: AlertPolicy = AlertPolicy {
        frequency: AlertFrequency::Always,
        enabled: true,
    };

    fn entry(index: usize, status: Option<Status>) -> SnapshotEntry {
        SnapshotEntry {
            index,
            result: RuleResult::empty(),
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
            status,
        }
    }

    fn snapshot(entries: Vec<SnapshotEntry>) -> AnalysisSnapshot {
        let mut snapshot = AnalysisSnapshot::default();
        for entry in entries {
            snapshot.insert(RuleKind::Indicator, "rsi", entry);
        }
        snapshot
    }

    #[test]
    fn neutral_never_alerts() {
        for policy in [ONCE, ALWAYS] {
            for previous in [None, Some(Status::Hot), Some(Status::Neutral)] {
                assert!(!should_alert(Status::Neutral, previous, policy));
            }
        }
    }

    #[test]
    fn once_suppresses_repeats_always_does_not() {
        assert!(should_alert(Status::Hot, None, ONCE));
        assert!(!should_alert(Status::Hot, Some(Status::Hot), ONCE));
        assert!(should_alert(Status::Hot, Some(Status::Neutral), ONCE));
        assert!(should_alert(Status::Cold, Some(Status::Hot), ONCE));
        assert!(should_alert(Status::Cold, Some(Status::Cold), ALWAYS));

        let disabled = AlertPolicy {
            enabled: false,
            ..ALWAYS
        };
        assert!(!should_alert(Status::Hot, None, disabled));
    }

    #[test]
    fn record_keeps_entries_missing_from_new_run() {
        let coordinate = MarketCoordinate::new("binance", "BTC/USDT");
        let mut history = AlertHistory::new();
        history.record(
            &coordinate,
            &snapshot(vec![entry(0, Some(Status::Hot)), entry(1, Some(Status::Cold))]),
        );
        history.record(
            &coordinate,
            &snapshot(vec![entry(0, Some(Status::Neutral)), entry(1, None)]),
        );

        assert_eq!(
            history.get(&coordinate, RuleKind::Indicator, "rsi", 0),
            Some(Status::Neutral)
        );
        assert_eq!(
            history.get(&coordinate, RuleKind::Indicator, "rsi", 1),
            Some(Status::Cold)
        );
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn merge_order_does_not_matter() {
        let btc = MarketCoordinate::new("binance", "BTC/USDT");
        let eth = MarketCoordinate::new("kraken", "ETH/USDT");
        let hot = snapshot(vec![entry(0, Some(Status::Hot))]);
        let cold = snapshot(vec![entry(0, Some(Status::Cold))]);

        let mut forward = AlertHistory::new();
        forward.merge([(&btc, &hot), (&eth, &cold)]);
        let mut backward = AlertHistory::new();
        backward.merge([(&eth, &cold), (&btc, &hot)]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn decider_uses_history() {
        let coordinate = MarketCoordinate::new("binance", "BTC/USDT");
        let mut history = AlertHistory::new();
        let hot = entry(0, Some(Status::Hot));

        let decision = AlertDecider::new(&history).decide(&coordinate, RuleKind::Indicator, "rsi", &hot);
        assert_eq!(
            decision,
            Some(Decision {
                status: Status::Hot,
                previous: None
            })
        );

        history.record(&coordinate, &snapshot(vec![hot.clone()]));
        let decider = AlertDecider::new(&history);
        assert_eq!(decider.decide(&coordinate, RuleKind::Indicator, "rsi", &hot), None);
        assert_eq!(decider.decide(&coordinate, RuleKind::Indicator, "rsi", &entry(0, None)), None);
    }
}
