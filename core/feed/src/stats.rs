//! Running counters for the feed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::event::EventKind;

#[derive(Debug, Clone)]
pub struct Stats {
    total_events: u64,
    total_tool_calls: u64,
    risk_alerts: u64,
    events_by_kind: BTreeMap<EventKind, u64>,
    started_at: DateTime<Utc>,
}

/// Point-in-time view of the counters plus derived fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_events: u64,
    pub total_tool_calls: u64,
    pub risk_alerts: u64,
    pub events_by_kind: BTreeMap<EventKind, u64>,
    pub started_at: DateTime<Utc>,
    pub uptime_ms: u64,
    pub active_runs: usize,
    pub completed_runs: usize,
}

impl Stats {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            total_events: 0,
            total_tool_calls: 0,
            risk_alerts: 0,
            events_by_kind: BTreeMap::new(),
            started_at,
        }
    }

    pub fn record_event(&mut self, kind: EventKind) {
        self.total_events = self.total_events.saturating_add(1);
        let count = self.events_by_kind.entry(kind).or_insert(0);
        *count = count.saturating_add(1);
    }

    pub fn record_tool_call(&mut self) {
        self.total_tool_calls = self.total_tool_calls.saturating_add(1);
    }

    pub fn record_risk_alert(&mut self) {
        self.risk_alerts = self.risk_alerts.saturating_add(1);
    }

    pub fn total_events(&self) -> u64 {
        self.total_events
    }

    pub fn total_tool_calls(&self) -> u64 {
        self.total_tool_calls
    }

    pub fn risk_alerts(&self) -> u64 {
        self.risk_alerts
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Uptime is clamped at zero if `now` precedes the start time.
    pub fn snapshot(
        &self,
        now: DateTime<Utc>,
        active_runs: usize,
        completed_runs: usize,
    ) -> StatsSnapshot {
        let uptime_ms = now
            .signed_duration_since(self.started_at)
            .num_milliseconds()
            .max(0) as u64;

        StatsSnapshot {
            total_events: self.total_events,
            total_tool_calls: self.total_tool_calls,
            risk_alerts: self.risk_alerts,
            events_by_kind: self.events_by_kind.clone(),
            started_at: self.started_at,
            uptime_ms,
            active_runs,
            completed_runs,
        }
    }
}
