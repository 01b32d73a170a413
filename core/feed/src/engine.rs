//! The live feed: single entry point tying the pieces together.
//!
//! Each `process_event` call runs to completion before returning:
//! normalize, buffer, count, fold into run state, then notify. There is no
//! background work and no ambient state; whoever hosts the feed owns it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

use crate::buffer::EventBuffer;
use crate::config::FeedConfig;
use crate::error::{HandlerError, Result};
use crate::event::{Event, Normalizer};
use crate::notify::{Channel, Notification, Notifier, SubscriptionId};
use crate::risk::RiskDetector;
use crate::run::{Run, RunTracker, RunUpdate};
use crate::stats::{Stats, StatsSnapshot};

/// Everything a dashboard poll needs, in one read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub recent_events: Vec<Event>,
    pub active_runs: Vec<Run>,
    pub completed_runs: Vec<Run>,
    pub stats: StatsSnapshot,
}

#[derive(Debug)]
pub struct LiveFeed {
    normalizer: Normalizer,
    buffer: EventBuffer,
    tracker: RunTracker,
    detector: RiskDetector,
    stats: Stats,
    notifier: Notifier,
    default_recent_limit: usize,
}

impl Default for LiveFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveFeed {
    /// A feed with default capacities and the built-in risk table.
    pub fn new() -> Self {
        let config = FeedConfig::default();
        Self::from_parts(&config, RiskDetector::new(), Utc::now())
    }

    /// Fails only if a configured risk rule does not compile.
    pub fn with_config(config: &FeedConfig) -> Result<Self> {
        let detector = RiskDetector::with_rules(&config.risk_rules)?;
        Ok(Self::from_parts(config, detector, Utc::now()))
    }

    fn from_parts(config: &FeedConfig, detector: RiskDetector, started_at: DateTime<Utc>) -> Self {
        Self {
            normalizer: Normalizer::new(),
            buffer: EventBuffer::with_capacity(config.buffer_capacity),
            tracker: RunTracker::new(config.completed_run_retention, config.retired_run_ids)
                .with_stale_after_secs(config.stale_run_secs),
            detector,
            stats: Stats::new(started_at),
            notifier: Notifier::new(),
            default_recent_limit: config.default_recent_limit.max(1),
        }
    }

    /// Ingests one raw envelope. Never fails; returns the assigned sequence.
    pub fn process_event(&mut self, raw: &Value) -> u64 {
        self.process_event_at(raw, Utc::now())
    }

    pub fn process_event_at(&mut self, raw: &Value, now: DateTime<Utc>) -> u64 {
        let event = self.normalizer.normalize_at(raw, now);
        let sequence = event.sequence;
        trace!(sequence, kind = event.kind().as_str(), "Event received");

        self.stats.record_event(event.kind());
        self.buffer.push(event.clone());
        let updates = self.tracker.apply(&event, &self.detector);

        self.notifier.emit(&Notification::Activity(event));
        for update in updates {
            self.dispatch(update);
        }

        sequence
    }

    fn dispatch(&mut self, update: RunUpdate) {
        match update {
            RunUpdate::Started(run) => {
                self.notifier.emit(&Notification::RunStart(run));
            }
            RunUpdate::ToolCall { .. } => {
                self.stats.record_tool_call();
            }
            RunUpdate::RiskFlagged(alert) => {
                self.stats.record_risk_alert();
                warn!(
                    run_id = %alert.run_id,
                    tool = %alert.tool_call.name,
                    severity = alert.risk.severity.as_str(),
                    reason = %alert.risk.reason,
                    "Risky tool call"
                );
                self.notifier.emit(&Notification::RiskAlert(alert));
            }
            RunUpdate::Completed(run) => {
                self.notifier.emit(&Notification::RunComplete(run));
            }
            RunUpdate::Expired(run) => {
                debug!(
                    run_id = %run.run_id,
                    event_count = run.event_count,
                    "Run went stale without completing"
                );
            }
        }
    }

    /// The last `limit` events (default when `None`), most recent last.
    pub fn recent_events(&self, limit: Option<usize>) -> Vec<Event> {
        self.buffer.recent(limit.unwrap_or(self.default_recent_limit))
    }

    pub fn all_events(&self) -> Vec<Event> {
        self.buffer.all()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn active_runs(&self) -> Vec<Run> {
        self.tracker.active_runs()
    }

    pub fn completed_runs(&self) -> Vec<Run> {
        self.tracker.completed_runs()
    }

    pub fn run(&self, run_id: &str) -> Option<Run> {
        self.tracker.run(run_id)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> StatsSnapshot {
        self.stats.snapshot(
            now,
            self.tracker.active_count(),
            self.tracker.completed_count(),
        )
    }

    pub fn snapshot(&self, limit: Option<usize>) -> FeedSnapshot {
        self.snapshot_at(limit, Utc::now())
    }

    pub fn snapshot_at(&self, limit: Option<usize>, now: DateTime<Utc>) -> FeedSnapshot {
        FeedSnapshot {
            recent_events: self.recent_events(limit),
            active_runs: self.active_runs(),
            completed_runs: self.completed_runs(),
            stats: self.stats_at(now),
        }
    }

    pub fn subscribe<F>(&mut self, channel: Channel, handler: F) -> SubscriptionId
    where
        F: FnMut(&Notification) -> std::result::Result<(), HandlerError> + Send + 'static,
    {
        self.notifier.subscribe(channel, handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }
}

/// A [`LiveFeed`] behind one mutex, for hosts that ingest and query from
/// several threads. A poisoned lock is recovered; feed state is never left
/// half-updated because handlers cannot unwind through `process_event`.
#[derive(Debug, Default)]
pub struct SharedFeed {
    inner: Mutex<LiveFeed>,
}

impl SharedFeed {
    pub fn new(feed: LiveFeed) -> Self {
        Self {
            inner: Mutex::new(feed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LiveFeed> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with exclusive access to the feed.
    pub fn with<R>(&self, f: impl FnOnce(&mut LiveFeed) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn process_event(&self, raw: &Value) -> u64 {
        self.lock().process_event(raw)
    }

    pub fn recent_events(&self, limit: Option<usize>) -> Vec<Event> {
        self.lock().recent_events(limit)
    }

    pub fn active_runs(&self) -> Vec<Run> {
        self.lock().active_runs()
    }

    pub fn completed_runs(&self) -> Vec<Run> {
        self.lock().completed_runs()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.lock().stats()
    }

    pub fn snapshot(&self, limit: Option<usize>) -> FeedSnapshot {
        self.lock().snapshot(limit)
    }

    pub fn subscribe<F>(&self, channel: Channel, handler: F) -> SubscriptionId
    where
        F: FnMut(&Notification) -> std::result::Result<(), HandlerError> + Send + 'static,
    {
        self.lock().subscribe(channel, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().unsubscribe(id)
    }
}
