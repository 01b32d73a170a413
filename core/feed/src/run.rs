//! Run lifecycle tracking.
//!
//! A run starts on the first agent event carrying an unseen run id and
//! completes on a `final` chat event for that id. Completed ids are retired:
//! later events referencing them are accepted but never resurrect the run.
//! A running run with no activity for the stale window is dropped from the
//! active set; it is not completed, and a later event starts it afresh.
//!
//! ```text
//!   (none) ──agent──▶ running ──agent──▶ running ──chat:final──▶ complete
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

use crate::event::{AgentData, Event, EventBody, TOOL_STREAM};
use crate::risk::{RiskDetector, RiskInfo};

pub const DEFAULT_COMPLETED_RETENTION: usize = 100;
pub const DEFAULT_RETIRED_RUN_IDS: usize = 1000;
pub const DEFAULT_STALE_RUN_SECS: u64 = 6 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub name: String,
    pub input: Value,
    pub observed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub run_id: String,
    pub session_key: Option<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Sum of the lengths (in chars) of every delta folded into the run.
    pub text_length: u64,
    pub tool_calls: Vec<ToolCall>,
    pub last_activity_at: DateTime<Utc>,
    pub event_count: u64,
    /// Sequence of the event that started the run; orders the active set.
    pub start_sequence: u64,
}

impl Run {
    fn start(run_id: &str, event: &Event) -> Self {
        Self {
            run_id: run_id.to_string(),
            session_key: event.session_key.clone(),
            status: RunStatus::Running,
            started_at: event.received_at,
            completed_at: None,
            text_length: 0,
            tool_calls: Vec::new(),
            last_activity_at: event.received_at,
            event_count: 0,
            start_sequence: event.sequence,
        }
    }

    fn touch(&mut self, event: &Event) {
        self.event_count = self.event_count.saturating_add(1);
        self.last_activity_at = event.received_at;
        if self.session_key.is_none() {
            self.session_key = event.session_key.clone();
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }
}

/// Payload of a `risk:alert` notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAlert {
    pub run_id: String,
    pub tool_call: ToolCall,
    pub risk: RiskInfo,
}

/// A change produced by folding one event into the tracker.
#[derive(Debug, Clone, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum RunUpdate {
    Started(Run),
    ToolCall { run_id: String, tool_call: ToolCall },
    RiskFlagged(RiskAlert),
    Completed(Run),
    /// Dropped from the active set after going quiet.
    Expired(Run),
}

/// Bounded memory of run ids that have completed.
#[derive(Debug, Clone)]
struct RetiredRuns {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl RetiredRuns {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity,
        }
    }

    fn contains(&self, run_id: &str) -> bool {
        self.ids.contains(run_id)
    }

    fn insert(&mut self, run_id: &str) {
        if !self.ids.insert(run_id.to_string()) {
            return;
        }
        self.order.push_back(run_id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunTracker {
    active: HashMap<String, Run>,
    completed: VecDeque<Run>,
    retired: RetiredRuns,
    completed_retention: usize,
    stale_after_ms: Option<i64>,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLETED_RETENTION, DEFAULT_RETIRED_RUN_IDS)
    }
}

impl RunTracker {
    /// `completed_retention` is clamped to at least 1, and the retired-id
    /// memory is never smaller than the completed set.
    pub fn new(completed_retention: usize, retired_run_ids: usize) -> Self {
        let completed_retention = completed_retention.max(1);
        Self {
            active: HashMap::new(),
            completed: VecDeque::new(),
            retired: RetiredRuns::new(retired_run_ids.max(completed_retention)),
            completed_retention,
            stale_after_ms: stale_window_ms(DEFAULT_STALE_RUN_SECS),
        }
    }

    /// Active runs idle for `secs` are expired. `0` keeps them forever.
    pub fn with_stale_after_secs(mut self, secs: u64) -> Self {
        self.stale_after_ms = stale_window_ms(secs);
        self
    }

    /// Folds `event` into run state, first expiring runs that have been idle
    /// past the stale window as of the event's receive time. Health, tick and
    /// unknown events change nothing else.
    pub fn apply(&mut self, event: &Event, detector: &RiskDetector) -> Vec<RunUpdate> {
        let mut updates = self.expire_stale(event.received_at);
        let changes = match &event.body {
            EventBody::Agent { stream, data } => {
                self.apply_agent(event, stream.as_deref(), data, detector)
            }
            EventBody::Chat { .. } if event.is_final_chat() => self.apply_final(event),
            _ => Vec::new(),
        };
        updates.extend(changes);
        updates
    }

    fn expire_stale(&mut self, now: DateTime<Utc>) -> Vec<RunUpdate> {
        let Some(window_ms) = self.stale_after_ms else {
            return Vec::new();
        };

        let mut stale: Vec<String> = self
            .active
            .values()
            .filter(|run| (now - run.last_activity_at).num_milliseconds() >= window_ms)
            .map(|run| run.run_id.clone())
            .collect();
        stale.sort_by_key(|run_id| self.active.get(run_id).map(|run| run.start_sequence));

        stale
            .into_iter()
            .filter_map(|run_id| self.active.remove(&run_id))
            .map(|run| {
                debug!(
                    run_id = %run.run_id,
                    last_activity_at = %run.last_activity_at,
                    "Expiring idle run"
                );
                RunUpdate::Expired(run)
            })
            .collect()
    }

    fn apply_agent(
        &mut self,
        event: &Event,
        stream: Option<&str>,
        data: &AgentData,
        detector: &RiskDetector,
    ) -> Vec<RunUpdate> {
        let Some(run_id) = event.run_id.as_deref() else {
            debug!(sequence = event.sequence, "Agent event without run id");
            return Vec::new();
        };

        if self.retired.contains(run_id) {
            debug!(
                run_id = %run_id,
                sequence = event.sequence,
                "Ignoring agent event for completed run"
            );
            return Vec::new();
        }

        let mut updates = Vec::new();
        if !self.active.contains_key(run_id) {
            let run = Run::start(run_id, event);
            updates.push(RunUpdate::Started(run.clone()));
            self.active.insert(run_id.to_string(), run);
        }

        let Some(run) = self.active.get_mut(run_id) else {
            return updates;
        };
        run.touch(event);

        match data {
            AgentData::ToolUse { name, input } if stream == Some(TOOL_STREAM) => {
                let mut tool_call = ToolCall {
                    name: name.clone(),
                    input: input.clone(),
                    observed_at: event.received_at,
                    risk: None,
                };
                tool_call.risk = detector.evaluate(&tool_call);
                run.tool_calls.push(tool_call.clone());

                updates.push(RunUpdate::ToolCall {
                    run_id: run_id.to_string(),
                    tool_call: tool_call.clone(),
                });
                if let Some(risk) = tool_call.risk.clone() {
                    updates.push(RunUpdate::RiskFlagged(RiskAlert {
                        run_id: run_id.to_string(),
                        tool_call,
                        risk,
                    }));
                }
            }
            AgentData::Text {
                delta: Some(delta), ..
            } => {
                let length = delta.chars().count() as u64;
                run.text_length = run.text_length.saturating_add(length);
            }
            _ => {}
        }

        updates
    }

    fn apply_final(&mut self, event: &Event) -> Vec<RunUpdate> {
        let Some(run_id) = event.run_id.as_deref() else {
            return Vec::new();
        };

        let Some(mut run) = self.active.remove(run_id) else {
            debug!(
                run_id = %run_id,
                retired = self.retired.contains(run_id),
                "Ignoring final chat for inactive run"
            );
            return Vec::new();
        };

        run.touch(event);
        run.status = RunStatus::Complete;
        run.completed_at = Some(event.received_at);
        self.retire(run.clone());

        vec![RunUpdate::Completed(run)]
    }

    fn retire(&mut self, run: Run) {
        self.retired.insert(&run.run_id);
        self.completed.push_back(run);
        while self.completed.len() > self.completed_retention {
            self.completed.pop_front();
        }
    }

    /// Active runs ordered by when they started.
    pub fn active_runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self.active.values().cloned().collect();
        runs.sort_by_key(|run| run.start_sequence);
        runs
    }

    /// Retained completed runs, oldest completion first.
    pub fn completed_runs(&self) -> Vec<Run> {
        self.completed.iter().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Looks a run up in the active set, then the retained completed set.
    pub fn run(&self, run_id: &str) -> Option<Run> {
        self.active.get(run_id).cloned().or_else(|| {
            self.completed
                .iter()
                .rev()
                .find(|run| run.run_id == run_id)
                .cloned()
        })
    }
}

fn stale_window_ms(secs: u64) -> Option<i64> {
    if secs == 0 {
        return None;
    }
    Some(i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX))
}
