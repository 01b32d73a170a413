//! In-memory state managed by the daemon.
//!
//! One `SharedFeed` receives every forwarded gateway event; connection
//! bookkeeping lives alongside it so health can report on both.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use sentinel_daemon_protocol::PROTOCOL_VERSION;
use sentinel_feed::{Channel, LiveFeed, Notification, SharedFeed};

pub const MAX_ACTIVE_CONNECTIONS: usize = 64;

pub struct DaemonState {
    feed: SharedFeed,
    started_at: Instant,
    active_connections: AtomicUsize,
    rejected_connections: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub pid: u32,
    pub version: &'static str,
    pub protocol_version: u32,
    pub uptime_secs: u64,
    pub total_events: u64,
    pub active_runs: usize,
    pub security: SecuritySnapshot,
}

#[derive(Debug, Serialize)]
pub struct SecuritySnapshot {
    pub active_connections: usize,
    pub max_active_connections: usize,
    pub rejected_connections: u64,
}

/// Held for the lifetime of one accepted connection.
pub struct ConnectionPermit {
    state: Arc<DaemonState>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.state.active_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

impl DaemonState {
    pub fn new(feed: LiveFeed) -> Self {
        let feed = SharedFeed::new(feed);
        install_run_logging(&feed);
        Self {
            feed,
            started_at: Instant::now(),
            active_connections: AtomicUsize::new(0),
            rejected_connections: AtomicU64::new(0),
        }
    }

    pub fn feed(&self) -> &SharedFeed {
        &self.feed
    }

    /// Returns `None` (and counts the rejection) once the connection cap is
    /// reached.
    pub fn try_acquire_connection(self: &Arc<Self>) -> Option<ConnectionPermit> {
        let acquired = self
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < MAX_ACTIVE_CONNECTIONS).then_some(active + 1)
            })
            .is_ok();

        if acquired {
            Some(ConnectionPermit {
                state: Arc::clone(self),
            })
        } else {
            self.rejected_connections.fetch_add(1, Ordering::AcqRel);
            None
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        let stats = self.feed.stats();
        HealthSnapshot {
            status: "ok",
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION"),
            protocol_version: PROTOCOL_VERSION,
            uptime_secs: self.started_at.elapsed().as_secs(),
            total_events: stats.total_events,
            active_runs: stats.active_runs,
            security: SecuritySnapshot {
                active_connections: self.active_connections.load(Ordering::Acquire),
                max_active_connections: MAX_ACTIVE_CONNECTIONS,
                rejected_connections: self.rejected_connections.load(Ordering::Acquire),
            },
        }
    }
}

/// Mirrors run lifecycle and risk notifications into the daemon log.
fn install_run_logging(feed: &SharedFeed) {
    for channel in [Channel::RunStart, Channel::RunComplete, Channel::RiskAlert] {
        feed.subscribe(channel, |notification| {
            match notification {
                Notification::RunStart(run) => {
                    info!(
                        run_id = %run.run_id,
                        session_key = ?run.session_key,
                        "Run started"
                    );
                }
                Notification::RunComplete(run) => {
                    info!(
                        run_id = %run.run_id,
                        text_length = run.text_length,
                        tool_calls = run.tool_calls.len(),
                        "Run complete"
                    );
                }
                Notification::RiskAlert(alert) => {
                    warn!(
                        run_id = %alert.run_id,
                        tool = %alert.tool_call.name,
                        severity = alert.risk.severity.as_str(),
                        pattern = %alert.risk.matched_pattern,
                        "Risk alert"
                    );
                }
                Notification::Activity(_) => {}
            }
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn connection_cap_rejects_and_counts() {
        let state = Arc::new(DaemonState::new(LiveFeed::new()));
        let permits: Vec<_> = (0..MAX_ACTIVE_CONNECTIONS)
            .map(|_| state.try_acquire_connection().expect("permit"))
            .collect();

        assert!(state.try_acquire_connection().is_none());
        assert_eq!(state.health().security.rejected_connections, 1);
        assert_eq!(
            state.health().security.active_connections,
            MAX_ACTIVE_CONNECTIONS
        );

        drop(permits);
        assert_eq!(state.health().security.active_connections, 0);
        assert!(state.try_acquire_connection().is_some());
    }

    #[test]
    fn health_reflects_feed() {
        let state = DaemonState::new(LiveFeed::new());
        state.feed().process_event(&json!({
            "event": "agent",
            "payload": { "runId": "r1", "data": { "delta": "Hi" } }
        }));

        let health = state.health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.total_events, 1);
        assert_eq!(health.active_runs, 1);
        assert_eq!(health.protocol_version, PROTOCOL_VERSION);
    }
}
