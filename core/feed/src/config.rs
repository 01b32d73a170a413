//! Feed configuration.
//!
//! Every field has a default so a partial (or empty) config section is valid.
//! Hosts deserialize this from their own config file; the feed itself does no
//! file I/O.

use serde::Deserialize;

use crate::buffer::{DEFAULT_BUFFER_CAPACITY, DEFAULT_RECENT_LIMIT};
use crate::risk::Severity;
use crate::run::{DEFAULT_COMPLETED_RETENTION, DEFAULT_RETIRED_RUN_IDS, DEFAULT_STALE_RUN_SECS};

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_completed_run_retention")]
    pub completed_run_retention: usize,
    /// How many completed run ids are remembered after their run ages out
    /// of the completed set. Late events for these ids stay ignored.
    #[serde(default = "default_retired_run_ids")]
    pub retired_run_ids: usize,
    /// Seconds without activity before a running run is dropped from the
    /// active set. `0` disables expiry.
    #[serde(default = "default_stale_run_secs")]
    pub stale_run_secs: u64,
    #[serde(default = "default_recent_limit")]
    pub default_recent_limit: usize,
    /// Appended after the built-in rules.
    #[serde(default)]
    pub risk_rules: Vec<RiskRuleConfig>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            completed_run_retention: DEFAULT_COMPLETED_RETENTION,
            retired_run_ids: DEFAULT_RETIRED_RUN_IDS,
            stale_run_secs: DEFAULT_STALE_RUN_SECS,
            default_recent_limit: DEFAULT_RECENT_LIMIT,
            risk_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskRuleConfig {
    pub pattern: String,
    #[serde(default = "default_rule_severity")]
    pub severity: Severity,
    pub reason: String,
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_completed_run_retention() -> usize {
    DEFAULT_COMPLETED_RETENTION
}

fn default_retired_run_ids() -> usize {
    DEFAULT_RETIRED_RUN_IDS
}

fn default_stale_run_secs() -> u64 {
    DEFAULT_STALE_RUN_SECS
}

fn default_recent_limit() -> usize {
    DEFAULT_RECENT_LIMIT
}

fn default_rule_severity() -> Severity {
    Severity::High
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let config: FeedConfig = serde_json::from_str("{}").expect("config");
        assert_eq!(config.buffer_capacity, 500);
        assert_eq!(config.completed_run_retention, 100);
        assert_eq!(config.retired_run_ids, 1000);
        assert_eq!(config.stale_run_secs, 6 * 60 * 60);
        assert_eq!(config.default_recent_limit, 50);
        assert!(config.risk_rules.is_empty());
    }

    #[test]
    fn stale_window_can_be_disabled() {
        let config: FeedConfig =
            serde_json::from_str(r#"{ "stale_run_secs": 0 }"#).expect("config");
        assert_eq!(config.stale_run_secs, 0);
        assert_eq!(config.buffer_capacity, 500);
    }

    #[test]
    fn rule_severity_defaults_to_high() {
        let config: FeedConfig = serde_json::from_str(
            r#"{ "risk_rules": [{ "pattern": "curl .*\\| *sh", "reason": "Pipe to shell" }] }"#,
        )
        .expect("config");

        assert_eq!(config.risk_rules.len(), 1);
        assert_eq!(config.risk_rules[0].severity, Severity::High);
    }
}
