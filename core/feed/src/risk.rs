//! Risk detection for tool invocations.
//!
//! An ordered table of (pattern, severity, reason) rules is matched against
//! the text of a tool call's input. First match wins. Evaluation is pure.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RiskRuleConfig;
use crate::error::{FeedError, Result};
use crate::patterns::RE_ROOT_DELETE;
use crate::run::ToolCall;

/// Input keys holding a shell command, checked in order.
const COMMAND_KEYS: [&str; 2] = ["command", "cmd"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Verdict attached to a flagged tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskInfo {
    pub severity: Severity,
    pub reason: String,
    pub matched_pattern: String,
}

#[derive(Debug, Clone)]
pub struct RiskRule {
    pattern: Regex,
    severity: Severity,
    reason: String,
}

impl RiskRule {
    pub fn new(pattern: Regex, severity: Severity, reason: impl Into<String>) -> Self {
        Self {
            pattern,
            severity,
            reason: reason.into(),
        }
    }

    pub fn from_config(config: &RiskRuleConfig) -> Result<Self> {
        let pattern =
            Regex::new(&config.pattern).map_err(|source| FeedError::InvalidRiskPattern {
                pattern: config.pattern.clone(),
                source,
            })?;
        Ok(Self::new(pattern, config.severity, config.reason.clone()))
    }

    fn check(&self, text: &str) -> Option<RiskInfo> {
        if !self.pattern.is_match(text) {
            return None;
        }
        Some(RiskInfo {
            severity: self.severity,
            reason: self.reason.clone(),
            matched_pattern: self.pattern.as_str().to_string(),
        })
    }
}

fn builtin_rules() -> Vec<RiskRule> {
    vec![RiskRule::new(
        RE_ROOT_DELETE.clone(),
        Severity::Critical,
        "Recursive forced deletion of the filesystem root",
    )]
}

#[derive(Debug, Clone)]
pub struct RiskDetector {
    rules: Vec<RiskRule>,
}

impl Default for RiskDetector {
    fn default() -> Self {
        Self {
            rules: builtin_rules(),
        }
    }
}

impl RiskDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in rules followed by `extra`, in the order given.
    pub fn with_rules(extra: &[RiskRuleConfig]) -> Result<Self> {
        let mut rules = builtin_rules();
        for config in extra {
            rules.push(RiskRule::from_config(config)?);
        }
        Ok(Self { rules })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn evaluate(&self, tool_call: &ToolCall) -> Option<RiskInfo> {
        self.evaluate_input(&tool_call.input)
    }

    pub fn evaluate_input(&self, input: &Value) -> Option<RiskInfo> {
        let text = input_text(input)?;
        self.rules.iter().find_map(|rule| rule.check(&text))
    }
}

/// The text a tool input is judged by: its command string when it has one,
/// the string itself, or its compact JSON otherwise.
fn input_text(input: &Value) -> Option<String> {
    match input {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Object(object) => COMMAND_KEYS
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .or_else(|| serde_json::to_string(input).ok()),
        other => serde_json::to_string(other).ok(),
    }
}
