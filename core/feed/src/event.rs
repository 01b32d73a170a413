//! Event normalization.
//!
//! Raw envelopes arrive as untyped JSON from the gateway transport. The
//! normalizer classifies them into a fixed set of kinds and validates the
//! kind-specific fields once, here, so nothing downstream has to poke at
//! loose `Value`s. Malformed input maps to [`EventKind::Unknown`]; this
//! boundary never fails.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Agent stream carrying tool invocations.
pub const TOOL_STREAM: &str = "tool";
/// Agent data `type` marking a tool invocation.
pub const TOOL_USE_TYPE: &str = "tool_use";
/// Chat state that terminates a run.
pub const FINAL_CHAT_STATE: &str = "final";

/// Envelope keys checked for the kind discriminator, in priority order.
const DISCRIMINATOR_KEYS: [&str; 3] = ["event", "kind", "type"];
const RECEIVED_AT_KEYS: [&str; 2] = ["receivedAt", "received_at"];
const UNNAMED_TOOL: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Agent,
    Chat,
    Health,
    Tick,
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Agent => "agent",
            EventKind::Chat => "chat",
            EventKind::Health => "health",
            EventKind::Tick => "tick",
            EventKind::Unknown => "unknown",
        }
    }

    /// Classifies a discriminator string. Anything unrecognized is `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "agent" => EventKind::Agent,
            "chat" => EventKind::Chat,
            "health" => EventKind::Health,
            "tick" => EventKind::Tick,
            _ => EventKind::Unknown,
        }
    }
}

/// The `data` object of an agent event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentData {
    ToolUse {
        name: String,
        input: Value,
    },
    Text {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        delta: Option<String>,
    },
    Empty,
}

/// Kind-specific body of a normalized event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum EventBody {
    Agent {
        #[serde(skip_serializing_if = "Option::is_none")]
        stream: Option<String>,
        data: AgentData,
    },
    Chat {
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<Value>,
    },
    Health {
        #[serde(skip_serializing_if = "Option::is_none")]
        ok: Option<bool>,
    },
    Tick,
    Unknown {
        #[serde(skip_serializing_if = "Option::is_none")]
        raw_kind: Option<String>,
    },
}

impl EventBody {
    pub fn kind(&self) -> EventKind {
        match self {
            EventBody::Agent { .. } => EventKind::Agent,
            EventBody::Chat { .. } => EventKind::Chat,
            EventBody::Health { .. } => EventKind::Health,
            EventBody::Tick => EventKind::Tick,
            EventBody::Unknown { .. } => EventKind::Unknown,
        }
    }
}

/// A normalized unit of ingested activity. Immutable once created; the
/// buffer owns it and accessors hand out clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(flatten)]
    pub body: EventBody,
    /// The payload exactly as received (empty object when absent).
    pub payload: Value,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }

    pub fn stream(&self) -> Option<&str> {
        match &self.body {
            EventBody::Agent { stream, .. } => stream.as_deref(),
            _ => None,
        }
    }

    /// True for a chat event whose state marks the end of a run.
    pub fn is_final_chat(&self) -> bool {
        matches!(
            &self.body,
            EventBody::Chat { state: Some(state), .. } if state == FINAL_CHAT_STATE
        )
    }
}

/// Assigns sequence numbers and turns raw envelopes into [`Event`]s.
#[derive(Debug, Default)]
pub struct Normalizer {
    last_sequence: u64,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the most recently normalized event (0 before any).
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn normalize(&mut self, raw: &Value) -> Event {
        self.normalize_at(raw, Utc::now())
    }

    /// Normalizes `raw`, using `now` when the envelope carries no usable
    /// receive timestamp.
    pub fn normalize_at(&mut self, raw: &Value, now: DateTime<Utc>) -> Event {
        self.last_sequence = self.last_sequence.saturating_add(1);

        let raw_kind = discriminator(raw);
        let kind = raw_kind
            .as_deref()
            .map(EventKind::parse)
            .unwrap_or(EventKind::Unknown);
        let payload = raw
            .get("payload")
            .filter(|value| value.is_object())
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        let (run_id, session_key) = match kind {
            EventKind::Agent | EventKind::Chat => (
                run_identifier(&payload, "runId"),
                non_blank_string(&payload, "sessionKey"),
            ),
            _ => (None, None),
        };

        let body = match kind {
            EventKind::Agent => EventBody::Agent {
                stream: non_blank_string(&payload, "stream"),
                data: agent_data(payload.get("data")),
            },
            EventKind::Chat => EventBody::Chat {
                state: non_blank_string(&payload, "state"),
                message: payload.get("message").cloned(),
            },
            EventKind::Health => EventBody::Health {
                ok: payload.get("ok").and_then(Value::as_bool),
            },
            EventKind::Tick => EventBody::Tick,
            EventKind::Unknown => EventBody::Unknown { raw_kind },
        };

        Event {
            sequence: self.last_sequence,
            received_at: received_at(raw).unwrap_or(now),
            run_id,
            session_key,
            body,
            payload,
        }
    }
}

fn discriminator(raw: &Value) -> Option<String> {
    DISCRIMINATOR_KEYS
        .iter()
        .find_map(|key| raw.get(key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn received_at(raw: &Value) -> Option<DateTime<Utc>> {
    let value = RECEIVED_AT_KEYS.iter().find_map(|key| raw.get(key))?;
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(number) => number
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

fn non_blank_string(object: &Value, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
}

/// Run ids arrive as strings, but numeric ids are keyed by their decimal
/// form so `42` and `"42"` name the same run.
fn run_identifier(object: &Value, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::Number(number) => Some(number.to_string()),
        _ => non_blank_string(object, key),
    }
}

fn agent_data(data: Option<&Value>) -> AgentData {
    let Some(data) = data.filter(|value| value.is_object()) else {
        return AgentData::Empty;
    };

    if data.get("type").and_then(Value::as_str) == Some(TOOL_USE_TYPE) {
        return AgentData::ToolUse {
            name: non_blank_string(data, "name").unwrap_or_else(|| UNNAMED_TOOL.to_string()),
            input: data.get("input").cloned().unwrap_or(Value::Null),
        };
    }

    let text = data.get("text").and_then(Value::as_str).map(str::to_string);
    let delta = data.get("delta").and_then(Value::as_str).map(str::to_string);
    if text.is_none() && delta.is_none() {
        AgentData::Empty
    } else {
        AgentData::Text { text, delta }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-31T00:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn classifies_agent_event() {
        let mut normalizer = Normalizer::new();
        let event = normalizer.normalize_at(
            &json!({
                "event": "agent",
                "payload": {
                    "runId": "run-123",
                    "stream": "assistant",
                    "sessionKey": "agent:main:main",
                    "data": { "text": "Hello", "delta": "Hello" },
                    "seq": 1
                }
            }),
            fixed_now(),
        );

        assert_eq!(event.kind(), EventKind::Agent);
        assert_eq!(event.run_id.as_deref(), Some("run-123"));
        assert_eq!(event.session_key.as_deref(), Some("agent:main:main"));
        assert_eq!(event.stream(), Some("assistant"));
        assert_eq!(
            event.body,
            EventBody::Agent {
                stream: Some("assistant".to_string()),
                data: AgentData::Text {
                    text: Some("Hello".to_string()),
                    delta: Some("Hello".to_string()),
                },
            }
        );
    }

    #[test]
    fn classifies_tool_use() {
        let mut normalizer = Normalizer::new();
        let event = normalizer.normalize(&json!({
            "event": "agent",
            "payload": {
                "runId": "run-tool",
                "stream": "tool",
                "data": { "type": "tool_use", "name": "exec", "input": { "command": "ls -la" } }
            }
        }));

        match event.body {
            EventBody::Agent {
                data: AgentData::ToolUse { name, input },
                ..
            } => {
                assert_eq!(name, "exec");
                assert_eq!(input["command"], "ls -la");
            }
            other => panic!("expected tool use, got {:?}", other),
        }
    }

    #[test]
    fn classifies_chat_health_and_tick() {
        let mut normalizer = Normalizer::new();
        let chat = normalizer.normalize(&json!({
            "event": "chat",
            "payload": { "runId": "run-456", "state": "final" }
        }));
        let health = normalizer.normalize(&json!({
            "event": "health",
            "payload": { "ok": true, "ts": 1_700_000_000_000_i64 }
        }));
        let tick = normalizer.normalize(&json!({ "event": "tick", "payload": {} }));

        assert_eq!(chat.kind(), EventKind::Chat);
        assert!(chat.is_final_chat());
        assert_eq!(health.body, EventBody::Health { ok: Some(true) });
        assert_eq!(health.run_id, None);
        assert_eq!(tick.kind(), EventKind::Tick);
    }

    #[test]
    fn non_final_chat_is_not_terminal() {
        let mut normalizer = Normalizer::new();
        let chat = normalizer.normalize(&json!({
            "event": "chat",
            "payload": { "runId": "run-456", "state": "delta" }
        }));
        assert!(!chat.is_final_chat());
    }

    #[test]
    fn accepts_kind_alias() {
        let mut normalizer = Normalizer::new();
        let event = normalizer.normalize(&json!({ "kind": "tick", "payload": {} }));
        assert_eq!(event.kind(), EventKind::Tick);
    }

    #[test]
    fn malformed_envelopes_become_unknown() {
        let mut normalizer = Normalizer::new();
        let cases = [
            json!({ "event": "bogus", "payload": {} }),
            json!({ "event": 42, "payload": {} }),
            json!({ "payload": { "runId": "r1" } }),
            json!("just a string"),
            Value::Null,
        ];

        for raw in cases.iter() {
            let event = normalizer.normalize(raw);
            assert_eq!(event.kind(), EventKind::Unknown, "case {}", raw);
            assert_eq!(event.run_id, None);
        }
    }

    #[test]
    fn unknown_keeps_raw_discriminator() {
        let mut normalizer = Normalizer::new();
        let event = normalizer.normalize(&json!({ "event": "presence" }));
        assert_eq!(
            event.body,
            EventBody::Unknown {
                raw_kind: Some("presence".to_string())
            }
        );
    }

    #[test]
    fn missing_or_non_object_payload_is_empty_object() {
        let mut normalizer = Normalizer::new();
        let missing = normalizer.normalize(&json!({ "event": "agent" }));
        let scalar = normalizer.normalize(&json!({ "event": "agent", "payload": 7 }));

        assert_eq!(missing.payload, json!({}));
        assert_eq!(scalar.payload, json!({}));
        assert_eq!(missing.run_id, None);
    }

    #[test]
    fn blank_run_id_is_absent() {
        let mut normalizer = Normalizer::new();
        let event = normalizer.normalize(&json!({
            "event": "agent",
            "payload": { "runId": "   ", "data": { "delta": "x" } }
        }));
        assert_eq!(event.run_id, None);
    }

    #[test]
    fn numeric_run_id_is_keyed_as_string() {
        let mut normalizer = Normalizer::new();
        let numeric = normalizer.normalize(&json!({
            "event": "agent",
            "payload": { "runId": 42, "data": { "delta": "x" } }
        }));
        let boolean = normalizer.normalize(&json!({
            "event": "chat",
            "payload": { "runId": true, "state": "final" }
        }));

        assert_eq!(numeric.run_id.as_deref(), Some("42"));
        assert_eq!(boolean.run_id, None);
    }

    #[test]
    fn sequence_is_monotonic() {
        let mut normalizer = Normalizer::new();
        let first = normalizer.normalize(&json!({ "event": "tick" }));
        let second = normalizer.normalize(&json!({ "event": "garbage" }));
        let third = normalizer.normalize(&Value::Null);

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(third.sequence, 3);
        assert_eq!(normalizer.last_sequence(), 3);
    }

    #[test]
    fn received_at_defaults_to_now() {
        let mut normalizer = Normalizer::new();
        let event = normalizer.normalize_at(&json!({ "event": "tick" }), fixed_now());
        assert_eq!(event.received_at, fixed_now());
    }

    #[test]
    fn received_at_from_envelope() {
        let mut normalizer = Normalizer::new();
        let rfc = normalizer.normalize_at(
            &json!({ "event": "tick", "receivedAt": "2026-02-01T10:00:00Z" }),
            fixed_now(),
        );
        let millis = normalizer.normalize_at(
            &json!({ "event": "tick", "received_at": 1_769_817_600_000_i64 }),
            fixed_now(),
        );
        let invalid = normalizer.normalize_at(
            &json!({ "event": "tick", "receivedAt": "yesterday" }),
            fixed_now(),
        );

        assert_eq!(rfc.received_at.to_rfc3339(), "2026-02-01T10:00:00+00:00");
        assert_eq!(millis.received_at.timestamp_millis(), 1_769_817_600_000);
        assert_eq!(invalid.received_at, fixed_now());
    }

    #[test]
    fn serializes_with_type_tag() {
        let mut normalizer = Normalizer::new();
        let event = normalizer.normalize_at(
            &json!({ "event": "agent", "payload": { "runId": "run-1", "data": { "delta": "Hi" } } }),
            fixed_now(),
        );
        let value = serde_json::to_value(&event).expect("serialize");

        assert_eq!(value["type"], "agent");
        assert_eq!(value["runId"], "run-1");
        assert_eq!(value["sequence"], 1);
        assert_eq!(value["data"]["type"], "text");
        assert_eq!(value["data"]["delta"], "Hi");
    }
}
