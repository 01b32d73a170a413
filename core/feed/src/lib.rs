//! # sentinel-feed
//!
//! The live feed behind Sentinel: ingests the agent gateway's event stream,
//! reconstructs the lifecycle of each agent run, flags dangerous tool calls
//! and keeps rolling stats and recent history for dashboards.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Hosts wrap as needed.
//! - **Owned, not global**: Each host constructs its own [`LiveFeed`]; use
//!   [`SharedFeed`] when several threads touch it.
//! - **Never fails on input**: Malformed envelopes become `unknown` events.
//! - **Bounded**: Recent events and completed runs are capped.
//!
//! ## Quick Start
//!
//! ```rust
//! use sentinel_feed::{Channel, LiveFeed};
//! use serde_json::json;
//!
//! let mut feed = LiveFeed::new();
//! feed.subscribe(Channel::RiskAlert, |alert| {
//!     eprintln!("{:?}", alert);
//!     Ok(())
//! });
//! feed.process_event(&json!({
//!     "event": "agent",
//!     "payload": { "runId": "run-1", "stream": "assistant", "data": { "delta": "Hi" } }
//! }));
//! assert_eq!(feed.active_runs().len(), 1);
//! ```

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod notify;
pub mod patterns;
pub mod risk;
pub mod run;
pub mod stats;

pub use buffer::EventBuffer;
pub use config::{FeedConfig, RiskRuleConfig};
pub use engine::{FeedSnapshot, LiveFeed, SharedFeed};
pub use error::{FeedError, HandlerError, Result};
pub use event::{AgentData, Event, EventBody, EventKind, Normalizer};
pub use notify::{Channel, EmitReport, Notification, Notifier, SubscriptionId};
pub use risk::{RiskDetector, RiskInfo, Severity};
pub use run::{RiskAlert, Run, RunStatus, RunTracker, RunUpdate, ToolCall};
pub use stats::{Stats, StatsSnapshot};
