//! Synchronous publish/subscribe for feed notifications.
//!
//! Handlers run on the caller's thread, in subscription order. A handler that
//! returns an error or panics is logged and skipped; it never affects the
//! remaining handlers or the caller of `process_event`.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use tracing::warn;

use crate::error::{FeedError, HandlerError};
use crate::event::Event;
use crate::run::{RiskAlert, Run};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Activity,
    RunStart,
    RunComplete,
    RiskAlert,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Activity,
        Channel::RunStart,
        Channel::RunComplete,
        Channel::RiskAlert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Activity => "activity",
            Channel::RunStart => "run:start",
            Channel::RunComplete => "run:complete",
            Channel::RiskAlert => "risk:alert",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = FeedError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|channel| channel.as_str() == value)
            .ok_or_else(|| FeedError::UnknownChannel(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "channel", content = "payload")]
#[allow(clippy::large_enum_variant)]
pub enum Notification {
    #[serde(rename = "activity")]
    Activity(Event),
    #[serde(rename = "run:start")]
    RunStart(Run),
    #[serde(rename = "run:complete")]
    RunComplete(Run),
    #[serde(rename = "risk:alert")]
    RiskAlert(RiskAlert),
}

impl Notification {
    pub fn channel(&self) -> Channel {
        match self {
            Notification::Activity(_) => Channel::Activity,
            Notification::RunStart(_) => Channel::RunStart,
            Notification::RunComplete(_) => Channel::RunComplete,
            Notification::RiskAlert(_) => Channel::RiskAlert,
        }
    }
}

pub type Handler = Box<dyn FnMut(&Notification) -> Result<(), HandlerError> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Outcome of one emit: how many handlers ran cleanly and how many failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub delivered: usize,
    pub failed: usize,
}

struct Subscriber {
    id: SubscriptionId,
    handler: Handler,
}

#[derive(Default)]
pub struct Notifier {
    subscribers: HashMap<Channel, Vec<Subscriber>>,
    next_id: u64,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&'static str, usize> = self
            .subscribers
            .iter()
            .map(|(channel, subscribers)| (channel.as_str(), subscribers.len()))
            .collect();
        f.debug_struct("Notifier")
            .field("subscribers", &counts)
            .finish()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, channel: Channel, handler: F) -> SubscriptionId
    where
        F: FnMut(&Notification) -> Result<(), HandlerError> + Send + 'static,
    {
        self.next_id = self.next_id.saturating_add(1);
        let id = SubscriptionId(self.next_id);
        self.subscribers.entry(channel).or_default().push(Subscriber {
            id,
            handler: Box::new(handler),
        });
        id
    }

    /// Removes a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for subscribers in self.subscribers.values_mut() {
            if let Some(index) = subscribers.iter().position(|entry| entry.id == id) {
                subscribers.remove(index);
                return true;
            }
        }
        false
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.subscribers
            .get(&channel)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    pub fn emit(&mut self, notification: &Notification) -> EmitReport {
        let channel = notification.channel();
        let mut report = EmitReport::default();
        let Some(subscribers) = self.subscribers.get_mut(&channel) else {
            return report;
        };

        for subscriber in subscribers.iter_mut() {
            let handler = &mut subscriber.handler;
            match panic::catch_unwind(AssertUnwindSafe(|| handler(notification))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    warn!(
                        channel = %channel,
                        subscription = subscriber.id.as_u64(),
                        error = %err,
                        "Subscriber handler failed"
                    );
                }
                Err(payload) => {
                    report.failed += 1;
                    warn!(
                        channel = %channel,
                        subscription = subscriber.id.as_u64(),
                        panic = %panic_message(payload.as_ref()),
                        "Subscriber handler panicked"
                    );
                }
            }
        }

        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
