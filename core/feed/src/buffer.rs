//! Fixed-capacity buffer of recent events.

use std::collections::VecDeque;

use crate::event::Event;

pub const DEFAULT_BUFFER_CAPACITY: usize = 500;
pub const DEFAULT_RECENT_LIMIT: usize = 50;

/// FIFO of the most recent events. Once full, each push evicts the oldest.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    events: VecDeque<Event>,
    capacity: usize,
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }
}

impl EventBuffer {
    /// Creates a buffer holding at most `capacity` events (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: Event) {
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// The last `limit` events in arrival order, most recent last.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }

    pub fn all(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Normalizer;
    use serde_json::json;

    fn ticks(count: usize) -> Vec<Event> {
        let mut normalizer = Normalizer::new();
        (0..count)
            .map(|i| normalizer.normalize(&json!({ "event": "tick", "payload": { "i": i } })))
            .collect()
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut buffer = EventBuffer::default();
        for event in ticks(600) {
            buffer.push(event);
        }

        assert_eq!(buffer.len(), DEFAULT_BUFFER_CAPACITY);
        let all = buffer.all();
        assert_eq!(all.first().map(|event| event.sequence), Some(101));
        assert_eq!(all.last().map(|event| event.sequence), Some(600));
        assert!(all.windows(2).all(|pair| pair[0].sequence < pair[1].sequence));
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let mut buffer = EventBuffer::default();
        for event in ticks(100) {
            buffer.push(event);
        }

        let recent = buffer.recent(10);
        let sequences: Vec<u64> = recent.iter().map(|event| event.sequence).collect();
        assert_eq!(sequences, (91..=100).collect::<Vec<u64>>());
    }

    #[test]
    fn recent_is_capped_at_length() {
        let mut buffer = EventBuffer::default();
        for event in ticks(3) {
            buffer.push(event);
        }

        assert_eq!(buffer.recent(50).len(), 3);
        assert!(buffer.recent(0).is_empty());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut buffer = EventBuffer::with_capacity(0);
        for event in ticks(2) {
            buffer.push(event);
        }

        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.all()[0].sequence, 2);
    }
}
