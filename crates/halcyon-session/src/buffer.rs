//! In-memory sliding window over the most recent turns per session
//! (spec.md §4.2). Bounded at `N` turns; overflow is handed back to the
//! caller to archive, never dropped silently.

use std::collections::HashMap;

use dashmap::DashMap;

use crate::key::SessionKey;
use crate::log::Turn;

pub const DEFAULT_BUFFER_SIZE: usize = 10;

pub struct SessionBuffer {
    capacity: usize,
    buffers: DashMap<SessionKey, Vec<Turn>>,
}

impl SessionBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, buffers: DashMap::new() }
    }

    /// Append one turn; if the buffer now exceeds capacity, shift the
    /// oldest turns out and return them, oldest-first. The caller owns
    /// archiving the evicted batch.
    pub fn append(&self, key: &SessionKey, turn: Turn) -> Vec<Turn> {
        let mut buf = self.buffers.entry(key.clone()).or_default();
        buf.push(turn);
        if buf.len() > self.capacity {
            let overflow = buf.len() - self.capacity;
            buf.drain(0..overflow).collect()
        } else {
            Vec::new()
        }
    }

    pub fn get_turns(&self, key: &SessionKey) -> Vec<Turn> {
        self.buffers.get(key).map(|b| b.clone()).unwrap_or_default()
    }

    pub fn is_empty(&self, key: &SessionKey) -> bool {
        self.buffers.get(key).map(|b| b.is_empty()).unwrap_or(true)
    }

    /// Replace the buffer for `key`, clamped to the last `capacity` turns.
    pub fn restore(&self, key: &SessionKey, turns: Vec<Turn>) {
        let clamped = if turns.len() > self.capacity {
            turns[turns.len() - self.capacity..].to_vec()
        } else {
            turns
        };
        self.buffers.insert(key.clone(), clamped);
    }

    pub fn flush(&self, key: &SessionKey) -> Vec<Turn> {
        self.buffers.remove(key).map(|(_, v)| v).unwrap_or_default()
    }

    pub fn flush_all(&self) -> HashMap<SessionKey, Vec<Turn>> {
        let drained: HashMap<SessionKey, Vec<Turn>> =
            self.buffers.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        self.buffers.clear();
        drained
    }
}

impl Default for SessionBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(content: &str) -> Turn {
        Turn { role: "user".to_string(), content: content.to_string(), timestamp: Utc::now() }
    }

    fn key() -> SessionKey {
        SessionKey::new("main", "cli", "main")
    }

    #[test]
    fn append_below_capacity_evicts_nothing() {
        let buf = SessionBuffer::new(3);
        let k = key();
        assert!(buf.append(&k, turn("a")).is_empty());
        assert!(buf.append(&k, turn("b")).is_empty());
        assert_eq!(buf.get_turns(&k).len(), 2);
    }

    #[test]
    fn eviction_batch_is_oldest_first() {
        let buf = SessionBuffer::new(2);
        let k = key();
        buf.append(&k, turn("a"));
        buf.append(&k, turn("b"));
        let evicted = buf.append(&k, turn("c"));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].content, "a");
        let remaining = buf.get_turns(&k);
        assert_eq!(remaining.iter().map(|t| t.content.as_str()).collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn restore_clamps_to_capacity() {
        let buf = SessionBuffer::new(2);
        let k = key();
        let turns = vec![turn("a"), turn("b"), turn("c")];
        buf.restore(&k, turns);
        let restored = buf.get_turns(&k);
        assert_eq!(restored.iter().map(|t| t.content.as_str()).collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn flush_empties_and_returns_buffer() {
        let buf = SessionBuffer::new(3);
        let k = key();
        buf.append(&k, turn("a"));
        let flushed = buf.flush(&k);
        assert_eq!(flushed.len(), 1);
        assert!(buf.is_empty(&k));
    }

    #[test]
    fn flush_all_drains_every_session() {
        let buf = SessionBuffer::new(3);
        let k1 = SessionKey::new("main", "cli", "a");
        let k2 = SessionKey::new("main", "cli", "b");
        buf.append(&k1, turn("x"));
        buf.append(&k2, turn("y"));
        let all = buf.flush_all();
        assert_eq!(all.len(), 2);
        assert!(buf.is_empty(&k1));
        assert!(buf.is_empty(&k2));
    }

    #[test]
    fn is_empty_true_for_unknown_key() {
        let buf = SessionBuffer::new(3);
        assert!(buf.is_empty(&key()));
    }
}
