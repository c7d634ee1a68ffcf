//! Bounded FIFO of recent cross-agent turns.

use std::collections::VecDeque;

use agentbus_core::ring::{RingEntry, select_context};

/// Shared conversation ring. Oldest entries are evicted first.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    entries: VecDeque<RingEntry>,
    capacity: usize,
}

impl RingBuffer {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append an entry, evicting from the front past capacity. Returns the new size.
    pub fn push(&mut self, entry: RingEntry) -> usize {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        self.entries.len()
    }

    /// Last `limit` entries not written by `exclude`, most-recent-last.
    pub fn context(&self, exclude: Option<&str>, limit: usize) -> Vec<RingEntry> {
        select_context(self.entries.iter(), exclude, limit)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &RingEntry> {
        self.entries.iter()
    }
}
