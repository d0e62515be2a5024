//! Response transcript
//!
//! Device output of the current session, in arrival order.

use std::collections::VecDeque;

/// Bounded append-only log of device replies
#[derive(Debug, Clone)]
pub struct Transcript {
    entries: VecDeque<String>,
    capacity: usize,
    /// Entries dropped to stay within `capacity` since the last clear
    evicted: u64,
}

impl Transcript {
    /// Create a transcript holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            evicted: 0,
        }
    }

    /// Add a chunk at the end, evicting the oldest entry when full
    pub fn append(&mut self, chunk: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(chunk.into());
    }

    /// Remove every entry and reset the eviction count
    pub fn clear(&mut self) {
        self.entries.clear();
        self.evicted = 0;
    }

    /// Copy of the entries, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    /// Number of entries held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been appended since the last clear
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most entries held at once
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries dropped since the last clear
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new(10_000)
    }
}
