//! Bounded, most-recent-first message history.

use std::collections::VecDeque;

/// Default capacity of every per-class history.
pub const DEFAULT_CAPACITY: usize = 20;

/// Fixed-capacity history, newest entry at the head.
///
/// Eviction runs after insertion and trims while `len >= capacity`, so a
/// history with capacity `N` retains at most `N - 1` entries. This mirrors
/// the vendor integration's behaviour and is kept on purpose until product
/// intent is clarified.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedHistory<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    /// Empty history with the given capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert at the head, then evict from the tail.
    pub fn push(&mut self, entry: T) {
        self.entries.push_front(entry);
        while self.entries.len() >= self.capacity {
            if self.entries.pop_back().is_none() {
                break;
            }
        }
    }

    /// Most recent entry.
    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.entries.front()
    }

    /// Entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Default for BoundedHistory<T> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}
