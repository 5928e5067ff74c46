//! Bounded window of recently seen keys.
//!
//! Used both upstream (the stream multiplexes feeds and repeats events) and
//! downstream (redelivered queue messages that were already fanned out).

use std::collections::{HashSet, VecDeque};

/// FIFO-evicting set of the last `capacity` keys.
#[derive(Debug, Clone)]
pub struct RecentKeys {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentKeys {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record `key`. Returns `false` if it was already in the window.
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        let key = key.into();
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
