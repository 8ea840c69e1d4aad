//! Delta list of pending timers.
//!
//! Each entry stores its interval relative to the entry before it, so the
//! head's delta is exactly the number of ticks until the next timer fires and
//! consuming time only touches the head.
//!
//! ```text
//! absolute deadlines:  3   5   5   9
//! stored deltas:       3   2   0   4
//! ```
//!
//! Entries with equal deadlines keep insertion order.

use std::collections::VecDeque;

#[derive(Debug)]
struct Entry<T> {
    id: u64,
    delta: u64,
    item: T,
}

#[derive(Debug)]
pub(crate) struct DeltaList<T> {
    entries: VecDeque<Entry<T>>,
}

impl<T> Default for DeltaList<T> {
    fn default() -> Self {
        DeltaList {
            entries: VecDeque::new(),
        }
    }
}

impl<T> DeltaList<T> {
    /// Insert `item` to fire `interval` ticks after the list's origin.
    pub(crate) fn insert(&mut self, id: u64, interval: u64, item: T) {
        let mut remaining = interval;
        let mut index = self.entries.len();
        for (i, entry) in self.entries.iter().enumerate() {
            if remaining < entry.delta {
                index = i;
                break;
            }
            remaining -= entry.delta;
        }
        if let Some(next) = self.entries.get_mut(index) {
            next.delta -= remaining;
        }
        self.entries.insert(
            index,
            Entry {
                id,
                delta: remaining,
                item,
            },
        );
    }

    /// Remove an entry, handing its delta to its successor.
    pub(crate) fn remove(&mut self, id: u64) -> Option<T> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        let removed = self.entries.remove(index)?;
        if let Some(next) = self.entries.get_mut(index) {
            next.delta += removed.delta;
        }
        Some(removed.item)
    }

    /// Ticks until the head fires.
    pub(crate) fn head_delta(&self) -> Option<u64> {
        self.entries.front().map(|e| e.delta)
    }

    /// Pop the head if it fires within `budget` ticks. Returns its delta.
    pub(crate) fn pop_within(&mut self, budget: u64) -> Option<(u64, T)> {
        if self.entries.front()?.delta > budget {
            return None;
        }
        self.entries.pop_front().map(|e| (e.delta, e.item))
    }

    /// Let `ticks` elapse without firing anything; the head must be later.
    pub(crate) fn consume(&mut self, ticks: u64) {
        if let Some(head) = self.entries.front_mut() {
            head.delta = head.delta.saturating_sub(ticks);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn drain(&mut self) -> Vec<T> {
        self.entries.drain(..).map(|e| e.item).collect()
    }

    #[cfg(test)]
    fn deltas(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.delta).collect()
    }

    #[cfg(test)]
    fn ids(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.id).collect()
    }
}
