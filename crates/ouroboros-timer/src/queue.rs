//! Array-backed binary min-heap ordered by deadline
//!
//! Positions are 1-based: the children of position `k` are `2k` and `2k + 1`
//! and its parent is `k / 2`. Position `k` is stored at `entries[k - 1]`.
//!
//! Equal deadlines are not ordered FIFO.

use std::time::Instant;

/// Initial backing-store capacity
pub const DEFAULT_CAPACITY: usize = 128;

/// Queue entry: an item and the instant it is due
#[derive(Debug, Clone)]
pub struct Scheduled<T> {
    pub when: Instant,
    pub item: T,
}

/// Min-heap of scheduled items
#[derive(Debug, Clone)]
pub struct TaskQueue<T> {
    entries: Vec<Scheduled<T>>,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an item and sift it up into place
    pub fn push(&mut self, when: Instant, item: T) {
        self.entries.push(Scheduled { when, item });
        let last = self.entries.len();
        self.fix_up(last);
    }

    /// The entry with the earliest deadline
    pub fn peek(&self) -> Option<&Scheduled<T>> {
        self.entries.first()
    }

    /// Entry at 1-based position `k`
    pub fn get(&self, k: usize) -> Option<&Scheduled<T>> {
        k.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    /// Remove and return the entry with the earliest deadline
    pub fn pop(&mut self) -> Option<Scheduled<T>> {
        if self.entries.is_empty() {
            return None;
        }
        // swap_remove moves the last entry into the root; the vacated slot is gone
        let min = self.entries.swap_remove(0);
        self.fix_down(1);
        Some(min)
    }

    /// Move the minimum to a later deadline and restore the heap.
    ///
    /// A later deadline can only push the root down, so a single sift-down
    /// suffices. No-op on an empty queue.
    pub fn reschedule_min(&mut self, when: Instant) {
        if let Some(root) = self.entries.first_mut() {
            debug_assert!(when >= root.when, "reschedule_min moved the deadline earlier");
            root.when = when;
            self.fix_down(1);
        }
    }

    /// Remove the entry at 1-based position `k` without repairing the heap.
    ///
    /// Callers batch these and finish with a single [`heapify`](Self::heapify).
    pub fn quick_remove(&mut self, k: usize) -> Option<Scheduled<T>> {
        if k == 0 || k > self.entries.len() {
            return None;
        }
        Some(self.entries.swap_remove(k - 1))
    }

    /// Re-establish the heap property over an arbitrarily ordered store
    pub fn heapify(&mut self) {
        for k in (1..=self.entries.len() / 2).rev() {
            self.fix_down(k);
        }
    }

    /// Remove every entry matching `pred`, then heapify once. Returns the
    /// removed entries so the caller decides where they are dropped.
    ///
    /// Scans from the last position back to the root so that `quick_remove`
    /// only ever moves an already-inspected entry into the hole.
    pub fn purge_where<F>(&mut self, mut pred: F) -> Vec<Scheduled<T>>
    where
        F: FnMut(&T) -> bool,
    {
        let mut removed = Vec::new();
        for k in (1..=self.entries.len()).rev() {
            if pred(&self.entries[k - 1].item) {
                removed.extend(self.quick_remove(k));
            }
        }
        if !removed.is_empty() {
            self.heapify();
        }
        removed
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove every entry and hand them back, leaving the queue empty
    pub fn take_all(&mut self) -> Vec<Scheduled<T>> {
        std::mem::take(&mut self.entries)
    }

    /// Iterate entries in storage order (not deadline order)
    pub fn iter(&self) -> impl Iterator<Item = &Scheduled<T>> {
        self.entries.iter()
    }

    fn deadline(&self, k: usize) -> Instant {
        self.entries[k - 1].when
    }

    fn fix_up(&mut self, mut k: usize) {
        while k > 1 {
            let parent = k >> 1;
            if self.deadline(parent) <= self.deadline(k) {
                break;
            }
            self.entries.swap(parent - 1, k - 1);
            k = parent;
        }
    }

    fn fix_down(&mut self, mut k: usize) {
        let size = self.entries.len();
        loop {
            let mut child = k << 1;
            if child > size {
                break;
            }
            // child indexes the smaller kid
            if child < size && self.deadline(child) > self.deadline(child + 1) {
                child += 1;
            }
            if self.deadline(k) <= self.deadline(child) {
                break;
            }
            self.entries.swap(k - 1, child - 1);
            k = child;
        }
    }

    #[cfg(test)]
    fn is_heap(&self) -> bool {
        (2..=self.entries.len()).all(|k| self.deadline(k >> 1) <= self.deadline(k))
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
