//! Reusable numeric id pools
//!
//! Released ids go onto a bounded free list and are handed out again
//! before fresh ones. Used for row ids (per table) and listener ids.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub(crate) struct IdPool {
    next: u64,
    free: VecDeque<u64>,
    capacity: usize,
}

impl IdPool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            next: 0,
            free: VecDeque::new(),
            capacity,
        }
    }

    /// Take an id; `reuse` prefers a released one
    pub(crate) fn take(&mut self, reuse: bool) -> u64 {
        if reuse {
            if let Some(id) = self.free.pop_front() {
                return id;
            }
        }
        let id = self.next;
        self.next += 1;
        id
    }

    /// Return an id to the pool; dropped when the free list is full
    pub(crate) fn release(&mut self, id: u64) {
        if id < self.next && self.free.len() < self.capacity && !self.free.contains(&id) {
            self.free.push_back(id);
        }
    }

    /// Take a row id that does not collide with `exists`
    pub(crate) fn take_row_id(&mut self, reuse: bool, exists: impl Fn(&str) -> bool) -> String {
        loop {
            let id = self.take(reuse).to_string();
            if !exists(&id) {
                return id;
            }
        }
    }

    /// Release a row id if it is one this pool could have produced
    pub(crate) fn release_row_id(&mut self, row_id: &str) {
        let canonical = !row_id.is_empty()
            && row_id.bytes().all(|b| b.is_ascii_digit())
            && (row_id == "0" || !row_id.starts_with('0'));
        if canonical {
            if let Ok(id) = row_id.parse() {
                self.release(id);
            }
        }
    }
}
