//! Sleep queue
//!
//! Blocked threads with a wake-up time, ordered by that time. The earliest
//! wake time is cached so the idle path can program the timer without
//! touching the list.

use super::queue::List;
use super::thread::{SleepLink, ThreadTable};
use super::types::ThreadId;
use crate::time::{Time, TIME_INFINITE};

pub struct SleepQueue {
    list: List<SleepLink>,
    timeout: Time,
}

impl SleepQueue {
    pub const fn new() -> Self {
        Self {
            list: List::new(),
            timeout: TIME_INFINITE,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Earliest wake time, or [`TIME_INFINITE`] when nobody sleeps
    #[inline]
    pub fn timeout(&self) -> Time {
        self.timeout
    }

    fn refresh_timeout(&mut self, threads: &ThreadTable) {
        self.timeout = self
            .list
            .head()
            .map_or(TIME_INFINITE, |head| threads[head].wake_time);
    }

    /// Queue `thread` by its `wake_time`, after any sleeper with the same
    /// wake time
    pub fn insert(&mut self, threads: &mut ThreadTable, thread: ThreadId) {
        self.list
            .insert_sorted(threads, thread, |node| node.wake_time);
        self.refresh_timeout(threads);
    }

    pub fn remove(&mut self, threads: &mut ThreadTable, thread: ThreadId) {
        self.list.remove(threads, thread);
        self.refresh_timeout(threads);
    }

    /// Pop the head if it is due at or before `limit`
    pub fn pop_expired(&mut self, threads: &mut ThreadTable, limit: Time) -> Option<ThreadId> {
        if self.timeout > limit {
            return None;
        }
        let head = self.list.pop_front(threads)?;
        self.refresh_timeout(threads);
        Some(head)
    }

    pub fn iter<'a>(&self, threads: &'a ThreadTable) -> impl Iterator<Item = ThreadId> + 'a {
        self.list.iter(threads)
    }
}
