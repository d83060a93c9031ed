//! # Scheduler Module
//!
//! The request frontier shared by both drivers.
//!
//! ## Overview
//!
//! The `Scheduler` is a min-heap on `(priority, sequence)`: lower priorities run
//! first and requests of equal priority come out in the order they went in.
//! Every request that enters the queue is stamped with a fresh [`RequestId`].
//!
//! Before a request is admitted its deduplication key is checked against the
//! configured [`Dedup`] policy. Requests built with [`DedupKey::Skip`] bypass
//! the check entirely.
//!
//! The scheduler is a plain data structure. The sequential driver owns it; the
//! concurrent driver wraps it in a `parking_lot::Mutex` and never holds the lock
//! across an await point.
//!
//! [`DedupKey::Skip`]: crate::request::DedupKey::Skip

use crate::request::{NavigatingRequest, RequestId};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Decides whether a deduplication key should be admitted. Returns `true` to enqueue.
pub type DuplicateCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Duplicate detection applied at enqueue time.
#[derive(Clone, Default)]
pub enum Dedup {
    /// Every request is enqueued.
    #[default]
    Disabled,
    /// Keys seen earlier in this run are dropped.
    InMemory,
    /// A caller-supplied check, e.g. backed by a persistent store.
    Custom(DuplicateCheck),
}

impl Dedup {
    pub fn custom<F>(check: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Dedup::Custom(Arc::new(check))
    }
}

impl fmt::Debug for Dedup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dedup::Disabled => f.write_str("Disabled"),
            Dedup::InMemory => f.write_str("InMemory"),
            Dedup::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

struct Entry<R> {
    priority: i32,
    seq: u64,
    request: NavigatingRequest<R>,
}

impl<R> PartialEq for Entry<R> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<R> Eq for Entry<R> {}

impl<R> PartialOrd for Entry<R> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<R> Ord for Entry<R> {
    // Reversed: BinaryHeap is a max-heap.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct Scheduler<R> {
    heap: BinaryHeap<Entry<R>>,
    dedup: Dedup,
    seen: HashSet<String>,
    next_seq: u64,
    duplicates_dropped: usize,
}

impl<R> Scheduler<R> {
    pub fn new(dedup: Dedup) -> Self {
        Self {
            heap: BinaryHeap::new(),
            dedup,
            seen: HashSet::new(),
            next_seq: 0,
            duplicates_dropped: 0,
        }
    }

    /// Admits `request` unless the duplicate check rejects it.
    ///
    /// Returns the id assigned to the request, or `None` when it was dropped.
    pub fn enqueue(&mut self, mut request: NavigatingRequest<R>) -> Option<RequestId> {
        if let Some(key) = request.dedup_key() {
            if !self.admits(key) {
                self.duplicates_dropped += 1;
                trace!("Dropping duplicate request: {}", request.request().url());
                return None;
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let id = RequestId(seq);
        request.id = Some(id);
        trace!(
            "Enqueued request {} (priority {}): {}",
            id,
            request.priority(),
            request.request().url()
        );
        self.heap.push(Entry {
            priority: request.priority(),
            seq,
            request,
        });
        Some(id)
    }

    fn admits(&mut self, key: String) -> bool {
        match &self.dedup {
            Dedup::Disabled => true,
            Dedup::InMemory => self.seen.insert(key),
            Dedup::Custom(check) => check(&key),
        }
    }

    /// Removes the highest-priority request.
    pub fn pop(&mut self) -> Option<NavigatingRequest<R>> {
        self.heap.pop().map(|entry| entry.request)
    }

    /// Empties the queue without dispatching anything, returning how many were removed.
    pub fn drain(&mut self) -> usize {
        let drained = self.heap.len();
        self.heap.clear();
        drained
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn duplicates_dropped(&self) -> usize {
        self.duplicates_dropped
    }
}

impl<R> Default for Scheduler<R> {
    fn default() -> Self {
        Self::new(Dedup::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverError;
    use crate::request::{Continuation, DedupKey, Request};
    use crate::scraper::ParseOutput;

    fn nav(url: &str) -> NavigatingRequest<()> {
        let noop = Continuation::new("noop", |_r| Ok::<_, DriverError>(ParseOutput::new()));
        NavigatingRequest::new(Request::get(url).unwrap(), noop)
    }

    fn drain_urls(scheduler: &mut Scheduler<()>) -> Vec<String> {
        std::iter::from_fn(|| scheduler.pop())
            .map(|r| r.request().url().path().to_string())
            .collect()
    }

    #[test]
    fn lower_priority_first_then_fifo() {
        let mut scheduler = Scheduler::default();
        scheduler.enqueue(nav("https://example.com/a"));
        scheduler.enqueue(nav("https://example.com/b").with_priority(1));
        scheduler.enqueue(nav("https://example.com/c"));
        scheduler.enqueue(nav("https://example.com/d").with_priority(1));
        assert_eq!(drain_urls(&mut scheduler), vec!["/b", "/d", "/a", "/c"]);
    }

    #[test]
    fn ids_are_assigned_on_enqueue() {
        let mut scheduler = Scheduler::default();
        let first = scheduler.enqueue(nav("https://example.com/a")).unwrap();
        let second = scheduler.enqueue(nav("https://example.com/b")).unwrap();
        assert_ne!(first, second);
        assert_eq!(scheduler.pop().unwrap().id(), Some(first));
    }

    #[test]
    fn in_memory_dedup_drops_repeats_but_honors_skip() {
        let mut scheduler = Scheduler::new(Dedup::InMemory);
        assert!(scheduler.enqueue(nav("https://example.com/a")).is_some());
        assert!(scheduler.enqueue(nav("https://example.com/a")).is_none());
        assert!(scheduler
            .enqueue(nav("https://example.com/a").with_dedup_key(DedupKey::Skip))
            .is_some());
        assert_eq!(scheduler.len(), 2);
        assert_eq!(scheduler.duplicates_dropped(), 1);
    }

    #[test]
    fn custom_check_sees_custom_keys() {
        let mut scheduler = Scheduler::new(Dedup::custom(|key| key != "case-42"));
        let known = nav("https://example.com/a").with_dedup_key(DedupKey::Custom("case-42".into()));
        let fresh = nav("https://example.com/a").with_dedup_key(DedupKey::Custom("case-43".into()));
        assert!(scheduler.enqueue(known).is_none());
        assert!(scheduler.enqueue(fresh).is_some());
    }

    #[test]
    fn disabled_dedup_admits_everything_and_drain_counts() {
        let mut scheduler = Scheduler::default();
        for _ in 0..3 {
            scheduler.enqueue(nav("https://example.com/a"));
        }
        assert_eq!(scheduler.drain(), 3);
        assert!(scheduler.is_empty());
    }
}
