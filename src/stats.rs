//! # Statistics Module
//!
//! Run-wide counters maintained by the drivers.
//!
//! ## Overview
//!
//! The `StatCollector` is shared by every worker of a run and updated with
//! atomic operations, so reading it never blocks the pipeline. A consistent
//! [`StatsSnapshot`] backs the `Display` report and the JSON export.
//!
//! ## Example
//!
//! ```rust,ignore
//! let stats = driver.stats();
//! driver.run().await?;
//! println!("{}", stats);
//! println!("{}", stats.to_json_string_pretty()?);
//! ```

use crate::error::DriverError;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// A point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests_enqueued: usize,
    pub requests_dispatched: usize,
    pub requests_succeeded: usize,
    pub requests_failed: usize,
    pub requests_drained: usize,
    pub duplicates_dropped: usize,
    pub responses_fetched: usize,
    pub responses_short_circuited: usize,
    pub responses_from_cache: usize,
    pub files_archived: usize,
    pub records_emitted: usize,
    pub records_invalid: usize,
    pub total_bytes: usize,
    pub status_counts: BTreeMap<u16, usize>,
    pub elapsed: Duration,
}

impl StatsSnapshot {
    fn requests_per_second(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.requests_dispatched as f64 / seconds
        } else {
            0.0
        }
    }

    fn formatted_bytes(&self) -> String {
        const KB: usize = 1024;
        const MB: usize = 1024 * KB;

        if self.total_bytes >= MB {
            format!("{:.2} MB", self.total_bytes as f64 / MB as f64)
        } else if self.total_bytes >= KB {
            format!("{:.2} KB", self.total_bytes as f64 / KB as f64)
        } else {
            format!("{} B", self.total_bytes)
        }
    }
}

#[derive(Debug)]
pub struct StatCollector {
    start_time: Instant,
    requests_enqueued: AtomicUsize,
    requests_dispatched: AtomicUsize,
    requests_succeeded: AtomicUsize,
    requests_failed: AtomicUsize,
    requests_drained: AtomicUsize,
    duplicates_dropped: AtomicUsize,
    responses_fetched: AtomicUsize,
    responses_short_circuited: AtomicUsize,
    responses_from_cache: AtomicUsize,
    files_archived: AtomicUsize,
    records_emitted: AtomicUsize,
    records_invalid: AtomicUsize,
    total_bytes: AtomicUsize,
    status_counts: DashMap<u16, usize>,
}

impl StatCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            requests_enqueued: AtomicUsize::new(0),
            requests_dispatched: AtomicUsize::new(0),
            requests_succeeded: AtomicUsize::new(0),
            requests_failed: AtomicUsize::new(0),
            requests_drained: AtomicUsize::new(0),
            duplicates_dropped: AtomicUsize::new(0),
            responses_fetched: AtomicUsize::new(0),
            responses_short_circuited: AtomicUsize::new(0),
            responses_from_cache: AtomicUsize::new(0),
            files_archived: AtomicUsize::new(0),
            records_emitted: AtomicUsize::new(0),
            records_invalid: AtomicUsize::new(0),
            total_bytes: AtomicUsize::new(0),
            status_counts: DashMap::new(),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let status_counts = self
            .status_counts
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        StatsSnapshot {
            requests_enqueued: self.requests_enqueued.load(Ordering::SeqCst),
            requests_dispatched: self.requests_dispatched.load(Ordering::SeqCst),
            requests_succeeded: self.requests_succeeded.load(Ordering::SeqCst),
            requests_failed: self.requests_failed.load(Ordering::SeqCst),
            requests_drained: self.requests_drained.load(Ordering::SeqCst),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::SeqCst),
            responses_fetched: self.responses_fetched.load(Ordering::SeqCst),
            responses_short_circuited: self.responses_short_circuited.load(Ordering::SeqCst),
            responses_from_cache: self.responses_from_cache.load(Ordering::SeqCst),
            files_archived: self.files_archived.load(Ordering::SeqCst),
            records_emitted: self.records_emitted.load(Ordering::SeqCst),
            records_invalid: self.records_invalid.load(Ordering::SeqCst),
            total_bytes: self.total_bytes.load(Ordering::SeqCst),
            status_counts,
            elapsed: self.start_time.elapsed(),
        }
    }

    pub(crate) fn increment_requests_enqueued(&self) {
        self.requests_enqueued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_dispatched(&self) {
        self.requests_dispatched.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_succeeded(&self) {
        self.requests_succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn add_requests_drained(&self, count: usize) {
        self.requests_drained.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn increment_duplicates_dropped(&self) {
        self.duplicates_dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_files_archived(&self) {
        self.files_archived.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_records_emitted(&self) {
        self.records_emitted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_records_invalid(&self) {
        self.records_invalid.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a response that made it through the chain.
    pub(crate) fn record_response(&self, status: u16, bytes: usize, short_circuited: bool, from_cache: bool) {
        if short_circuited {
            self.responses_short_circuited.fetch_add(1, Ordering::SeqCst);
        } else {
            self.responses_fetched.fetch_add(1, Ordering::SeqCst);
        }
        if from_cache {
            self.responses_from_cache.fetch_add(1, Ordering::SeqCst);
        }
        self.total_bytes.fetch_add(bytes, Ordering::SeqCst);
        *self.status_counts.entry(status).or_insert(0) += 1;
    }

    pub fn to_json_string(&self) -> Result<String, DriverError> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, DriverError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StatCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nRun Statistics")?;
        writeln!(f, "--------------")?;
        writeln!(
            f,
            "  duration : {:?} ({:.2} req/s)",
            snapshot.elapsed,
            snapshot.requests_per_second()
        )?;
        writeln!(
            f,
            "  requests : enqueued: {}, dispatched: {}, ok: {}, fail: {}, drained: {}, duplicate: {}",
            snapshot.requests_enqueued,
            snapshot.requests_dispatched,
            snapshot.requests_succeeded,
            snapshot.requests_failed,
            snapshot.requests_drained,
            snapshot.duplicates_dropped
        )?;
        writeln!(
            f,
            "  response : fetched: {}, short-circuited: {}, from_cache: {}, downloaded: {}",
            snapshot.responses_fetched,
            snapshot.responses_short_circuited,
            snapshot.responses_from_cache,
            snapshot.formatted_bytes()
        )?;
        writeln!(
            f,
            "  output   : records: {}, invalid: {}, archived files: {}",
            snapshot.records_emitted, snapshot.records_invalid, snapshot.files_archived
        )?;

        let status_string = if snapshot.status_counts.is_empty() {
            "none".to_string()
        } else {
            snapshot
                .status_counts
                .iter()
                .map(|(code, count)| format!("{}: {}", code, count))
                .collect::<Vec<String>>()
                .join(", ")
        };

        writeln!(f, "  status   : {}\n", status_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_are_split_by_origin() {
        let stats = StatCollector::new();
        stats.record_response(200, 10, false, false);
        stats.record_response(200, 5, true, true);
        stats.record_response(404, 0, false, false);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.responses_fetched, 2);
        assert_eq!(snapshot.responses_short_circuited, 1);
        assert_eq!(snapshot.responses_from_cache, 1);
        assert_eq!(snapshot.total_bytes, 15);
        assert_eq!(snapshot.status_counts[&200], 2);
        assert_eq!(snapshot.status_counts[&404], 1);
    }

    #[test]
    fn exports_json_and_text() {
        let stats = StatCollector::new();
        stats.increment_requests_enqueued();
        stats.add_requests_drained(3);

        let json: serde_json::Value = serde_json::from_str(&stats.to_json_string().unwrap()).unwrap();
        assert_eq!(json["requests_enqueued"], 1);
        assert_eq!(json["requests_drained"], 3);

        let text = stats.to_string();
        assert!(text.contains("drained: 3"));
        assert!(text.contains("status   : none"));
    }
}
