//! # Driver Module
//!
//! Drivers own a run: they pull requests from the [`Scheduler`], push each one
//! through the interceptor chain and transport, hand the response to the
//! request's continuation, and route what comes back. Records go to the
//! `on_record` hook; new requests are resolved against their parent and
//! enqueued.
//!
//! ## Drivers
//!
//! - [`SequentialDriver`]: one request at a time on a single task. Deterministic
//!   and the easiest to debug.
//! - [`ConcurrentDriver`]: a fixed pool of worker tasks sharing the queue. A
//!   continuation always runs after the fetch that produced its input, on the
//!   worker that performed it.
//!
//! ## Failures
//!
//! Every failure is classified by [`DriverError::severity`]. Recoverable and
//! request-fatal failures end only the affected request and are reported to the
//! `on_failure` hook, which decides whether the run continues. Process-fatal
//! failures halt the run and are returned to the caller. Interceptors are closed
//! on every exit path.
//!
//! ## Record validation
//!
//! A validator installed with `DriverBuilder::validate_records` checks each
//! record before it reaches `on_record`. Rejected records go to
//! `on_invalid_data`; without that hook they are reported to `on_failure` as a
//! request-fatal [`DriverError::InvalidData`] and dropped.
//!
//! [`Scheduler`]: crate::scheduler::Scheduler

use crate::error::{DriverError, FailureAction, FailureReport, Result};
use crate::request::Request;
use crate::stats::StatCollector;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

pub mod archive;
pub mod concurrent;
pub(crate) mod dispatch;
pub mod sequential;
#[cfg(test)]
pub(crate) mod testing;

pub use archive::{ArchiveFile, store_in_directory};
pub use concurrent::ConcurrentDriver;
pub use sequential::SequentialDriver;

/// Receives every record emitted by a continuation.
pub type RecordHook<R> = Box<dyn FnMut(R) + Send>;
/// Inspects a request-level failure and decides whether the run goes on.
pub type FailureHook = Box<dyn FnMut(&FailureReport) -> FailureAction + Send>;
/// Persists a file fetched by an archive request, returning where it was stored.
pub type ArchiveHook = Arc<dyn Fn(&ArchiveFile<'_>) -> Result<String> + Send + Sync>;
/// Checks a record before it is delivered.
pub type RecordValidator<R> = Arc<dyn Fn(&R) -> Result<()> + Send + Sync>;
/// Receives a record the validator rejected, along with the reason.
pub type InvalidDataHook<R> = Box<dyn FnMut(R, &DriverError) + Send>;
pub type RunStartHook = Box<dyn FnMut(&str) + Send>;
pub type RunCompleteHook = Box<dyn FnMut(&str, RunStatus, Option<&DriverError>) + Send>;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The queue emptied.
    Completed,
    /// The stop signal was raised; the remaining queue was drained.
    Stopped,
    /// A process-fatal error halted the run.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::Completed => "completed",
            RunStatus::Stopped => "stopped",
            RunStatus::Failed => "failed",
        })
    }
}

/// Callbacks wired into a driver by the builder.
pub struct Hooks<R> {
    pub(crate) on_record: Option<RecordHook<R>>,
    pub(crate) validator: Option<RecordValidator<R>>,
    pub(crate) on_invalid_data: Option<InvalidDataHook<R>>,
    pub(crate) on_failure: Option<FailureHook>,
    pub(crate) on_archive: ArchiveHook,
    pub(crate) on_run_start: Option<RunStartHook>,
    pub(crate) on_run_complete: Option<RunCompleteHook>,
}

impl<R> Default for Hooks<R> {
    fn default() -> Self {
        Self {
            on_record: None,
            validator: None,
            on_invalid_data: None,
            on_failure: None,
            on_archive: Arc::new(store_in_directory),
            on_run_start: None,
            on_run_complete: None,
        }
    }
}

impl<R> Hooks<R> {
    pub(crate) fn run_started(&mut self, name: &str) {
        if let Some(hook) = self.on_run_start.as_mut() {
            hook(name);
        }
    }

    /// Validates and delivers one record emitted while processing `request`.
    pub(crate) fn deliver(&mut self, record: R, request: &Arc<Request>, stats: &StatCollector) -> FailureAction {
        match validate(self.validator.as_ref(), record) {
            Ok(record) => {
                stats.increment_records_emitted();
                match self.on_record.as_mut() {
                    Some(hook) => hook(record),
                    None => trace!("Record emitted with no on_record hook installed"),
                }
                FailureAction::Continue
            }
            Err((record, error)) => {
                stats.increment_records_invalid();
                match self.on_invalid_data.as_mut() {
                    Some(hook) => {
                        hook(record, &error);
                        FailureAction::Continue
                    }
                    None => report_failure(
                        self.on_failure.as_mut(),
                        &FailureReport {
                            request: Arc::clone(request),
                            error,
                            response: None,
                        },
                    ),
                }
            }
        }
    }

    pub(crate) fn run_completed(&mut self, name: &str, status: RunStatus, error: Option<&DriverError>) {
        if let Some(hook) = self.on_run_complete.as_mut() {
            hook(name, status, error);
        }
    }
}

/// Hands a non-fatal failure to the hook; without one, logs it and continues.
pub(crate) fn report_failure(hook: Option<&mut FailureHook>, report: &FailureReport) -> FailureAction {
    match hook {
        Some(hook) => hook(report),
        None => {
            warn!(
                "Request {} {} failed ({:?}): {}",
                report.request.method(),
                report.request.url(),
                report.severity(),
                report.error
            );
            FailureAction::Continue
        }
    }
}

fn validate<R>(validator: Option<&RecordValidator<R>>, record: R) -> std::result::Result<R, (R, DriverError)> {
    let Some(validator) = validator else {
        return Ok(record);
    };
    match validator(&record) {
        Ok(()) => Ok(record),
        Err(error @ DriverError::InvalidData(_)) => Err((record, error)),
        Err(other) => Err((record, DriverError::invalid_data(other.to_string()))),
    }
}

/// Combines the run result with the outcome of closing the interceptors.
pub(crate) fn finish_run(run: Result<RunStatus>, closed: Result<()>) -> Result<RunStatus> {
    match (run, closed) {
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e),
        (Ok(status), Ok(())) => Ok(status),
    }
}
