//! Shared run state for the drivers.
//!
//! `DriverState` counts the requests a concurrent run currently has in flight;
//! together with an empty queue it tells the workers when the run is over.
//! `StopSignal` is the cooperative cancellation flag handed to callers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct DriverState {
    /// Requests popped from the queue whose pipeline or continuation is still running.
    pub in_flight: AtomicUsize,
}

impl DriverState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn begin(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Cooperative stop flag. Clones share the same flag.
///
/// Once raised, drivers let in-flight work finish, dispatch nothing new, and
/// drain the remaining queue.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
