//! Worker-pool driver.
//!
//! A fixed number of worker tasks share one scheduler. Each worker pops a
//! request, runs the whole per-request pipeline for it (interceptors, fetch,
//! archival, continuation) and enqueues the children before picking up the next
//! one, so a continuation never runs before the fetch that feeds it.
//!
//! Records and non-fatal failures are forwarded over a bounded channel to a
//! single sink that owns the `FnMut` hooks; hooks therefore never run
//! concurrently with themselves. The run is over once the queue is empty and no
//! worker holds a request.

use crate::driver::dispatch::{Dispatcher, Processed};
use crate::driver::{finish_run, report_failure, Hooks, RunStatus};
use crate::error::{DriverError, FailureAction, FailureReport, Result};
use crate::request::{NavigatingRequest, Request};
use crate::scheduler::Scheduler;
use crate::scraper::Scraper;
use crate::state::{DriverState, StopSignal};
use crate::stats::StatCollector;
use futures_util::future::join;
use kanal::{AsyncSender, bounded_async};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

enum Event<R> {
    Record(R, Arc<Request>),
    Failure(FailureReport),
}

/// State shared by every worker of a run.
struct Shared<R> {
    dispatcher: Dispatcher,
    scheduler: Mutex<Scheduler<R>>,
    state: Arc<DriverState>,
    notify: Notify,
    stop: StopSignal,
    fatal: Mutex<Option<DriverError>>,
    stats: Arc<StatCollector>,
}

impl<R> Shared<R> {
    fn enqueue_all(&self, requests: Vec<NavigatingRequest<R>>) {
        let mut scheduler = self.scheduler.lock();
        for request in requests {
            match scheduler.enqueue(request) {
                Some(_) => self.stats.increment_requests_enqueued(),
                None => self.stats.increment_duplicates_dropped(),
            }
        }
    }

    /// Records the first process-fatal error and stops every worker.
    fn halt(&self, error: DriverError) {
        {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(error);
            } else {
                debug!("Discarding subsequent fatal error: {}", error);
            }
        }
        self.stop.stop();
        self.notify.notify_waiters();
    }
}

pub struct ConcurrentDriver<S: Scraper> {
    scraper: S,
    shared: Arc<Shared<S::Record>>,
    hooks: Hooks<S::Record>,
    workers: usize,
    channel_capacity: usize,
}

impl<S: Scraper> ConcurrentDriver<S> {
    pub(crate) fn new(
        scraper: S,
        dispatcher: Dispatcher,
        scheduler: Scheduler<S::Record>,
        hooks: Hooks<S::Record>,
        stop: StopSignal,
        workers: usize,
        channel_capacity: usize,
    ) -> Self {
        let stats = Arc::clone(&dispatcher.stats);
        Self {
            scraper,
            shared: Arc::new(Shared {
                dispatcher,
                scheduler: Mutex::new(scheduler),
                state: DriverState::new(),
                notify: Notify::new(),
                stop,
                fatal: Mutex::new(None),
                stats,
            }),
            hooks,
            workers,
            channel_capacity,
        }
    }

    pub fn stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.shared.stats)
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.shared.stop.clone()
    }

    pub fn pending(&self) -> usize {
        self.shared.scheduler.lock().len()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn scraper(&self) -> &S {
        &self.scraper
    }

    /// Runs the scraper on the worker pool until the queue is exhausted, the
    /// stop signal is raised, or a process-fatal error occurs.
    pub async fn run(&mut self) -> Result<RunStatus> {
        let name = self.scraper.name().to_string();
        info!(
            "Starting concurrent run of '{}' with {} workers (record types: {:?}, interceptors: {:?})",
            name,
            self.workers,
            self.scraper.record_types(),
            self.shared.dispatcher.chain.names()
        );
        self.hooks.run_started(&name);

        let run = self.drive().await;
        let result = finish_run(run, self.shared.dispatcher.chain.close_all());

        match &result {
            Ok(status) => {
                info!("Run of '{}' {}.{}", name, status, self.shared.stats);
                self.hooks.run_completed(&name, *status, None);
            }
            Err(e) => {
                error!("Run of '{}' failed: {}", name, e);
                self.hooks.run_completed(&name, RunStatus::Failed, Some(e));
            }
        }
        result
    }

    async fn drive(&mut self) -> Result<RunStatus> {
        let entry = self.scraper.entry()?;
        self.shared.enqueue_all(vec![entry]);

        let (event_tx, event_rx) = bounded_async::<Event<S::Record>>(self.channel_capacity);
        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            workers.spawn(worker(id, Arc::clone(&self.shared), event_tx.clone()));
        }
        drop(event_tx);

        let shared = &self.shared;
        let hooks = &mut self.hooks;

        let sink = async {
            while let Ok(event) = event_rx.recv().await {
                match event {
                    Event::Record(record, request) => {
                        if hooks.deliver(record, &request, &shared.stats) == FailureAction::Stop {
                            info!("Failure hook requested stop after invalid record from {}", request.url());
                            shared.stop.stop();
                            shared.notify.notify_waiters();
                        }
                    }
                    Event::Failure(report) => {
                        if report_failure(hooks.on_failure.as_mut(), &report) == FailureAction::Stop {
                            info!("Failure hook requested stop after {}", report.request.url());
                            shared.stop.stop();
                            shared.notify.notify_waiters();
                        }
                    }
                }
            }
            trace!("Event sink closed");
        };

        let supervise = async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    error!("Worker task failed: {}", e);
                    shared.halt(DriverError::General(format!("worker task failed: {}", e)));
                }
            }
        };

        join(sink, supervise).await;

        let drained = self.shared.scheduler.lock().drain();
        if drained > 0 {
            self.shared.stats.add_requests_drained(drained);
            info!("Drained {} queued requests", drained);
        }

        if let Some(error) = self.shared.fatal.lock().take() {
            return Err(error);
        }
        if self.shared.stop.is_stopped() {
            Ok(RunStatus::Stopped)
        } else {
            Ok(RunStatus::Completed)
        }
    }
}

async fn worker<R: Send + 'static>(id: usize, shared: Arc<Shared<R>>, events: AsyncSender<Event<R>>) {
    trace!("Worker {} started", id);
    loop {
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let next = {
            let mut scheduler = shared.scheduler.lock();
            if shared.stop.is_stopped() {
                break;
            }
            match scheduler.pop() {
                Some(nav) => {
                    shared.state.begin();
                    Some(nav)
                }
                None if shared.state.in_flight() == 0 => {
                    shared.notify.notify_waiters();
                    break;
                }
                None => None,
            }
        };

        let Some(nav) = next else {
            notified.await;
            continue;
        };

        match shared.dispatcher.process(&nav).await {
            Ok(Processed { records, requests }) => {
                shared.stats.increment_requests_succeeded();
                shared.enqueue_all(requests);
                for record in records {
                    if events.send(Event::Record(record, Arc::clone(nav.request()))).await.is_err() {
                        warn!("Worker {}: record sink closed, dropping record", id);
                    }
                }
            }
            Err(report) => {
                shared.stats.increment_requests_failed();
                if report.error.is_process_fatal() {
                    error!("Worker {}: fatal failure on {}: {}", id, report.request.url(), report.error);
                    shared.halt(report.error);
                } else if events.send(Event::Failure(report)).await.is_err() {
                    warn!("Worker {}: failure sink closed, dropping report", id);
                }
            }
        }

        shared.state.finish();
        shared.notify.notify_waiters();
    }
    trace!("Worker {} exiting", id);
}
