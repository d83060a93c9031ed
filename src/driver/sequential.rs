//! Single-task driver.
//!
//! Requests are processed strictly one after another in scheduler order, so a
//! run is fully deterministic for a deterministic scraper and transport.

use crate::driver::dispatch::{Dispatcher, Processed};
use crate::driver::{finish_run, report_failure, Hooks, RunStatus};
use crate::error::{FailureAction, Result};
use crate::request::{NavigatingRequest, Request};
use crate::scheduler::Scheduler;
use crate::scraper::Scraper;
use crate::state::StopSignal;
use crate::stats::StatCollector;
use std::sync::Arc;
use tracing::{error, info};

pub struct SequentialDriver<S: Scraper> {
    scraper: S,
    dispatcher: Dispatcher,
    scheduler: Scheduler<S::Record>,
    hooks: Hooks<S::Record>,
    stop: StopSignal,
    stats: Arc<StatCollector>,
}

impl<S: Scraper> SequentialDriver<S> {
    pub(crate) fn new(
        scraper: S,
        dispatcher: Dispatcher,
        scheduler: Scheduler<S::Record>,
        hooks: Hooks<S::Record>,
        stop: StopSignal,
    ) -> Self {
        let stats = Arc::clone(&dispatcher.stats);
        Self {
            scraper,
            dispatcher,
            scheduler,
            hooks,
            stop,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.stats)
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Requests still queued.
    pub fn pending(&self) -> usize {
        self.scheduler.len()
    }

    pub fn scraper(&self) -> &S {
        &self.scraper
    }

    /// Runs the scraper from its entry request until the queue is empty or the
    /// stop signal is raised.
    pub async fn run(&mut self) -> Result<RunStatus> {
        let name = self.scraper.name().to_string();
        info!(
            "Starting sequential run of '{}' (record types: {:?}, interceptors: {:?})",
            name,
            self.scraper.record_types(),
            self.dispatcher.chain.names()
        );
        self.hooks.run_started(&name);

        let run = self.drive().await;
        let result = finish_run(run, self.dispatcher.chain.close_all());

        match &result {
            Ok(status) => {
                info!("Run of '{}' {}.{}", name, status, self.stats);
                self.hooks.run_completed(&name, *status, None);
            }
            Err(e) => {
                error!("Run of '{}' failed: {}", name, e);
                self.hooks.run_completed(&name, RunStatus::Failed, Some(e));
            }
        }
        result
    }

    /// Runs the driver to completion on a fresh current-thread runtime.
    pub fn run_blocking(&mut self) -> Result<RunStatus> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run())
    }

    async fn drive(&mut self) -> Result<RunStatus> {
        let entry = self.scraper.entry()?;
        self.enqueue(entry);

        while let Some(nav) = self.next_request() {
            match self.dispatcher.process(&nav).await {
                Ok(Processed { records, requests }) => {
                    self.stats.increment_requests_succeeded();
                    for request in requests {
                        self.enqueue(request);
                    }
                    self.emit(records, nav.request());
                }
                Err(report) => {
                    self.stats.increment_requests_failed();
                    if report.error.is_process_fatal() {
                        return Err(report.error);
                    }
                    if report_failure(self.hooks.on_failure.as_mut(), &report) == FailureAction::Stop {
                        info!("Failure hook requested stop after {}", report.request.url());
                        self.stop.stop();
                    }
                }
            }
        }

        if self.stop.is_stopped() {
            let drained = self.scheduler.drain();
            self.stats.add_requests_drained(drained);
            info!("Stop requested; drained {} queued requests", drained);
            return Ok(RunStatus::Stopped);
        }
        Ok(RunStatus::Completed)
    }

    fn next_request(&mut self) -> Option<NavigatingRequest<S::Record>> {
        if self.stop.is_stopped() {
            return None;
        }
        self.scheduler.pop()
    }

    fn enqueue(&mut self, request: NavigatingRequest<S::Record>) {
        match self.scheduler.enqueue(request) {
            Some(_) => self.stats.increment_requests_enqueued(),
            None => self.stats.increment_duplicates_dropped(),
        }
    }

    fn emit(&mut self, records: Vec<S::Record>, request: &Arc<Request>) {
        for record in records {
            if self.hooks.deliver(record, request, &self.stats) == FailureAction::Stop {
                info!("Failure hook requested stop after invalid record from {}", request.url());
                self.stop.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DriverBuilder;
    use crate::driver::testing::{ListScraper, CloseCounter};
    use crate::error::{DriverError, FailureReport, Severity};
    use crate::interceptor::mock::MockInterceptor;
    use crate::interceptor::warc::WarcCaptureInterceptor;
    use crate::request::{Continuation, Request};
    use crate::scraper::ParseOutput;
    use crate::transport::testing::CountingTransport;
    use crate::transport::OfflineTransport;
    use http::StatusCode;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn list_and_items_yield_two_records() {
        let mock = Arc::new(
            MockInterceptor::new()
                .with_body("https://example.com/list", "/item/1 /item/2")
                .unwrap()
                .with_body("https://example.com/item/1", "first")
                .unwrap()
                .with_body("https://example.com/item/2", "second")
                .unwrap(),
        );
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&records);

        let mut driver = DriverBuilder::new(ListScraper::default())
            .add_shared_interceptor(mock.clone())
            .transport(OfflineTransport)
            .on_record(move |record| sink.lock().push(record))
            .build_sequential()
            .unwrap();

        let status = driver.run().await.unwrap();

        assert_eq!(status, RunStatus::Completed);
        assert_eq!(*records.lock(), vec!["first".to_string(), "second".to_string()]);
        assert_eq!(driver.pending(), 0);
        assert_eq!(mock.hits(), 3);
        let stats = driver.stats().snapshot();
        assert_eq!(stats.requests_succeeded, 3);
        assert_eq!(stats.responses_short_circuited, 3);
        assert_eq!(stats.records_emitted, 2);
    }

    #[tokio::test]
    async fn transport_failures_are_reported_and_the_run_continues() {
        let transport = CountingTransport::default()
            .route("https://example.com/list", StatusCode::OK, "/item/1 /item/2")
            .route("https://example.com/item/2", StatusCode::OK, "second");
        let records = Arc::new(Mutex::new(Vec::new()));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let (record_sink, failure_sink) = (Arc::clone(&records), Arc::clone(&failures));

        let mut driver = DriverBuilder::new(ListScraper::default())
            .transport(transport)
            .on_record(move |record| record_sink.lock().push(record))
            .on_failure(move |report: &FailureReport| {
                failure_sink.lock().push(report.request.url().path().to_string());
                FailureAction::Continue
            })
            .build_sequential()
            .unwrap();

        assert_eq!(driver.run().await.unwrap(), RunStatus::Completed);
        assert_eq!(*records.lock(), vec!["second".to_string()]);
        assert_eq!(*failures.lock(), vec!["/item/1".to_string()]);
    }

    #[tokio::test]
    async fn stop_from_the_failure_hook_drains_the_queue() {
        let transport = CountingTransport::default()
            .route("https://example.com/list", StatusCode::OK, "/item/1 /item/2 /item/3");
        let mut driver = DriverBuilder::new(ListScraper::default())
            .transport(transport)
            .on_failure(|_report: &FailureReport| FailureAction::Stop)
            .build_sequential()
            .unwrap();

        assert_eq!(driver.run().await.unwrap(), RunStatus::Stopped);
        assert_eq!(driver.pending(), 0);
        let stats = driver.stats().snapshot();
        assert_eq!(stats.requests_failed, 1);
        assert_eq!(stats.requests_drained, 2);
    }

    #[tokio::test]
    async fn archive_failures_halt_the_run_and_close_interceptors() {
        struct ArchiveScraper;

        impl Scraper for ArchiveScraper {
            type Record = String;

            fn entry(&self) -> Result<NavigatingRequest<String>> {
                let done = Continuation::new("done", |_r| Ok::<_, DriverError>(ParseOutput::new()));
                Ok(NavigatingRequest::archive(Request::get("https://example.com/doc.pdf")?, Some("pdf"), done))
            }
        }

        let counter = Arc::new(CloseCounter::default());
        let transport = CountingTransport::default().route("https://example.com/doc.pdf", StatusCode::OK, "%PDF");
        let completions = Arc::new(Mutex::new(Vec::new()));
        let completion_sink = Arc::clone(&completions);

        let mut driver = DriverBuilder::new(ArchiveScraper)
            .add_shared_interceptor(counter.clone())
            .transport(transport)
            .on_archive(|_file| Err(DriverError::archive("disk full")))
            .on_run_complete(move |name, status, error| {
                completion_sink.lock().push((name.to_string(), status, error.is_some()));
            })
            .build_sequential()
            .unwrap();

        let err = driver.run().await.unwrap_err();

        assert!(matches!(err, DriverError::Archive(_)));
        assert_eq!(counter.closes(), 1);
        let completions = completions.lock();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].1, RunStatus::Failed);
        assert!(completions[0].2);
    }

    fn two_items() -> MockInterceptor {
        MockInterceptor::new()
            .with_body("https://example.com/list", "/item/1 /item/2")
            .unwrap()
            .with_body("https://example.com/item/1", "first")
            .unwrap()
            .with_body("https://example.com/item/2", "")
            .unwrap()
    }

    fn non_empty(record: &String) -> Result<()> {
        if record.is_empty() {
            return Err(DriverError::invalid_data("record body is empty"));
        }
        Ok(())
    }

    #[tokio::test]
    async fn invalid_records_go_to_the_invalid_data_hook() {
        let records = Arc::new(Mutex::new(Vec::new()));
        let rejected = Arc::new(Mutex::new(Vec::new()));
        let (record_sink, rejected_sink) = (Arc::clone(&records), Arc::clone(&rejected));

        let mut driver = DriverBuilder::new(ListScraper::default())
            .add_interceptor(two_items())
            .transport(OfflineTransport)
            .validate_records(non_empty)
            .on_record(move |record| record_sink.lock().push(record))
            .on_invalid_data(move |record, error: &DriverError| {
                rejected_sink.lock().push((record, error.severity()));
            })
            .on_failure(|_report: &FailureReport| panic!("no request should fail"))
            .build_sequential()
            .unwrap();

        assert_eq!(driver.run().await.unwrap(), RunStatus::Completed);

        assert_eq!(*records.lock(), vec!["first".to_string()]);
        assert_eq!(*rejected.lock(), vec![(String::new(), Severity::RequestFatal)]);
        let stats = driver.stats().snapshot();
        assert_eq!(stats.records_emitted, 1);
        assert_eq!(stats.records_invalid, 1);
        assert_eq!(stats.requests_failed, 0);
    }

    #[tokio::test]
    async fn invalid_records_without_a_hook_are_reported_as_failures() {
        let records = Arc::new(Mutex::new(Vec::new()));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let (record_sink, failure_sink) = (Arc::clone(&records), Arc::clone(&failures));

        let mut driver = DriverBuilder::new(ListScraper::default())
            .add_interceptor(two_items())
            .transport(OfflineTransport)
            .validate_records(non_empty)
            .on_record(move |record| record_sink.lock().push(record))
            .on_failure(move |report: &FailureReport| {
                assert!(matches!(report.error, DriverError::InvalidData(_)));
                failure_sink.lock().push(report.request.url().path().to_string());
                FailureAction::Continue
            })
            .build_sequential()
            .unwrap();

        assert_eq!(driver.run().await.unwrap(), RunStatus::Completed);

        assert_eq!(*records.lock(), vec!["first".to_string()]);
        assert_eq!(*failures.lock(), vec!["/item/2".to_string()]);
    }

    #[tokio::test]
    async fn capture_write_failures_abort_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let capture = Arc::new(WarcCaptureInterceptor::create(dir.path().join("run.warc")).unwrap());
        capture.close().unwrap();
        let transport = CountingTransport::default().route("https://example.com/list", StatusCode::OK, "/item/1");
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&records);

        let mut driver = DriverBuilder::new(ListScraper::default())
            .add_shared_interceptor(capture.clone())
            .transport(transport)
            .on_record(move |record| sink.lock().push(record))
            .on_failure(|_report: &FailureReport| panic!("archive failures must not reach the failure hook"))
            .build_sequential()
            .unwrap();

        let err = driver.run().await.unwrap_err();

        assert!(matches!(err, DriverError::Archive(_)));
        assert!(records.lock().is_empty());
        assert_eq!(capture.records_written(), 0);
        let stats = driver.stats().snapshot();
        assert_eq!(stats.requests_failed, 1);
        assert_eq!(stats.requests_enqueued, 1);
    }

    #[tokio::test]
    async fn in_memory_dedup_drops_repeated_links() {
        let mock = MockInterceptor::new()
            .with_body("https://example.com/list", "/item/1 /item/1 /item/2")
            .unwrap()
            .with_body("https://example.com/item/1", "first")
            .unwrap()
            .with_body("https://example.com/item/2", "second")
            .unwrap();
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&records);

        let mut driver = DriverBuilder::new(ListScraper::default())
            .add_interceptor(mock)
            .transport(OfflineTransport)
            .dedup(crate::scheduler::Dedup::InMemory)
            .on_record(move |record| sink.lock().push(record))
            .build_sequential()
            .unwrap();

        driver.run().await.unwrap();

        assert_eq!(*records.lock(), vec!["first".to_string(), "second".to_string()]);
        assert_eq!(driver.stats().snapshot().duplicates_dropped, 1);
    }

    #[test]
    fn run_blocking_drives_to_completion() {
        let mock = MockInterceptor::new()
            .with_body("https://example.com/list", "")
            .unwrap();
        let mut driver = DriverBuilder::new(ListScraper::default())
            .add_interceptor(mock)
            .transport(OfflineTransport)
            .build_sequential()
            .unwrap();
        assert_eq!(driver.run_blocking().unwrap(), RunStatus::Completed);
    }
}
