//! # Builder Module
//!
//! Provides the `DriverBuilder`, a fluent API for assembling a scraper, its
//! interceptors, a transport and the run hooks into a [`SequentialDriver`] or a
//! [`ConcurrentDriver`].
//!
//! ## Overview
//!
//! Every setting has a default, so the smallest useful run is
//! `DriverBuilder::new(scraper).build_sequential()?`. Numeric settings can also
//! be loaded as a [`DriverConfig`] from JSON (or any serde format) and applied
//! with [`DriverBuilder::with_config`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_driver::prelude::*;
//!
//! let mut driver = DriverBuilder::new(MyScraper)
//!     .add_interceptor(WarcCacheInterceptor::open("cache/court.warc.gz")?)
//!     .add_interceptor(RateLimitInterceptor::new(RateLimitConfig::per_second(2.0).with_adaptive(true))?)
//!     .workers(8)
//!     .on_record(|record| println!("{:?}", record))
//!     .build_concurrent()?;
//!
//! driver.run().await?;
//! ```

use crate::driver::dispatch::Dispatcher;
use crate::driver::{ArchiveFile, ConcurrentDriver, Hooks, RunStatus, SequentialDriver};
use crate::error::{DriverError, FailureAction, FailureReport, Result};
use crate::interceptor::{Interceptor, InterceptorChain, StatusPolicy};
use crate::scheduler::{Dedup, Scheduler};
use crate::scraper::Scraper;
use crate::state::StopSignal;
use crate::stats::StatCollector;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Tunables shared by both drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Worker tasks used by the concurrent driver.
    pub workers: usize,
    /// Capacity of the channel carrying records and failures to the hooks.
    pub channel_capacity: usize,
    pub status_policy: StatusPolicy,
    /// Directory used by the default archive callback.
    pub storage_dir: PathBuf,
    /// Drop requests whose dedup key was already seen during the run.
    pub deduplicate: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            workers: num_cpus::get().clamp(4, 16),
            channel_capacity: 1000,
            status_policy: StatusPolicy::default(),
            storage_dir: std::env::temp_dir().join("spider_driver_files"),
            deduplicate: false,
        }
    }
}

impl DriverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(DriverError::configuration("workers must be greater than 0."));
        }
        if self.channel_capacity == 0 {
            return Err(DriverError::configuration("channel_capacity must be greater than 0."));
        }
        Ok(())
    }
}

pub struct DriverBuilder<S: Scraper> {
    scraper: S,
    config: DriverConfig,
    interceptors: Vec<Arc<dyn Interceptor>>,
    transport: Option<Arc<dyn Transport>>,
    dedup: Option<Dedup>,
    stop: StopSignal,
    hooks: Hooks<S::Record>,
}

impl<S: Scraper> DriverBuilder<S> {
    pub fn new(scraper: S) -> Self {
        Self {
            scraper,
            config: DriverConfig::default(),
            interceptors: Vec::new(),
            transport: None,
            dedup: None,
            stop: StopSignal::new(),
            hooks: Hooks::default(),
        }
    }

    /// Replaces every numeric setting with those in `config`.
    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the number of worker tasks for the concurrent driver.
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn status_policy(mut self, policy: StatusPolicy) -> Self {
        self.config.status_policy = policy;
        self
    }

    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = dir.into();
        self
    }

    /// Appends an interceptor. Request-phase order is registration order.
    pub fn add_interceptor<I: Interceptor>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Appends an interceptor the caller keeps a handle to, e.g. to read its
    /// counters after the run.
    pub fn add_shared_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Sets the transport used when no interceptor short-circuits.
    pub fn transport<T: Transport>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Overrides the duplicate check implied by `DriverConfig::deduplicate`.
    pub fn dedup(mut self, dedup: Dedup) -> Self {
        self.dedup = Some(dedup);
        self
    }

    /// Uses an existing stop signal, so the run can be stopped from outside.
    pub fn stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn on_record<F>(mut self, hook: F) -> Self
    where
        F: FnMut(S::Record) + Send + 'static,
    {
        self.hooks.on_record = Some(Box::new(hook));
        self
    }

    /// Checks every record before `on_record` sees it. An error rejects the
    /// record; it is reported as [`DriverError::InvalidData`].
    pub fn validate_records<F>(mut self, validator: F) -> Self
    where
        F: Fn(&S::Record) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.validator = Some(Arc::new(validator));
        self
    }

    /// Receives records rejected by the validator. Without it, rejections go to
    /// `on_failure`.
    pub fn on_invalid_data<F>(mut self, hook: F) -> Self
    where
        F: FnMut(S::Record, &DriverError) + Send + 'static,
    {
        self.hooks.on_invalid_data = Some(Box::new(hook));
        self
    }

    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&FailureReport) -> FailureAction + Send + 'static,
    {
        self.hooks.on_failure = Some(Box::new(hook));
        self
    }

    /// Replaces the default archive callback, which writes into `storage_dir`.
    pub fn on_archive<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ArchiveFile<'_>) -> Result<String> + Send + Sync + 'static,
    {
        self.hooks.on_archive = Arc::new(hook);
        self
    }

    pub fn on_run_start<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.hooks.on_run_start = Some(Box::new(hook));
        self
    }

    pub fn on_run_complete<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&str, RunStatus, Option<&DriverError>) + Send + 'static,
    {
        self.hooks.on_run_complete = Some(Box::new(hook));
        self
    }

    pub fn build_sequential(self) -> Result<SequentialDriver<S>> {
        let parts = self.into_parts()?;
        Ok(SequentialDriver::new(
            parts.scraper,
            parts.dispatcher,
            parts.scheduler,
            parts.hooks,
            parts.stop,
        ))
    }

    pub fn build_concurrent(self) -> Result<ConcurrentDriver<S>> {
        let parts = self.into_parts()?;
        Ok(ConcurrentDriver::new(
            parts.scraper,
            parts.dispatcher,
            parts.scheduler,
            parts.hooks,
            parts.stop,
            parts.config.workers,
            parts.config.channel_capacity,
        ))
    }

    fn into_parts(self) -> Result<Parts<S>> {
        self.config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };
        let dedup = self.dedup.unwrap_or(if self.config.deduplicate {
            Dedup::InMemory
        } else {
            Dedup::Disabled
        });
        debug!(
            "Building driver for '{}' with {} interceptors, dedup {:?}",
            self.scraper.name(),
            self.interceptors.len(),
            dedup
        );

        let dispatcher = Dispatcher {
            chain: InterceptorChain::new(self.interceptors, self.config.status_policy),
            transport,
            on_archive: Arc::clone(&self.hooks.on_archive),
            storage_dir: self.config.storage_dir.clone(),
            stats: Arc::new(StatCollector::new()),
        };

        Ok(Parts {
            scraper: self.scraper,
            dispatcher,
            scheduler: Scheduler::new(dedup),
            hooks: self.hooks,
            stop: self.stop,
            config: self.config,
        })
    }
}

struct Parts<S: Scraper> {
    scraper: S,
    dispatcher: Dispatcher,
    scheduler: Scheduler<S::Record>,
    hooks: Hooks<S::Record>,
    stop: StopSignal,
    config: DriverConfig,
}

#[cfg(feature = "reqwest-transport")]
fn default_transport() -> Result<Arc<dyn Transport>> {
    Ok(Arc::new(crate::transport::ReqwestTransport::new()?))
}

#[cfg(not(feature = "reqwest-transport"))]
fn default_transport() -> Result<Arc<dyn Transport>> {
    debug!("No transport configured and reqwest-transport is disabled; running offline");
    Ok(Arc::new(crate::transport::OfflineTransport))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::ListScraper;
    use crate::interceptor::StatusHandling;
    use crate::transport::OfflineTransport;

    #[test]
    fn config_loads_from_partial_json() {
        let config: DriverConfig = serde_json::from_str(
            r#"{"workers": 2, "deduplicate": true, "status_policy": {"client_errors": "recoverable"}}"#,
        )
        .unwrap();

        assert_eq!(config.workers, 2);
        assert!(config.deduplicate);
        assert_eq!(config.channel_capacity, 1000);
        assert_eq!(config.status_policy.client_errors, StatusHandling::Recoverable);
        assert_eq!(config.status_policy.server_errors, StatusHandling::Fatal);
    }

    #[test]
    fn zero_workers_or_capacity_is_rejected() {
        let err = DriverBuilder::new(ListScraper::default())
            .transport(OfflineTransport)
            .workers(0)
            .build_concurrent()
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::Configuration(_)));

        let err = DriverBuilder::new(ListScraper::default())
            .transport(OfflineTransport)
            .channel_capacity(0)
            .build_sequential()
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::Configuration(_)));
    }

    #[test]
    fn default_workers_fall_in_range() {
        let workers = DriverConfig::default().workers;
        assert!((4..=16).contains(&workers));
    }

    #[tokio::test]
    async fn external_stop_signal_is_honoured() {
        let stop = StopSignal::new();
        stop.stop();
        let mut driver = DriverBuilder::new(ListScraper::default())
            .transport(OfflineTransport)
            .stop_signal(stop)
            .build_sequential()
            .unwrap();

        assert_eq!(driver.run().await.unwrap(), RunStatus::Stopped);
        assert_eq!(driver.stats().snapshot().requests_dispatched, 0);
        assert_eq!(driver.stats().snapshot().requests_drained, 1);
    }
}
