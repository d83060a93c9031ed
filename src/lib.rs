//! # spider-driver
//!
//! Request execution core for site scrapers.
//!
//! A scraper describes *what* to fetch and how to read it: a [`Scraper`] yields
//! the first [`NavigatingRequest`], and every request carries the
//! [`Continuation`] that turns its [`Response`] into records and further
//! requests. This crate decides *how* those requests run: through an ordered
//! chain of [`Interceptor`](interceptor::Interceptor)s (mocking, WARC capture and
//! replay, rate limiting, headers, logging), a [`Transport`](transport::Transport),
//! and either a [`SequentialDriver`] or a [`ConcurrentDriver`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_driver::prelude::*;
//!
//! async fn run() -> Result<(), DriverError> {
//!     let mut driver = DriverBuilder::new(MyScraper)
//!         .add_interceptor(WarcCaptureInterceptor::create("out/run.warc.gz")?)
//!         .add_interceptor(RateLimitInterceptor::new(RateLimitConfig::per_minute(60.0))?)
//!         .on_record(|record| println!("{:?}", record))
//!         .build_sequential()?;
//!
//!     driver.run().await?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod driver;
pub mod error;
pub mod interceptor;
pub mod prelude;
pub mod request;
pub mod response;
pub mod scheduler;
pub mod scraper;
pub mod state;
pub mod stats;
pub mod transport;

pub use builder::{DriverBuilder, DriverConfig};
pub use driver::{ConcurrentDriver, RunStatus, SequentialDriver};
pub use error::{DriverError, FailureAction, FailureReport, Result, Severity};
pub use request::{Continuation, NavigatingRequest, Request};
pub use response::Response;
pub use scheduler::{Dedup, Scheduler};
pub use scraper::{ParseOutput, Scraper};
pub use state::StopSignal;
pub use stats::StatCollector;

pub use async_trait::async_trait;
pub use tokio;
