//! # Scraper Module
//!
//! Defines the contract between the drivers and site-specific scrapers.
//!
//! ## Overview
//!
//! A scraper supplies the first [`NavigatingRequest`] of a run. Every request
//! carries its own [`Continuation`](crate::request::Continuation), and each
//! continuation turns a response into a [`ParseOutput`]: an ordered sequence of
//! records to emit and further requests to fetch. The drivers never look inside
//! a continuation; they only honour this input/output contract.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_driver::prelude::*;
//!
//! struct ListScraper;
//!
//! impl Scraper for ListScraper {
//!     type Record = String;
//!
//!     fn record_types(&self) -> &'static [&'static str] {
//!         &["item"]
//!     }
//!
//!     fn entry(&self) -> Result<NavigatingRequest<String>, DriverError> {
//!         let parse_item = Continuation::new("parse_item", |response: Response| {
//!             Ok::<_, DriverError>(ParseOutput::new().with_record(response.text().to_string()))
//!         });
//!         let parse_list = Continuation::new("parse_list", move |response: Response| {
//!             let mut output = ParseOutput::new();
//!             for href in response.text().split_whitespace() {
//!                 output.add_request(response.follow(href, parse_item.clone())?);
//!             }
//!             Ok::<_, DriverError>(output)
//!         });
//!         Ok(NavigatingRequest::new(Request::get("https://example.com/list")?, parse_list))
//!     }
//! }
//! ```

use crate::error::Result;
use crate::request::NavigatingRequest;

/// One element produced by a continuation.
#[derive(Debug)]
pub enum ScraperYield<R> {
    Record(R),
    Request(NavigatingRequest<R>),
}

/// The ordered output of a single continuation invocation.
#[derive(Debug)]
pub struct ParseOutput<R> {
    yields: Vec<ScraperYield<R>>,
}

impl<R> Default for ParseOutput<R> {
    fn default() -> Self {
        Self { yields: Vec::new() }
    }
}

impl<R> ParseOutput<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self, record: R) {
        self.yields.push(ScraperYield::Record(record));
    }

    pub fn add_request(&mut self, request: NavigatingRequest<R>) {
        self.yields.push(ScraperYield::Request(request));
    }

    pub fn with_record(mut self, record: R) -> Self {
        self.add_record(record);
        self
    }

    pub fn with_request(mut self, request: NavigatingRequest<R>) -> Self {
        self.add_request(request);
        self
    }

    pub fn len(&self) -> usize {
        self.yields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.yields.is_empty()
    }

    /// Splits the output into records and requests, each in emission order.
    pub fn into_parts(self) -> (Vec<R>, Vec<NavigatingRequest<R>>) {
        let mut records = Vec::new();
        let mut requests = Vec::new();
        for item in self.yields {
            match item {
                ScraperYield::Record(record) => records.push(record),
                ScraperYield::Request(request) => requests.push(request),
            }
        }
        (records, requests)
    }
}

impl<R> IntoIterator for ParseOutput<R> {
    type Item = ScraperYield<R>;
    type IntoIter = std::vec::IntoIter<ScraperYield<R>>;

    fn into_iter(self) -> Self::IntoIter {
        self.yields.into_iter()
    }
}

impl<R> FromIterator<ScraperYield<R>> for ParseOutput<R> {
    fn from_iter<T: IntoIterator<Item = ScraperYield<R>>>(iter: T) -> Self {
        Self {
            yields: iter.into_iter().collect(),
        }
    }
}

/// Defines the contract for a scraper.
pub trait Scraper: Send + Sync + 'static {
    /// The type of record the scraper emits.
    type Record: Send + 'static;

    /// Name used in logs and run hooks.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Record kinds this scraper can emit. Reported, never interpreted.
    fn record_types(&self) -> &'static [&'static str] {
        &[]
    }

    /// Produces the first request of a run.
    fn entry(&self) -> Result<NavigatingRequest<Self::Record>>;
}
