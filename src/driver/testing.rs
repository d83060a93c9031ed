use crate::error::{DriverError, Result};
use crate::interceptor::Interceptor;
use crate::request::{Continuation, NavigatingRequest, Request};
use crate::response::Response;
use crate::scraper::{ParseOutput, Scraper};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fetches `https://example.com/list`, follows every whitespace-separated href
/// in its body and emits each item page's body as a record.
#[derive(Debug, Default)]
pub(crate) struct ListScraper;

impl Scraper for ListScraper {
    type Record = String;

    fn name(&self) -> &str {
        "list"
    }

    fn record_types(&self) -> &'static [&'static str] {
        &["item"]
    }

    fn entry(&self) -> Result<NavigatingRequest<String>> {
        let parse_item = Continuation::new("parse_item", |response: Response| {
            Ok::<_, DriverError>(ParseOutput::new().with_record(response.text().to_string()))
        });
        let parse_list = Continuation::new("parse_list", move |response: Response| {
            let mut output = ParseOutput::new();
            for href in response.text().split_whitespace() {
                output.add_request(response.follow(href, parse_item.clone())?);
            }
            Ok::<_, DriverError>(output)
        });
        Ok(NavigatingRequest::new(Request::get("https://example.com/list")?, parse_list))
    }
}

/// Pass-through interceptor that counts how often it is closed.
#[derive(Debug, Default)]
pub(crate) struct CloseCounter {
    closes: AtomicUsize,
}

impl CloseCounter {
    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Interceptor for CloseCounter {
    fn name(&self) -> &str {
        "close-counter"
    }

    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
