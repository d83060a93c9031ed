//! The per-request pipeline shared by both drivers.
//!
//! One call to [`Dispatcher::process`] covers everything that happens to a
//! single request: the interceptor chain (and fetch), archival for archive
//! requests, the continuation, and resolution of the requests it yields.

use crate::driver::archive::ArchiveFile;
use crate::driver::ArchiveHook;
use crate::error::{DriverError, FailureReport};
use crate::interceptor::{ChainError, InterceptorChain};
use crate::request::{NavigatingRequest, RequestKind};
use crate::response::Response;
use crate::stats::StatCollector;
use crate::transport::Transport;
use log::{debug, trace};
use std::path::PathBuf;
use std::sync::Arc;

/// What a successfully processed request produced.
pub(crate) struct Processed<R> {
    pub(crate) records: Vec<R>,
    pub(crate) requests: Vec<NavigatingRequest<R>>,
}

pub(crate) struct Dispatcher {
    pub(crate) chain: InterceptorChain,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) on_archive: ArchiveHook,
    pub(crate) storage_dir: PathBuf,
    pub(crate) stats: Arc<StatCollector>,
}

impl Dispatcher {
    pub(crate) async fn process<R>(
        &self,
        nav: &NavigatingRequest<R>,
    ) -> Result<Processed<R>, FailureReport> {
        let request = Arc::clone(nav.request());
        self.stats.increment_requests_dispatched();
        trace!(
            "Dispatching {} {} to '{}'",
            request.method(),
            request.url(),
            nav.continuation().name()
        );

        let outcome = self
            .chain
            .execute(Arc::clone(&request), self.transport.as_ref())
            .await
            .map_err(|ChainError { error, response }| FailureReport {
                request: Arc::clone(&request),
                error,
                response,
            })?;

        let mut response = outcome.response;
        self.stats.record_response(
            response.status().as_u16(),
            response.body().len(),
            outcome.short_circuited,
            response.is_from_cache(),
        );

        let fail = |error: DriverError, response: Response| FailureReport {
            request: Arc::clone(&request),
            error,
            response: Some(response),
        };

        if let RequestKind::Archive { expected_type } = nav.kind() {
            let stored = (self.on_archive)(&ArchiveFile {
                content: response.body(),
                url: request.url(),
                expected_type: expected_type.as_deref(),
                storage_dir: &self.storage_dir,
            });
            match stored {
                Ok(path) => {
                    debug!("Archived {} to {}", request.url(), path);
                    self.stats.increment_files_archived();
                    response = response.with_archived_path(path);
                }
                Err(e) => return Err(fail(e, response)),
            }
        }

        if !matches!(nav.kind(), RequestKind::Navigating) {
            let base = nav.location_after(&response);
            response = response.with_base(base);
        }

        let output = match nav.continuation().call(response.clone()) {
            Ok(output) => output,
            Err(e) => return Err(fail(e, response)),
        };

        let (records, children) = output.into_parts();
        let mut requests = Vec::with_capacity(children.len());
        for child in children {
            match child.resolve_from(&response, nav) {
                Ok(resolved) => requests.push(resolved),
                Err(e) => return Err(fail(e, response)),
            }
        }
        trace!(
            "Continuation '{}' produced {} records and {} requests",
            nav.continuation().name(),
            records.len(),
            requests.len()
        );
        Ok(Processed { records, requests })
    }
}
