//! WARC record and replay.
//!
//! [`WarcCaptureInterceptor`] appends every response passing through the chain
//! to a WARC/1.0 file as a `response` record whose payload is the raw HTTP
//! message (status line, headers, body). [`WarcCacheInterceptor`] loads such a
//! file up front and answers matching requests from it, so a recorded run can be
//! replayed without touching the network.
//!
//! Records are matched by request fingerprint (method, URL and body), stored in
//! the custom `X-Request-Fingerprint` header. Archives written by other tools
//! lack that header and are matched on method and URL alone.
//!
//! A path ending in `.gz` is written as one gzip member per record, the usual
//! `.warc.gz` layout, and read back with a multi-member decoder.

use crate::error::{DriverError, Result};
use crate::interceptor::{Interceptor, InterceptorAction};
use crate::request::{fingerprint, Request};
use crate::response::Response;
use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};
use url::Url;
use warc::{BufferedBody, Record, RecordBuilder, RecordType, WarcHeader, WarcReader, WarcWriter};

const HTTP_METHOD_HEADER: &str = "X-HTTP-Method";
const FINGERPRINT_HEADER: &str = "X-Request-Fingerprint";
const RESPONSE_CONTENT_TYPE: &str = "application/http; msgtype=response";

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

fn archive_error(path: &Path, what: &str, err: impl std::fmt::Display) -> DriverError {
    DriverError::archive(format!("{} {}: {}", what, path.display(), err))
}

struct CaptureSink {
    out: Option<BufWriter<File>>,
    records: usize,
}

/// Records every response into a WARC file.
pub struct WarcCaptureInterceptor {
    path: PathBuf,
    gzip: bool,
    sink: Mutex<CaptureSink>,
}

impl WarcCaptureInterceptor {
    /// Creates (or truncates) the archive at `path`, creating parent directories.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| archive_error(parent, "failed to create", e))?;
        }
        let file = File::create(&path).map_err(|e| archive_error(&path, "failed to open", e))?;
        info!("Opened WARC file for writing: {}", path.display());
        Ok(Self {
            gzip: is_gzip(&path),
            path,
            sink: Mutex::new(CaptureSink {
                out: Some(BufWriter::new(file)),
                records: 0,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_written(&self) -> usize {
        self.sink.lock().records
    }

    fn encode(&self, response: &Response, request: &Request) -> Result<Vec<u8>> {
        let record = RecordBuilder::default()
            .warc_type(RecordType::Response)
            .header(WarcHeader::TargetURI, response.url().as_str())
            .header(WarcHeader::ContentType, RESPONSE_CONTENT_TYPE)
            .header(
                WarcHeader::Unknown(HTTP_METHOD_HEADER.to_string()),
                request.method().as_str(),
            )
            .header(
                WarcHeader::Unknown(FINGERPRINT_HEADER.to_string()),
                request.fingerprint(),
            )
            .body(http_payload(response))
            .build()
            .map_err(|e| archive_error(&self.path, "failed to build record for", format!("{:?}", e)))?;

        let mut encoded = Vec::new();
        WarcWriter::new(&mut encoded)
            .write(&record)
            .map_err(|e| archive_error(&self.path, "failed to encode record for", e))?;
        Ok(encoded)
    }

    fn append(&self, encoded: &[u8]) -> Result<()> {
        let mut sink = self.sink.lock();
        let out = sink
            .out
            .as_mut()
            .ok_or_else(|| archive_error(&self.path, "write after close of", "archive is closed"))?;
        let written = if self.gzip {
            let mut member = GzEncoder::new(&mut *out, Compression::default());
            member.write_all(encoded).and_then(|_| member.finish().map(|_| ()))
        } else {
            out.write_all(encoded)
        };
        written.map_err(|e| archive_error(&self.path, "failed to write", e))?;
        sink.records += 1;
        Ok(())
    }

    /// Flushes and closes the archive. Further calls are no-ops.
    pub fn close(&self) -> Result<()> {
        let mut sink = self.sink.lock();
        let Some(mut out) = sink.out.take() else {
            return Ok(());
        };
        out.flush()
            .and_then(|_| out.get_ref().sync_all())
            .map_err(|e| archive_error(&self.path, "failed to flush", e))?;
        info!(
            "Closed WARC file {} after {} records",
            self.path.display(),
            sink.records
        );
        Ok(())
    }
}

#[async_trait]
impl Interceptor for WarcCaptureInterceptor {
    fn name(&self) -> &str {
        "warc-capture"
    }

    async fn modify_response(&self, response: Response, request: &Request) -> Result<Response> {
        let encoded = self.encode(&response, request)?;
        self.append(&encoded)?;
        debug!("Recorded response to WARC: {}", response.url());
        Ok(response)
    }

    fn close(&self) -> Result<()> {
        WarcCaptureInterceptor::close(self)
    }
}

impl Drop for WarcCaptureInterceptor {
    fn drop(&mut self) {
        if let Err(e) = WarcCaptureInterceptor::close(self) {
            error!("{}", e);
        }
    }
}

/// Serializes the HTTP message carried in a response record.
fn http_payload(response: &Response) -> Vec<u8> {
    let status = response.status();
    let mut payload = format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_str(),
        status.canonical_reason().unwrap_or("")
    )
    .into_bytes();
    for (name, value) in response.headers() {
        payload.extend_from_slice(name.as_str().as_bytes());
        payload.extend_from_slice(b": ");
        payload.extend_from_slice(value.as_bytes());
        payload.extend_from_slice(b"\r\n");
    }
    payload.extend_from_slice(b"\r\n");
    payload.extend_from_slice(response.body());
    payload
}

/// Parses the HTTP message of a response record. Header values are kept as raw
/// bytes, so obs-text such as Latin-1 filenames survives a round trip.
fn parse_http_payload(payload: &[u8]) -> std::result::Result<(StatusCode, HeaderMap, Bytes), String> {
    let split = payload
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or("payload has no header terminator")?;
    let body = Bytes::copy_from_slice(&payload[split + 4..]);

    let mut lines = payload[..split]
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line));
    let status_line = String::from_utf8_lossy(lines.next().unwrap_or_default()).into_owned();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| format!("malformed status line '{}'", status_line))?;

    let mut headers = HeaderMap::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| format!("malformed header line '{}'", String::from_utf8_lossy(line)))?;
        let name = HeaderName::from_bytes(line[..colon].trim_ascii()).map_err(|e| e.to_string())?;
        let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii_start()).map_err(|e| e.to_string())?;
        headers.append(name, value);
    }
    Ok((status, headers, body))
}

/// Answers requests from a previously captured WARC file.
pub struct WarcCacheInterceptor {
    path: PathBuf,
    cache: HashMap<String, Response>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl WarcCacheInterceptor {
    /// Loads every response record from `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(DriverError::configuration(format!(
                "WARC file not found: {}",
                path.display()
            )));
        }
        info!("Loading WARC cache from {}", path.display());
        let file = File::open(&path).map_err(|e| archive_error(&path, "failed to open", e))?;
        let cache = if is_gzip(&path) {
            load_records(&path, BufReader::new(MultiGzDecoder::new(file)))?
        } else {
            load_records(&path, BufReader::new(file))?
        };
        info!("Loaded {} responses from WARC cache", cache.len());
        Ok(Self {
            path,
            cache,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::SeqCst)
    }
}

fn load_records<R: BufRead>(path: &Path, reader: R) -> Result<HashMap<String, Response>> {
    let mut cache = HashMap::new();
    for record in WarcReader::new(reader).iter_records() {
        let record = record.map_err(|e| archive_error(path, "corrupt archive", e))?;
        if !matches!(record.warc_type(), RecordType::Response) {
            continue;
        }
        if let Some((key, response)) = replayable(&record).map_err(|e| archive_error(path, "corrupt record in", e))? {
            cache.insert(key, response);
        }
    }
    Ok(cache)
}

/// Looks up a non-standard header, which readers may have normalized to lowercase.
fn custom_header(record: &Record<BufferedBody>, name: &str) -> Option<String> {
    record
        .header(WarcHeader::Unknown(name.to_string()))
        .or_else(|| record.header(WarcHeader::Unknown(name.to_ascii_lowercase())))
        .map(|value| value.into_owned())
}

fn replayable(record: &Record<BufferedBody>) -> std::result::Result<Option<(String, Response)>, String> {
    let Some(target) = record.header(WarcHeader::TargetURI) else {
        return Ok(None);
    };
    let url = Url::parse(target.trim()).map_err(|e| e.to_string())?;
    let key = match custom_header(record, FINGERPRINT_HEADER) {
        Some(stored) => stored.trim().to_string(),
        None => {
            let method = custom_header(record, HTTP_METHOD_HEADER)
                .and_then(|m| Method::from_bytes(m.trim().as_bytes()).ok())
                .unwrap_or(Method::GET);
            fingerprint(&method, url.as_str(), &[])
        }
    };
    let (status, headers, body) = parse_http_payload(record.body())?;
    Ok(Some((key, Response::new(url, status, headers, body))))
}

#[async_trait]
impl Interceptor for WarcCacheInterceptor {
    fn name(&self) -> &str {
        "warc-cache"
    }

    async fn modify_request(&self, request: Request) -> Result<InterceptorAction> {
        match self.cache.get(&request.fingerprint()) {
            Some(cached) => {
                self.hits.fetch_add(1, Ordering::SeqCst);
                debug!("WARC cache hit for {}", request.url());
                let response = cached
                    .clone()
                    .with_request(Arc::new(request))
                    .with_from_cache(true);
                Ok(InterceptorAction::ShortCircuit(response))
            }
            None => {
                self.misses.fetch_add(1, Ordering::SeqCst);
                debug!("WARC cache miss for {}", request.url());
                Ok(InterceptorAction::Continue(request))
            }
        }
    }
}
