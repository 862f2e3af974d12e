use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use thiserror::Error;
use tracing::warn;

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::CmipError;

const CHUNK_SIZE: usize = 8 * 1024;
const PROGRESS_EVERY_BYTES: u64 = 16 * 1024 * 1024;

/// Failure during a single transfer attempt. Transient failures are worth
/// retrying; fatal ones abandon the download immediately.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("connection failed: {0}")]
    Transient(String),

    #[error("{0}")]
    Fatal(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Bounded retry with a fixed wait between attempts. Total attempts are
/// `1 + max_retries`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            wait: Duration::from_secs(5),
        }
    }
}

/// Runs `op` until it succeeds, fails fatally, or exhausts the policy.
/// Only transient errors are retried; the policy's wait elapses between
/// attempts. The attempt number (0-based) is passed to `op`.
pub fn retry<T, F>(policy: &RetryPolicy, mut op: F) -> Result<T, FetchError>
where
    F: FnMut(usize) -> Result<T, FetchError>,
{
    let mut attempt = 0;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                warn!(
                    "connection issue, retrying in {:?} (attempt {attempt}/{})",
                    policy.wait, policy.max_retries
                );
                thread::sleep(policy.wait);
            }
            Err(err) => return Err(err),
        }
    }
}

pub struct FetchResponse {
    pub content_length: Option<u64>,
    pub body: Box<dyn Read>,
}

/// Transport seam for streaming a URL, so tests can simulate connection
/// failures without a network.
pub trait FileTransport: Send + Sync {
    fn get(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, CmipError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cmip-dr/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CmipError::SearchHttp(err.to_string()))?,
        );
        // No overall timeout: large files stream for as long as they need.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| CmipError::SearchHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl FileTransport for HttpTransport {
    fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| classify_reqwest(&err))?;
        if !response.status().is_success() {
            return Err(FetchError::Fatal(format!(
                "server returned status {}",
                response.status().as_u16()
            )));
        }
        Ok(FetchResponse {
            content_length: response.content_length(),
            body: Box::new(response),
        })
    }
}

fn classify_reqwest(err: &reqwest::Error) -> FetchError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        FetchError::Transient(err.to_string())
    } else {
        FetchError::Fatal(err.to_string())
    }
}

fn classify_io(err: &std::io::Error) -> FetchError {
    match err.kind() {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::TimedOut => FetchError::Transient(err.to_string()),
        _ => FetchError::Fatal(err.to_string()),
    }
}

/// Streams remote files to disk with bounded retry on transient failures
/// and a size check against the declared content length.
pub struct Fetcher<T: FileTransport> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: FileTransport> Fetcher<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Downloads `url` to `destination`, returning the byte count written.
    /// On transient failure the whole transfer is retried per the policy;
    /// an abandoned transfer may leave a partial file on disk, which is
    /// reported before the error propagates.
    pub fn fetch(
        &self,
        url: &str,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<u64, FetchError> {
        sink.event(ProgressEvent {
            message: format!("downloading {}", destination.display()),
        });
        let result = retry(&self.policy, |_attempt| self.attempt(url, destination, sink));
        let (written, declared) = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                if let Ok(meta) = std::fs::metadata(destination) {
                    warn!(
                        "abandoning {}: {} bytes of partial data left on disk",
                        destination.display(),
                        meta.len()
                    );
                    sink.event(ProgressEvent {
                        message: format!(
                            "abandoned {} with {} bytes of partial data",
                            destination.display(),
                            meta.len()
                        ),
                    });
                }
                return Err(err);
            }
        };
        if let Some(expected) = declared {
            if expected != written {
                warn!(
                    "downloaded size {written} does not match declared content length {expected}"
                );
                sink.event(ProgressEvent {
                    message: format!(
                        "size mismatch for {}: got {written}, expected {expected}",
                        destination.display()
                    ),
                });
            }
        }
        Ok(written)
    }

    fn attempt(
        &self,
        url: &str,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<(u64, Option<u64>), FetchError> {
        let response = self.transport.get(url)?;
        let mut file = File::create(destination)
            .map_err(|err| FetchError::Fatal(format!("create {}: {err}", destination.display())))?;

        let mut body = response.body;
        let mut buffer = [0u8; CHUNK_SIZE];
        let mut written: u64 = 0;
        let mut next_report = PROGRESS_EVERY_BYTES;
        loop {
            let read = body.read(&mut buffer).map_err(|err| classify_io(&err))?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])
                .map_err(|err| FetchError::Fatal(err.to_string()))?;
            written += read as u64;
            if written >= next_report {
                sink.event(ProgressEvent {
                    message: format!("... {} bytes", written),
                });
                next_report += PROGRESS_EVERY_BYTES;
            }
        }
        Ok((written, response.content_length))
    }
}
