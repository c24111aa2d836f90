//! Blocking HTTP transport with bounded retry on transient failures.
//!
//! Each worker owns its own client; connections are never shared across
//! threads. HTTP error statuses are not transport failures — the status
//! comes back with the body and the source decides what it means.

use std::fmt;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use thiserror::Error;
use tracing::{error, info, warn};

/// Retry budget and timing knobs, supplied from the environment.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Fixed sleep between attempts.
    pub retry_delay: Duration,
    /// Per-request timeout, independent of the retry count.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            retry_delay: Duration::from_secs(3),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Canned header sets; upstreams serve different shapes depending on
/// whether the caller looks like a page load or an XHR call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderProfile {
    Html,
    Json,
}

impl HeaderProfile {
    fn header_map(self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        match self {
            HeaderProfile::Html => {
                headers.insert(
                    ACCEPT,
                    HeaderValue::from_static(
                        "text/html,application/xhtml+xml,application/xml;\
                         q=0.9,image/webp,image/apng,*/*;q=0.8",
                    ),
                );
            }
            HeaderProfile::Json => {
                headers.insert(
                    ACCEPT,
                    HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
                );
                headers.insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/json; charset=UTF-8"),
                );
                headers.insert("x-requested-with", HeaderValue::from_static("XMLHttpRequest"));
            }
        }
        headers
    }
}

/// One logical request, URL template already substituted by the source.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderProfile,
    pub body: Option<String>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>, headers: HeaderProfile) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers,
            body: None,
        }
    }
}

/// Transport-level response: status plus fully read body.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub body: String,
}

/// Failure classes the transport retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Timeout,
    Connect,
    Truncated,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::Timeout => write!(f, "Timeout"),
            FailureClass::Connect => write!(f, "ConnectionError"),
            FailureClass::Truncated => write!(f, "TruncatedResponse"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{class} after {attempts} attempts: {url}")]
    Exhausted {
        class: FailureClass,
        url: String,
        attempts: u32,
    },
    /// Malformed request, bad URL and the like. Never retried.
    #[error("request could not be issued: {0}")]
    Request(#[from] reqwest::Error),
}

pub struct HttpTransport {
    client: Client,
    policy: RetryPolicy,
}

impl HttpTransport {
    pub fn new(policy: RetryPolicy) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 AppleWebKit/537.36 (KHTML, like Gecko)")
            .timeout(policy.timeout)
            .build()?;
        Ok(Self { client, policy })
    }

    /// Perform one logical request, absorbing up to `max_retries` transient
    /// failures. Log lines are fire-and-forget and never affect the result.
    pub fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse, TransportError> {
        info!("{}: {}", req.method, req.url);

        let mut class = FailureClass::Connect;
        for attempt in 0..=self.policy.max_retries {
            match self.send_once(req) {
                Ok(resp) => return Ok(resp),
                Err(e) if is_transient(&e) => class = classify(&e),
                Err(e) => return Err(TransportError::Request(e)),
            }
            if attempt != self.policy.max_retries {
                warn!("{}, retry {} >>> {}", class, attempt + 1, req.url);
                thread::sleep(self.policy.retry_delay);
            }
        }

        error!("{}, {}", class, req.url);
        Err(TransportError::Exhausted {
            class,
            url: req.url.clone(),
            attempts: self.policy.max_retries + 1,
        })
    }

    fn send_once(&self, req: &FetchRequest) -> Result<FetchResponse, reqwest::Error> {
        let mut builder = self
            .client
            .request(req.method.clone(), &req.url)
            .headers(req.headers.header_map());
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send()?;
        let status = resp.status();
        // a short read here counts as a transient failure of the whole request
        let body = resp.text()?;
        Ok(FetchResponse { status, body })
    }
}

fn is_transient(e: &reqwest::Error) -> bool {
    // everything except request construction problems is worth a retry:
    // timeouts, refused/reset connections, bodies cut off mid-read
    !(e.is_builder() || e.is_redirect())
}

fn classify(e: &reqwest::Error) -> FailureClass {
    if e.is_timeout() {
        FailureClass::Timeout
    } else if e.is_connect() {
        FailureClass::Connect
    } else {
        FailureClass::Truncated
    }
}
