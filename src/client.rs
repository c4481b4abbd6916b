//! Resilient HTTP client shared by every worker.
//!
//! One pooled `reqwest::Client` carries the browser-like header set, the
//! connect/read timeouts and, optionally, a resolver that prefers IPv4.
//! Retries with exponential backoff happen here and nowhere else.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, PRAGMA,
    RETRY_AFTER, USER_AGENT,
};
use reqwest::{Client, Method, Response, StatusCode};
use tracing::{debug, warn};

use crate::error::FetchError;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connections kept per host, sized for the default worker count.
pub const POOL_SIZE: usize = 10;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

pub const FEED_ACCEPT: &str =
    "application/atom+xml,application/rss+xml,application/xml;q=0.9,text/xml;q=0.8,*/*;q=0.7";

const ACCEPT_LANGUAGE_VALUE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

/// Headers applied to every request unless a profile overrides them.
pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(FEED_ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE_VALUE));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AddressFamily {
    #[default]
    Any,
    /// Use only IPv4 results when a name resolves to at least one.
    PreferIpv4,
}

/// Keeps the IPv4 addresses of a lookup, or all of them when there are none.
pub fn prefer_ipv4(addrs: Vec<SocketAddr>) -> Vec<SocketAddr> {
    let v4: Vec<SocketAddr> = addrs.iter().copied().filter(SocketAddr::is_ipv4).collect();
    if v4.is_empty() {
        addrs
    } else {
        v4
    }
}

/// Resolver installed on a single client; other clients in the process
/// keep the system's default behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferIpv4Resolver;

impl Resolve for PreferIpv4Resolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        Box::pin(async move {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
                .await?
                .collect();
            let addrs: Addrs = Box::new(prefer_ipv4(addrs).into_iter());
            Ok::<Addrs, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

/// Retry budget and backoff schedule.
///
/// The schedule follows urllib3: the first retry is immediate, later ones
/// wait `backoff_factor * 2^(n-1)`, never more than `backoff_max`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub total: u32,
    pub connect: u32,
    pub read: u32,
    pub status: u32,
    pub backoff_factor: Duration,
    pub backoff_max: Duration,
    pub status_forcelist: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            total: 3,
            connect: 3,
            read: 3,
            status: 3,
            backoff_factor: Duration::from_millis(600),
            backoff_max: Duration::from_secs(120),
            status_forcelist: vec![403, 408, 425, 429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, consecutive_errors: u32) -> Duration {
        if consecutive_errors <= 1 {
            return Duration::ZERO;
        }
        let exponent = (consecutive_errors - 1).min(16) as i32;
        self.backoff_factor
            .mul_f64(2f64.powi(exponent))
            .min(self.backoff_max)
    }

    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.status_forcelist.contains(&status.as_u16())
    }

    /// Only idempotent methods are ever replayed.
    pub fn is_retryable_method(method: &Method) -> bool {
        *method == Method::GET || *method == Method::HEAD
    }

    /// `Retry-After` in whole seconds, honoured for 413/429/503.
    fn retry_after(&self, response: &Response) -> Option<Duration> {
        if !matches!(response.status().as_u16(), 413 | 429 | 503) {
            return None;
        }
        let secs: u64 = response
            .headers()
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()?;
        Some(Duration::from_secs(secs).min(self.backoff_max))
    }
}

#[derive(Debug, Clone, Copy)]
enum RetryCategory {
    Connect,
    Read,
    Status,
}

#[derive(Debug, Default)]
struct RetryCounts {
    total: u32,
    connect: u32,
    read: u32,
    status: u32,
}

impl RetryCounts {
    /// Records one more retry; false once any applicable budget is spent.
    fn bump(&mut self, category: RetryCategory, policy: &RetryPolicy) -> bool {
        let (used, limit) = match category {
            RetryCategory::Connect => (&mut self.connect, policy.connect),
            RetryCategory::Read => (&mut self.read, policy.read),
            RetryCategory::Status => (&mut self.status, policy.status),
        };
        if *used >= limit || self.total >= policy.total {
            return false;
        }
        *used += 1;
        self.total += 1;
        true
    }
}

/// Per-request header overrides and timeout.
#[derive(Debug, Clone, Default)]
pub struct RequestProfile {
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
}

impl RequestProfile {
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A primary request, and one fallback request issued after `delay` when
/// the caller rejects what the primary returned.
#[derive(Debug, Clone)]
pub struct TwoAttemptPolicy {
    pub primary: RequestProfile,
    pub fallback: RequestProfile,
    pub delay: Duration,
}

impl TwoAttemptPolicy {
    /// Default headers first, then `Accept: */*` after 0.6s.
    pub fn feed() -> Self {
        Self {
            primary: RequestProfile::default(),
            fallback: RequestProfile::default().with_header(ACCEPT, HeaderValue::from_static("*/*")),
            delay: Duration::from_millis(600),
        }
    }

    pub fn attempts(&self) -> [&RequestProfile; 2] {
        [&self.primary, &self.fallback]
    }
}

impl Default for TwoAttemptPolicy {
    fn default() -> Self {
        Self::feed()
    }
}

/// Pooled client; cheap to clone and safe to share between tasks.
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: Client,
    retry: RetryPolicy,
    family: AddressFamily,
}

impl FetchClient {
    pub fn new(family: AddressFamily) -> Result<Self, FetchError> {
        let mut builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .pool_max_idle_per_host(POOL_SIZE)
            .default_headers(default_headers());

        if family == AddressFamily::PreferIpv4 {
            builder = builder.dns_resolver(Arc::new(PreferIpv4Resolver));
        }

        let client = builder.build().map_err(FetchError::Client)?;

        Ok(Self {
            client,
            retry: RetryPolicy::default(),
            family,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn address_family(&self) -> AddressFamily {
        self.family
    }

    pub async fn get(&self, url: &str, profile: &RequestProfile) -> Result<Response, FetchError> {
        self.execute(Method::GET, url, profile).await
    }

    pub async fn head(&self, url: &str, profile: &RequestProfile) -> Result<Response, FetchError> {
        self.execute(Method::HEAD, url, profile).await
    }

    /// Sends a request, retrying idempotent methods on connection errors,
    /// read errors and force-listed statuses.
    ///
    /// When the status budget runs out the last response is returned as-is
    /// so the caller can classify it.
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        profile: &RequestProfile,
    ) -> Result<Response, FetchError> {
        let retryable = RetryPolicy::is_retryable_method(&method);
        let mut counts = RetryCounts::default();

        loop {
            let mut request = self
                .client
                .request(method.clone(), url)
                .headers(profile.headers.clone());
            if let Some(timeout) = profile.timeout {
                request = request.timeout(timeout);
            }

            let delay = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if !retryable
                        || !self.retry.is_retryable_status(status)
                        || !counts.bump(RetryCategory::Status, &self.retry)
                    {
                        return Ok(response);
                    }
                    let delay = self
                        .retry
                        .retry_after(&response)
                        .unwrap_or_else(|| self.retry.backoff(counts.total));
                    warn!(
                        "{} {} returned {}, retry {} in {:?}",
                        method, url, status, counts.total, delay
                    );
                    delay
                }
                Err(e) => {
                    if e.is_builder() || !retryable {
                        return Err(FetchError::Network {
                            url: url.to_string(),
                            source: e,
                        });
                    }
                    let category = if e.is_connect() {
                        RetryCategory::Connect
                    } else {
                        RetryCategory::Read
                    };
                    if !counts.bump(category, &self.retry) {
                        return Err(FetchError::Network {
                            url: url.to_string(),
                            source: e,
                        });
                    }
                    let delay = self.retry.backoff(counts.total);
                    warn!(
                        "{} {} failed ({}), retry {} in {:?}",
                        method, url, e, counts.total, delay
                    );
                    delay
                }
            };

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            } else {
                debug!("retrying {} immediately", url);
            }
        }
    }
}
