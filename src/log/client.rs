//! RFC 6962 client used by the pollers. Houses the `LogClient` and
//! `LogClientFactory` seams, their `reqwest`-backed implementations, and the
//! typed errors callers can downcast to.

use crate::log::entry::LogEntry;
use crate::log::metrics::{ClientMetrics, ClientMetricsSnapshot};
use crate::log::options::LogClientOptions;
use crate::log::source::LogSource;
use anyhow::{anyhow, bail, Context, Result};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::{fmt, sync::Arc};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use x509_parser::prelude::{FromDer, SubjectPublicKeyInfo};

const GET_STH: &str = "get-sth";
const GET_ENTRIES: &str = "get-entries";

#[derive(Debug)]
pub enum LogClientError {
    Timeout { endpoint: &'static str },
    Status { endpoint: &'static str, status: u16 },
    TreeSizeOverflow { tree_size: u64 },
    EntryCountMismatch { start: u64, end: u64, received: usize },
}

impl fmt::Display for LogClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogClientError::Timeout { endpoint } => write!(f, "{endpoint} request timed out"),
            LogClientError::Status { endpoint, status } => {
                write!(f, "{endpoint} returned HTTP status {status}")
            }
            LogClientError::TreeSizeOverflow { tree_size } => {
                write!(f, "tree size {tree_size} does not fit in a signed 64-bit integer")
            }
            LogClientError::EntryCountMismatch {
                start,
                end,
                received,
            } => write!(
                f,
                "requested entries [{start}, {end}) but received {received}"
            ),
        }
    }
}

impl std::error::Error for LogClientError {}

impl LogClientError {
    fn is_retryable(&self) -> bool {
        match self {
            LogClientError::Timeout { .. } => true,
            LogClientError::Status { status, .. } => *status == 429 || *status >= 500,
            LogClientError::TreeSizeOverflow { .. } => false,
            LogClientError::EntryCountMismatch { .. } => true,
        }
    }
}

/// Access handle for one log. Ranges are half-open: `get_entries(0, 32)`
/// returns entries `0..32`.
pub trait LogClient: Send + Sync {
    fn tree_size(&self) -> BoxFuture<'_, Result<u64>>;

    fn get_entries(&self, start: u64, end: u64) -> BoxFuture<'_, Result<Vec<LogEntry>>>;
}

/// Builds a client for a discovered source. Failures are scoped to that
/// source only.
pub trait LogClientFactory: Send + Sync {
    fn build(&self, source: &LogSource) -> Result<Arc<dyn LogClient>>;
}

/// Parsed `get-sth` response. Signatures are carried but never verified.
#[derive(Debug, Clone, Deserialize)]
pub struct SignedTreeHead {
    pub tree_size: u64,
    pub timestamp: u64,
    #[serde(default)]
    pub sha256_root_hash: String,
    #[serde(default)]
    pub tree_head_signature: String,
}

#[derive(Debug, Deserialize)]
struct GetEntriesResponse {
    entries: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    leaf_input: String,
    #[serde(default)]
    extra_data: String,
}

#[derive(Debug, Clone)]
pub struct HttpLogClient {
    base_url: Arc<str>,
    http: reqwest::Client,
    options: LogClientOptions,
    metrics: Arc<ClientMetrics>,
}

impl LogClient for HttpLogClient {
    fn tree_size(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.fetch_tree_size())
    }

    fn get_entries(&self, start: u64, end: u64) -> BoxFuture<'_, Result<Vec<LogEntry>>> {
        Box::pin(self.fetch_entries(start, end))
    }
}

impl HttpLogClient {
    pub fn new(source: &LogSource, options: LogClientOptions) -> Result<Self> {
        let http = build_http_client(&options)?;
        Self::with_http_client(source, http, options)
    }

    /// Builds a client that shares an existing connection pool.
    pub fn with_http_client(
        source: &LogSource,
        http: reqwest::Client,
        options: LogClientOptions,
    ) -> Result<Self> {
        options.validate()?;
        validate_public_key(source)?;

        Ok(Self {
            base_url: source.id(),
            http,
            options,
            metrics: Arc::new(ClientMetrics::default()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    pub fn metrics(&self) -> ClientMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn get_sth(&self) -> Result<SignedTreeHead> {
        let url = format!("{}ct/v1/{GET_STH}", self.base_url);
        self.get_json(GET_STH, &url).await
    }

    /// Current tree size; values beyond `i64::MAX` are rejected.
    pub async fn fetch_tree_size(&self) -> Result<u64> {
        let head = self.get_sth().await?;
        if i64::try_from(head.tree_size).is_err() {
            return Err(LogClientError::TreeSizeOverflow {
                tree_size: head.tree_size,
            }
            .into());
        }
        tracing::trace!(log = %self.base_url, tree_size = head.tree_size, "fetched tree head");
        Ok(head.tree_size)
    }

    /// Fetches `[start, end)`. The wire protocol uses an inclusive end, so the
    /// request carries `end - 1`. The log may return fewer entries than asked.
    pub async fn fetch_entries(&self, start: u64, end: u64) -> Result<Vec<LogEntry>> {
        if end < start {
            bail!("invalid entry range [{start}, {end})");
        }
        if end == start {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}ct/v1/{GET_ENTRIES}?start={start}&end={}",
            self.base_url,
            end - 1
        );
        let response: GetEntriesResponse = self.get_json(GET_ENTRIES, &url).await?;
        let entries = response
            .entries
            .iter()
            .zip(start..)
            .map(|(raw, index)| LogEntry::from_encoded(index, &raw.leaf_input, &raw.extra_data))
            .collect::<Vec<_>>();

        tracing::trace!(
            log = %self.base_url,
            start,
            end,
            received = entries.len(),
            "fetched entries"
        );
        Ok(entries)
    }

    /// Issues the request up to `max_attempts` times. Only retryable
    /// failures are repeated; the delay doubles up to `max_backoff`.
    async fn get_json<T>(&self, endpoint: &'static str, url: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let mut attempt = 1;
        let mut delay = self.options.initial_backoff;

        loop {
            let err = match self.get_json_once::<T>(endpoint, url).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if attempt >= self.options.max_attempts || !is_retryable(&err) {
                return Err(err);
            }

            tracing::debug!(
                log = %self.base_url,
                endpoint,
                attempt,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "CT request failed; retrying"
            );
            sleep(delay).await;
            delay = next_delay(delay, self.options.max_backoff);
            attempt += 1;
        }
    }

    async fn get_json_once<T>(&self, endpoint: &'static str, url: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let start = Instant::now();
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(err) => return Err(self.record_transport_error(endpoint, start, err)),
        };

        let status = response.status();
        if !status.is_success() {
            self.metrics.record_failure(start.elapsed());
            return Err(LogClientError::Status {
                endpoint,
                status: status.as_u16(),
            }
            .into());
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => return Err(self.record_transport_error(endpoint, start, err)),
        };

        match serde_json::from_slice::<T>(&body) {
            Ok(value) => {
                self.metrics.record_success(start.elapsed());
                Ok(value)
            }
            Err(err) => {
                self.metrics.record_failure(start.elapsed());
                Err(anyhow!(err).context(format!("failed to decode {endpoint} response")))
            }
        }
    }

    fn record_transport_error(
        &self,
        endpoint: &'static str,
        start: Instant,
        err: reqwest::Error,
    ) -> anyhow::Error {
        if err.is_timeout() {
            self.metrics.record_timeout(start.elapsed());
            return LogClientError::Timeout { endpoint }.into();
        }
        self.metrics.record_failure(start.elapsed());
        anyhow!(err).context(format!("{endpoint} request failed"))
    }
}

/// Factory that hands every source a client sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpLogClientFactory {
    http: reqwest::Client,
    options: LogClientOptions,
}

impl HttpLogClientFactory {
    pub fn new(options: LogClientOptions) -> Result<Self> {
        options.validate()?;
        let http = build_http_client(&options)?;
        Ok(Self { http, options })
    }

    /// Shared HTTP client, also used for log-list discovery.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn options(&self) -> &LogClientOptions {
        &self.options
    }
}

impl LogClientFactory for HttpLogClientFactory {
    fn build(&self, source: &LogSource) -> Result<Arc<dyn LogClient>> {
        let client = HttpLogClient::with_http_client(source, self.http.clone(), self.options.clone())
            .with_context(|| format!("failed to build client for {source}"))?;
        Ok(Arc::new(client))
    }
}

fn build_http_client(options: &LogClientOptions) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(options.request_timeout)
        .user_agent(options.user_agent.clone())
        .pool_idle_timeout(options.pool_idle_timeout)
        .pool_max_idle_per_host(options.pool_max_idle_per_host)
        .danger_accept_invalid_certs(options.accept_invalid_certs)
        .build()
        .context("failed to build HTTP client")
}

/// Transport and decode failures are retried; typed errors decide for
/// themselves.
fn is_retryable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<LogClientError>()
        .map(LogClientError::is_retryable)
        .unwrap_or(true)
}

fn next_delay(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Rejects keys that are not a DER `SubjectPublicKeyInfo`. The key is not
/// used for signature checks.
fn validate_public_key(source: &LogSource) -> Result<()> {
    let key = source.public_key();
    if key.is_empty() {
        bail!("log {source} has an empty public key");
    }
    let (rest, _) = SubjectPublicKeyInfo::from_der(key)
        .map_err(|err| anyhow!("log {source} has a malformed public key: {err}"))?;
    if !rest.is_empty() {
        bail!(
            "log {source} public key has {} trailing bytes",
            rest.len()
        );
    }
    Ok(())
}
