use crate::log::discovery::DEFAULT_LOG_LIST_URL;
use crate::log::options::{LogClientOptions, DEFAULT_USER_AGENT};
use crate::processor::pagination::PageSizePolicy;
use crate::processor::poller::StartPosition;
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SINK_CAPACITY: usize = 1000;
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 1;
const DEFAULT_MAX_ATTEMPTS: usize = 1;

pub const ENV_LOG_LIST_URL: &str = "CTLATEST_LOG_LIST_URL";
pub const ENV_POLL_INTERVAL_SECS: &str = "CTLATEST_POLL_INTERVAL_SECS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "CTLATEST_REQUEST_TIMEOUT_SECS";
pub const ENV_SINK_CAPACITY: &str = "CTLATEST_SINK_CAPACITY";
pub const ENV_METRICS_INTERVAL_SECS: &str = "CTLATEST_METRICS_INTERVAL_SECS";
pub const ENV_FLUSH_INTERVAL_SECS: &str = "CTLATEST_FLUSH_INTERVAL_SECS";
pub const ENV_OUTPUT_DIR: &str = "CTLATEST_OUTPUT_DIR";
pub const ENV_PAGE_SIZES: &str = "CTLATEST_PAGE_SIZES";
pub const ENV_START_OFFSET: &str = "CTLATEST_START_OFFSET";
pub const ENV_INCLUDE_PRECERTS: &str = "CTLATEST_INCLUDE_PRECERTS";
pub const ENV_ACCEPT_INVALID_CERTS: &str = "CTLATEST_ACCEPT_INVALID_CERTS";
pub const ENV_USER_AGENT: &str = "CTLATEST_USER_AGENT";
pub const ENV_MAX_ATTEMPTS: &str = "CTLATEST_MAX_ATTEMPTS";

/// Runtime configuration for the log monitor.
///
/// All instances must be constructed via [`MonitorConfig::builder`], [`MonitorConfig::new`]
/// or [`MonitorConfig::from_env`] so invariants are validated before any consumer observes
/// the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    log_list_url: String,
    poll_interval: Duration,
    request_timeout: Duration,
    sink_capacity: usize,
    metrics_interval: Duration,
    flush_interval: Duration,
    output_dir: PathBuf,
    page_sizes: PageSizePolicy,
    start: StartPosition,
    include_precertificates: bool,
    accept_invalid_certs: bool,
    user_agent: String,
    max_attempts: usize,
}

pub struct MonitorConfigParams {
    pub log_list_url: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub sink_capacity: usize,
    pub metrics_interval: Duration,
    pub flush_interval: Duration,
    pub output_dir: PathBuf,
    pub page_sizes: PageSizePolicy,
    pub start: StartPosition,
    pub include_precertificates: bool,
    pub accept_invalid_certs: bool,
    pub user_agent: String,
    pub max_attempts: usize,
}

impl MonitorConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> MonitorConfigBuilder {
        MonitorConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: MonitorConfigParams) -> Result<Self> {
        let MonitorConfigParams {
            log_list_url,
            poll_interval,
            request_timeout,
            sink_capacity,
            metrics_interval,
            flush_interval,
            output_dir,
            page_sizes,
            start,
            include_precertificates,
            accept_invalid_certs,
            user_agent,
            max_attempts,
        } = params;

        let config = Self {
            log_list_url: trimmed_string(log_list_url),
            poll_interval,
            request_timeout,
            sink_capacity,
            metrics_interval,
            flush_interval,
            output_dir,
            page_sizes,
            start,
            include_precertificates,
            accept_invalid_certs,
            user_agent: trimmed_string(user_agent),
            max_attempts,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reads `CTLATEST_*` variables from the process environment. Unset or
    /// blank variables fall back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Same as [`MonitorConfig::from_env`] with an explicit variable lookup.
    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut builder = Self::builder();

        if let Some(url) = read(ENV_LOG_LIST_URL) {
            builder = builder.log_list_url(url);
        }
        if let Some(secs) = parse_var::<u64>(ENV_POLL_INTERVAL_SECS, read(ENV_POLL_INTERVAL_SECS))? {
            builder = builder.poll_interval(Duration::from_secs(secs));
        }
        if let Some(secs) =
            parse_var::<u64>(ENV_REQUEST_TIMEOUT_SECS, read(ENV_REQUEST_TIMEOUT_SECS))?
        {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }
        if let Some(capacity) = parse_var::<usize>(ENV_SINK_CAPACITY, read(ENV_SINK_CAPACITY))? {
            builder = builder.sink_capacity(capacity);
        }
        if let Some(secs) =
            parse_var::<u64>(ENV_METRICS_INTERVAL_SECS, read(ENV_METRICS_INTERVAL_SECS))?
        {
            builder = builder.metrics_interval(Duration::from_secs(secs));
        }
        if let Some(secs) =
            parse_var::<u64>(ENV_FLUSH_INTERVAL_SECS, read(ENV_FLUSH_INTERVAL_SECS))?
        {
            builder = builder.flush_interval(Duration::from_secs(secs));
        }
        if let Some(dir) = read(ENV_OUTPUT_DIR) {
            builder = builder.output_dir(PathBuf::from(dir.trim()));
        }
        if let Some(overrides) = read(ENV_PAGE_SIZES) {
            let policy = PageSizePolicy::with_overrides(&overrides)
                .with_context(|| format!("failed to parse {ENV_PAGE_SIZES}='{overrides}'"))?;
            builder = builder.page_sizes(policy);
        }
        if let Some(offset) = parse_var::<u64>(ENV_START_OFFSET, read(ENV_START_OFFSET))? {
            builder = builder.start(StartPosition::Offset(offset));
        }
        if let Some(flag) = parse_flag(ENV_INCLUDE_PRECERTS, read(ENV_INCLUDE_PRECERTS))? {
            builder = builder.include_precertificates(flag);
        }
        if let Some(flag) = parse_flag(ENV_ACCEPT_INVALID_CERTS, read(ENV_ACCEPT_INVALID_CERTS))? {
            builder = builder.accept_invalid_certs(flag);
        }
        if let Some(agent) = read(ENV_USER_AGENT) {
            builder = builder.user_agent(agent);
        }
        if let Some(attempts) = parse_var::<usize>(ENV_MAX_ATTEMPTS, read(ENV_MAX_ATTEMPTS))? {
            builder = builder.max_attempts(attempts);
        }

        builder.build()
    }

    /// URL of the JSON log list used for discovery.
    pub fn log_list_url(&self) -> &str {
        &self.log_list_url
    }

    /// Delay between the end of one tick and the start of the next.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Per-request timeout applied to the CT HTTP client.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Number of names buffered between pollers and the writer.
    pub fn sink_capacity(&self) -> usize {
        self.sink_capacity
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Directory receiving `latest-<unix>.txt`.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn page_sizes(&self) -> &PageSizePolicy {
        &self.page_sizes
    }

    pub fn start(&self) -> StartPosition {
        self.start
    }

    pub fn include_precertificates(&self) -> bool {
        self.include_precertificates
    }

    pub fn accept_invalid_certs(&self) -> bool {
        self.accept_invalid_certs
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// HTTP client options derived from this configuration.
    pub fn client_options(&self) -> LogClientOptions {
        LogClientOptions {
            request_timeout: self.request_timeout,
            user_agent: self.user_agent.clone(),
            max_attempts: self.max_attempts,
            accept_invalid_certs: self.accept_invalid_certs,
            ..LogClientOptions::default()
        }
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.log_list_url)?;
        ensure_not_empty(&self.user_agent, "user_agent")?;

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.sink_capacity == 0 {
            bail!("sink_capacity must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.flush_interval.is_zero() {
            bail!("flush_interval must be greater than 0");
        }

        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }

        if self.output_dir.as_os_str().is_empty() {
            bail!("output_dir cannot be empty");
        }

        self.page_sizes.validate()?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MonitorConfigBuilder {
    log_list_url: Option<String>,
    poll_interval: Option<Duration>,
    request_timeout: Option<Duration>,
    sink_capacity: Option<usize>,
    metrics_interval: Option<Duration>,
    flush_interval: Option<Duration>,
    output_dir: Option<PathBuf>,
    page_sizes: Option<PageSizePolicy>,
    start: Option<StartPosition>,
    include_precertificates: Option<bool>,
    accept_invalid_certs: Option<bool>,
    user_agent: Option<String>,
    max_attempts: Option<usize>,
}

impl MonitorConfigBuilder {
    pub fn log_list_url(mut self, url: impl Into<String>) -> Self {
        self.log_list_url = Some(url.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = Some(capacity);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn page_sizes(mut self, policy: PageSizePolicy) -> Self {
        self.page_sizes = Some(policy);
        self
    }

    pub fn start(mut self, start: StartPosition) -> Self {
        self.start = Some(start);
        self
    }

    pub fn include_precertificates(mut self, include: bool) -> Self {
        self.include_precertificates = Some(include);
        self
    }

    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = Some(accept);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn build(self) -> Result<MonitorConfig> {
        let params = MonitorConfigParams {
            log_list_url: self
                .log_list_url
                .unwrap_or_else(|| DEFAULT_LOG_LIST_URL.to_owned()),
            poll_interval: self
                .poll_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)),
            request_timeout: self
                .request_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            sink_capacity: self.sink_capacity.unwrap_or(DEFAULT_SINK_CAPACITY),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            flush_interval: self
                .flush_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS)),
            output_dir: self.output_dir.unwrap_or_else(|| PathBuf::from(".")),
            page_sizes: self.page_sizes.unwrap_or_default(),
            start: self.start.unwrap_or_default(),
            include_precertificates: self.include_precertificates.unwrap_or(false),
            accept_invalid_certs: self.accept_invalid_certs.unwrap_or(false),
            user_agent: self
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned()),
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
        };

        MonitorConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("log_list_url must start with http:// or https://");
    }
    Ok(())
}

fn parse_var<T>(key: &str, value: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("failed to parse {key}='{value}'"))
        })
        .transpose()
}

fn parse_flag(key: &str, value: Option<String>) -> Result<Option<bool>> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => bail!("failed to parse {key}='{value}' as a boolean"),
    }
}
