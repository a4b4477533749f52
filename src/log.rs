//! Certificate Transparency log plumbing: source identity, discovery, the
//! RFC 6962 HTTP client, entry decoding, and request metrics.

pub mod client;
pub mod discovery;
pub mod entry;
pub mod metrics;
pub mod options;
pub mod source;

pub use client::{HttpLogClient, HttpLogClientFactory, LogClient, LogClientError, LogClientFactory};
pub use entry::LogEntry;
pub use metrics::ClientMetricsSnapshot;
pub use options::LogClientOptions;
pub use source::LogSource;
