pub mod log;
pub mod processor;
pub mod runtime;

pub use log::{
    HttpLogClient, HttpLogClientFactory, LogClient, LogClientError, LogClientFactory,
    LogClientOptions, LogEntry, LogSource,
};
pub use processor::cursor::CursorStore;
pub use processor::extractor::{EntryExtractor, HarvestedName};
pub use processor::monitor::{Monitor, MonitorParams, StartReport};
pub use processor::pagination::{pages, Page, PageSizePolicy};
pub use processor::poller::{LogPoller, LogPollerParams, PollerExit, StartPosition, TickOutcome};
pub use runtime::config::{MonitorConfig, MonitorConfigBuilder, MonitorConfigParams};
pub use runtime::runner::{RunSummary, Runner};
pub use runtime::sink::{NameSink, SinkClosed};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
