//! Supervises one poller task per discovered log.

use super::cursor::CursorStore;
use super::extractor::EntryExtractor;
use super::pagination::PageSizePolicy;
use super::poller::{LogPoller, LogPollerParams, PollerExit, StartPosition};
use crate::log::client::LogClientFactory;
use crate::log::source::LogSource;
use crate::runtime::sink::NameSink;
use crate::runtime::telemetry::Telemetry;
use anyhow::{bail, Result};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct MonitorParams {
    pub factory: Arc<dyn LogClientFactory>,
    pub cursors: Arc<CursorStore>,
    pub page_sizes: PageSizePolicy,
    pub extractor: EntryExtractor,
    pub telemetry: Arc<Telemetry>,
    pub poll_interval: Duration,
    pub start: StartPosition,
}

/// Result of [`Monitor::start`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartReport {
    pub started: Vec<Arc<str>>,
    pub failed: Vec<Arc<str>>,
}

pub struct Monitor {
    factory: Arc<dyn LogClientFactory>,
    cursors: Arc<CursorStore>,
    page_sizes: PageSizePolicy,
    extractor: EntryExtractor,
    telemetry: Arc<Telemetry>,
    poll_interval: Duration,
    start: StartPosition,
    shutdown_root: CancellationToken,
    run_token: Option<CancellationToken>,
    pollers: Vec<(Arc<str>, JoinHandle<PollerExit>)>,
}

impl Monitor {
    /// Creates a monitor with its own root cancellation token.
    pub fn new(params: MonitorParams) -> Self {
        Self::with_cancellation_token(params, CancellationToken::new())
    }

    /// Creates a monitor whose pollers are cancelled together with `shutdown`.
    pub fn with_cancellation_token(params: MonitorParams, shutdown: CancellationToken) -> Self {
        let MonitorParams {
            factory,
            cursors,
            page_sizes,
            extractor,
            telemetry,
            poll_interval,
            start,
        } = params;

        Self {
            factory,
            cursors,
            page_sizes,
            extractor,
            telemetry,
            poll_interval,
            start,
            shutdown_root: shutdown,
            run_token: None,
            pollers: Vec::new(),
        }
    }

    pub fn cursors(&self) -> &Arc<CursorStore> {
        &self.cursors
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn is_running(&self) -> bool {
        self.run_token.is_some()
    }

    /// Log identifiers with a spawned poller.
    pub fn active_logs(&self) -> Vec<Arc<str>> {
        self.pollers.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Spawns one poller per source. A source whose client cannot be built is
    /// reported and skipped; the others still start. Each poller holds its
    /// own clone of `sink`, so the sink closes once every poller has stopped.
    pub fn start(&mut self, sources: &[LogSource], sink: NameSink) -> Result<StartReport> {
        if self.run_token.is_some() {
            bail!("monitor already running");
        }

        let run_token = self.shutdown_root.child_token();
        let mut report = StartReport::default();
        let mut seen = HashSet::new();

        for source in sources {
            let log_id = source.id();
            if !seen.insert(log_id.clone()) {
                tracing::debug!(log = %log_id, "skipping duplicate log source");
                continue;
            }

            let client = match self.factory.build(source) {
                Ok(client) => client,
                Err(err) => {
                    tracing::error!(log = %log_id, error = %err, "failed to create log client; skipping log");
                    self.telemetry.record_source_failed();
                    report.failed.push(log_id);
                    continue;
                }
            };

            let poller = LogPoller::new(LogPollerParams {
                log_id: log_id.clone(),
                client,
                cursors: self.cursors.clone(),
                page_size: self.page_sizes.page_size(&log_id),
                extractor: self.extractor,
                sink: sink.clone(),
                telemetry: self.telemetry.clone(),
                poll_interval: self.poll_interval,
                start: self.start,
                shutdown: run_token.child_token(),
            });
            self.pollers
                .push((log_id.clone(), tokio::spawn(poller.run())));
            report.started.push(log_id);
        }

        tracing::info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "log monitor started"
        );
        if report.started.is_empty() {
            tracing::warn!("no log pollers are running");
        }

        self.run_token = Some(run_token);
        Ok(report)
    }

    /// Cancels every poller and waits for them to exit.
    pub async fn stop(&mut self) -> Vec<(Arc<str>, PollerExit)> {
        let Some(run_token) = self.run_token.take() else {
            return Vec::new();
        };
        run_token.cancel();

        let (ids, handles): (Vec<_>, Vec<_>) = self.pollers.drain(..).unzip();
        let results = join_all(handles).await;

        let mut exits = Vec::with_capacity(ids.len());
        for (log_id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(exit) => exits.push((log_id, exit)),
                Err(err) => {
                    tracing::warn!(log = %log_id, error = %err, "log poller task terminated unexpectedly");
                }
            }
        }
        tracing::info!(stopped = exits.len(), "log monitor stopped");
        exits
    }
}
