//! Polling loop for a single CT log.
//!
//! A poller first establishes a baseline cursor, then on every tick reads a
//! fresh tree head, walks the unread range page by page, forwards the
//! extracted names in index order, and advances the shared cursor only after
//! a page has been fully forwarded. Failures end the current tick; the next
//! tick resumes from the last completed page.

use super::cursor::CursorStore;
use super::extractor::EntryExtractor;
use super::pagination::{pages, Page};
use crate::log::client::{LogClient, LogClientError};
use crate::runtime::sink::{NameSink, SinkClosed};
use crate::runtime::telemetry::Telemetry;
use anyhow::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Where a poller starts when no cursor exists for its log yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartPosition {
    /// Only entries appended after start-up are harvested.
    #[default]
    Head,
    /// Start at this index, clamped to the tree head.
    Offset(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Baseline cursor established; nothing was fetched.
    Initialized { cursor: u64 },
    /// Tree head did not move past the cursor.
    UpToDate,
    /// Every page in `[from, to)` was forwarded.
    Advanced { from: u64, to: u64 },
    /// A fetch failed; the cursor stays at the last completed page.
    Interrupted { cursor: u64 },
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerExit {
    Cancelled,
    SinkClosed,
}

pub struct LogPollerParams {
    pub log_id: Arc<str>,
    pub client: Arc<dyn LogClient>,
    pub cursors: Arc<CursorStore>,
    pub page_size: u64,
    pub extractor: EntryExtractor,
    pub sink: NameSink,
    pub telemetry: Arc<Telemetry>,
    pub poll_interval: Duration,
    pub start: StartPosition,
    pub shutdown: CancellationToken,
}

pub struct LogPoller {
    log_id: Arc<str>,
    client: Arc<dyn LogClient>,
    cursors: Arc<CursorStore>,
    page_size: u64,
    extractor: EntryExtractor,
    sink: NameSink,
    telemetry: Arc<Telemetry>,
    poll_interval: Duration,
    start: StartPosition,
    shutdown: CancellationToken,
    initialized: bool,
}

enum Fetch<T> {
    Done(T),
    Failed(Error),
    Cancelled,
}

impl LogPoller {
    pub fn new(params: LogPollerParams) -> Self {
        let LogPollerParams {
            log_id,
            client,
            cursors,
            page_size,
            extractor,
            sink,
            telemetry,
            poll_interval,
            start,
            shutdown,
        } = params;

        Self {
            log_id,
            client,
            cursors,
            page_size: page_size.max(1),
            extractor,
            sink,
            telemetry,
            poll_interval,
            start,
            shutdown,
            initialized: false,
        }
    }

    pub fn log_id(&self) -> &Arc<str> {
        &self.log_id
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Runs ticks until cancelled or until the sink closes. The first tick
    /// runs immediately; each later one waits a full interval after the
    /// previous tick finished.
    pub async fn run(mut self) -> PollerExit {
        tracing::info!(
            log = %self.log_id,
            page_size = self.page_size,
            interval_ms = self.poll_interval.as_millis() as u64,
            "log poller started"
        );
        self.telemetry.poller_started();

        let exit = loop {
            match self.tick().await {
                Ok(TickOutcome::Cancelled) => break PollerExit::Cancelled,
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(log = %self.log_id, error = %err, "log poller stopping");
                    break PollerExit::SinkClosed;
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break PollerExit::Cancelled,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        };

        self.telemetry.poller_stopped();
        tracing::info!(log = %self.log_id, exit = ?exit, "log poller stopped");
        exit
    }

    /// Performs one polling step. Transient failures are logged and reported
    /// as [`TickOutcome::Interrupted`]; only a closed sink is an error.
    pub async fn tick(&mut self) -> Result<TickOutcome, SinkClosed> {
        if self.shutdown.is_cancelled() {
            return Ok(TickOutcome::Cancelled);
        }
        if !self.initialized {
            return Ok(self.establish_baseline().await);
        }

        let cursor = self.cursors.get(&self.log_id);
        let tree_size = match self.fetch_tree_size().await {
            Fetch::Done(tree_size) => tree_size,
            Fetch::Cancelled => return Ok(TickOutcome::Cancelled),
            Fetch::Failed(err) => {
                tracing::warn!(log = %self.log_id, cursor, error = %err, "failed to fetch tree head");
                return Ok(TickOutcome::Interrupted { cursor });
            }
        };

        if tree_size < cursor {
            tracing::warn!(log = %self.log_id, cursor, tree_size, "tree head is behind cursor");
            return Ok(TickOutcome::UpToDate);
        }
        if tree_size == cursor {
            tracing::trace!(log = %self.log_id, cursor, "log is up to date");
            return Ok(TickOutcome::UpToDate);
        }

        let mut completed = cursor;
        for page in pages(cursor, tree_size, self.page_size) {
            match self.process_page(page).await? {
                Some(TickOutcome::Cancelled) => return Ok(TickOutcome::Cancelled),
                Some(_) => return Ok(TickOutcome::Interrupted { cursor: completed }),
                None => {
                    self.cursors.set(&self.log_id, page.end);
                    completed = page.end;
                }
            }
        }

        tracing::debug!(log = %self.log_id, from = cursor, to = completed, "log advanced");
        Ok(TickOutcome::Advanced {
            from: cursor,
            to: completed,
        })
    }

    async fn establish_baseline(&mut self) -> TickOutcome {
        if let Some(cursor) = self.cursors.try_get(&self.log_id) {
            self.initialized = true;
            tracing::info!(log = %self.log_id, cursor, "resuming from stored cursor");
            return TickOutcome::Initialized { cursor };
        }

        let tree_size = match self.fetch_tree_size().await {
            Fetch::Done(tree_size) => tree_size,
            Fetch::Cancelled => return TickOutcome::Cancelled,
            Fetch::Failed(err) => {
                tracing::warn!(log = %self.log_id, error = %err, "failed to establish baseline; retrying next tick");
                return TickOutcome::Interrupted { cursor: 0 };
            }
        };

        let cursor = match self.start {
            StartPosition::Head => tree_size,
            StartPosition::Offset(offset) => offset.min(tree_size),
        };
        self.cursors.set(&self.log_id, cursor);
        self.initialized = true;
        tracing::info!(log = %self.log_id, cursor, tree_size, "baseline established");
        TickOutcome::Initialized { cursor }
    }

    /// Fetches and forwards one page. `None` means the page was fully
    /// forwarded; `Some` carries the outcome that ends the tick.
    async fn process_page(&self, page: Page) -> Result<Option<TickOutcome>, SinkClosed> {
        tracing::debug!(log = %self.log_id, start = page.start, end = page.end, "fetching page");

        let fetched = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(Some(TickOutcome::Cancelled)),
            fetched = self.client.get_entries(page.start, page.end) => fetched,
        };

        let entries = match fetched {
            Ok(entries) if entries.len() as u64 == page.len() => entries,
            Ok(entries) => {
                let err = LogClientError::EntryCountMismatch {
                    start: page.start,
                    end: page.end,
                    received: entries.len(),
                };
                self.telemetry.record_page_error(false);
                tracing::warn!(log = %self.log_id, start = page.start, end = page.end, error = %err, "failed to fetch page");
                return Ok(Some(TickOutcome::Interrupted { cursor: page.start }));
            }
            Err(err) => {
                self.telemetry.record_page_error(is_timeout(&err));
                tracing::warn!(log = %self.log_id, start = page.start, end = page.end, error = %err, "failed to fetch page");
                return Ok(Some(TickOutcome::Interrupted { cursor: page.start }));
            }
        };
        self.telemetry.record_page_fetched();

        for entry in &entries {
            self.telemetry.record_entries_processed(1);
            let Some(harvested) = self.extractor.extract(&self.log_id, entry) else {
                self.telemetry.record_entry_skipped();
                continue;
            };

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(Some(TickOutcome::Cancelled)),
                sent = self.sink.send(harvested) => sent?,
            }
            self.telemetry.record_name_emitted();
        }

        Ok(None)
    }

    async fn fetch_tree_size(&self) -> Fetch<u64> {
        let fetched = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Fetch::Cancelled,
            fetched = self.client.tree_size() => fetched,
        };

        match fetched {
            Ok(tree_size) => {
                self.telemetry.record_head_fetched();
                Fetch::Done(tree_size)
            }
            Err(err) => {
                self.telemetry.record_head_error(is_timeout(&err));
                Fetch::Failed(err)
            }
        }
    }
}

fn is_timeout(err: &Error) -> bool {
    matches!(
        err.downcast_ref::<LogClientError>(),
        Some(LogClientError::Timeout { .. })
    )
}
