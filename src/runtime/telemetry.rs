use crate::runtime::sink::NameSink;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(30);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Process-wide counters shared by every poller.
#[derive(Default, Debug)]
pub struct Telemetry {
    heads_fetched: AtomicU64,
    head_errors: AtomicU64,
    pages_fetched: AtomicU64,
    page_errors: AtomicU64,
    request_timeouts: AtomicU64,
    entries_processed: AtomicU64,
    entries_skipped: AtomicU64,
    names_emitted: AtomicU64,
    sources_failed: AtomicU64,
    active_pollers: AtomicUsize,
}

impl Telemetry {
    pub fn record_head_fetched(&self) {
        self.heads_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_head_error(&self, timed_out: bool) {
        self.head_errors.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.request_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_page_fetched(&self) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page_error(&self, timed_out: bool) {
        self.page_errors.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.request_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_entries_processed(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.entries_processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_entry_skipped(&self) {
        self.entries_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_name_emitted(&self) {
        self.names_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_failed(&self) {
        self.sources_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn poller_started(&self) {
        self.active_pollers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn poller_stopped(&self) {
        let _ = self
            .active_pollers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_sub(1)
            });
    }

    pub fn active_pollers(&self) -> usize {
        self.active_pollers.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            heads_fetched: self.heads_fetched.load(Ordering::Relaxed),
            head_errors: self.head_errors.load(Ordering::Relaxed),
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            page_errors: self.page_errors.load(Ordering::Relaxed),
            request_timeouts: self.request_timeouts.load(Ordering::Relaxed),
            entries_processed: self.entries_processed.load(Ordering::Relaxed),
            entries_skipped: self.entries_skipped.load(Ordering::Relaxed),
            names_emitted: self.names_emitted.load(Ordering::Relaxed),
            sources_failed: self.sources_failed.load(Ordering::Relaxed),
            active_pollers: self.active_pollers.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub heads_fetched: u64,
    pub head_errors: u64,
    pub pages_fetched: u64,
    pub page_errors: u64,
    pub request_timeouts: u64,
    pub entries_processed: u64,
    pub entries_skipped: u64,
    pub names_emitted: u64,
    pub sources_failed: u64,
    pub active_pollers: usize,
}

/// Spawns a background task that periodically logs throughput, sink occupancy, and fetch errors.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    sink: NameSink,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "ctlatest::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let processed_delta = current_snapshot
                        .entries_processed
                        .saturating_sub(last_snapshot.entries_processed);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        processed_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "ctlatest::metrics",
                        throughput = format!("{throughput:.2}"),
                        processed = current_snapshot.entries_processed,
                        emitted = current_snapshot.names_emitted,
                        skipped = current_snapshot.entries_skipped,
                        sink_len = sink.len(),
                        sink_capacity = sink.max_capacity(),
                        head_errors = current_snapshot.head_errors,
                        page_errors = current_snapshot.page_errors,
                        timeouts = current_snapshot.request_timeouts,
                        active_pollers = current_snapshot.active_pollers,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
