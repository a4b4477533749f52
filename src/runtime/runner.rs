use crate::log::client::{HttpLogClientFactory, LogClientFactory};
use crate::log::discovery;
use crate::log::source::LogSource;
use crate::processor::cursor::CursorStore;
use crate::processor::extractor::EntryExtractor;
use crate::processor::monitor::{Monitor, MonitorParams};
use crate::runtime::config::MonitorConfig;
use crate::runtime::sink;
use crate::runtime::telemetry::{self, Telemetry, TelemetrySnapshot};
use anyhow::{Context, Result};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub sources: usize,
    pub started: usize,
    pub failed: usize,
    pub lines_written: u64,
    pub output_path: PathBuf,
    pub telemetry: TelemetrySnapshot,
}

/// Wires discovery, the monitor, the metrics reporter, and the file writer,
/// and handles OS signals for graceful shutdowns.
pub struct Runner {
    config: MonitorConfig,
    factory: Arc<HttpLogClientFactory>,
    cursors: Arc<CursorStore>,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
}

impl Runner {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        let factory = HttpLogClientFactory::new(config.client_options())
            .context("failed to build CT client factory")?;
        Ok(Self {
            config,
            factory: Arc::new(factory),
            cursors: Arc::new(CursorStore::new()),
            telemetry: Arc::new(Telemetry::default()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn cursors(&self) -> Arc<CursorStore> {
        self.cursors.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Fetches the configured log list.
    pub async fn discover(&self) -> Result<Vec<LogSource>> {
        discovery::fetch_log_list(self.factory.http_client(), self.config.log_list_url())
            .await
            .context("log discovery failed")
    }

    /// Discovers logs and runs until Ctrl-C, SIGTERM, or the shutdown token is cancelled.
    pub async fn run_until_signal(&self) -> Result<RunSummary> {
        let sources = self.discover().await?;
        tracing::info!("runner started; waiting for Ctrl-C or SIGTERM to initiate shutdown");
        self.run_sources(sources, shutdown_signal()).await
    }

    /// Discovers logs and runs until the shutdown token is cancelled.
    pub async fn run(&self) -> Result<RunSummary> {
        let sources = self.discover().await?;
        self.run_sources(sources, std::future::pending::<()>()).await
    }

    /// Polls `sources` until `stop` resolves or the shutdown token is cancelled.
    pub async fn run_sources<F>(&self, sources: Vec<LogSource>, stop: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let run_token = self.shutdown.child_token();
        let (name_sink, names) = sink::channel(self.config.sink_capacity());
        let output_path = sink::output_path(self.config.output_dir());
        let mut writer =
            sink::spawn_file_writer(names, output_path.clone(), self.config.flush_interval());

        let factory: Arc<dyn LogClientFactory> = self.factory.clone();
        let mut monitor = Monitor::with_cancellation_token(
            MonitorParams {
                factory,
                cursors: self.cursors.clone(),
                page_sizes: self.config.page_sizes().clone(),
                extractor: EntryExtractor::new(self.config.include_precertificates()),
                telemetry: self.telemetry.clone(),
                poll_interval: self.config.poll_interval(),
                start: self.config.start(),
            },
            run_token.clone(),
        );
        let report = monitor.start(&sources, name_sink.clone())?;
        let metrics = telemetry::spawn_metrics_reporter(
            self.telemetry.clone(),
            name_sink,
            run_token.clone(),
            self.config.metrics_interval(),
        );

        let mut writer_result = None;
        tokio::select! {
            _ = stop => {
                tracing::info!("shutdown signal received; stopping runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
            finished = &mut writer => {
                tracing::error!("name writer exited early; stopping runner");
                writer_result = Some(finished);
            }
        }

        run_token.cancel();
        monitor.stop().await;
        if let Err(err) = metrics.await {
            tracing::warn!(error = %err, "metrics reporter task panicked");
        }

        let finished = match writer_result {
            Some(finished) => finished,
            None => writer.await,
        };
        let lines_written = finished
            .context("name writer task panicked")?
            .context("name writer failed")?;

        let summary = RunSummary {
            sources: sources.len(),
            started: report.started.len(),
            failed: report.failed.len(),
            lines_written,
            output_path,
            telemetry: self.telemetry.snapshot(),
        };
        tracing::info!(
            sources = summary.sources,
            started = summary.started,
            failed = summary.failed,
            lines = summary.lines_written,
            path = %summary.output_path.display(),
            "runner stopped"
        );
        Ok(summary)
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler; only Ctrl-C will stop the runner");
                let _ = signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
