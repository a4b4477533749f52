use std::time::Duration;

use crate::support::{
    fixtures::{expected_names, LOG_KEY},
    helpers::{init_tracing, wait_for_cursor},
    mock_log::{MockLog, MockLogServer},
};
use anyhow::{Context, Result};
use ctlatest::{LogSource, MonitorConfig, Runner, StartPosition};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn discovery_normalizes_listed_logs_to_https() -> Result<()> {
    init_tracing();
    let server = MockLogServer::start(vec![
        MockLog::new("alpha", 3),
        MockLog::new("beta", 20),
        MockLog::with_key("broken", 5, b"junk".to_vec()),
    ])
    .await?;
    let output = tempfile::tempdir()?;

    let config = MonitorConfig::builder()
        .log_list_url(server.log_list_url())
        .output_dir(output.path())
        .build()?;
    let runner = Runner::new(config)?;

    let sources = runner.discover().await?;
    let mut urls = sources.iter().map(|source| source.url().to_owned()).collect::<Vec<_>>();
    urls.sort();
    let mut expected = ["alpha", "beta", "broken"]
        .iter()
        .map(|name| server.log_url(name).replacen("http://", "https://", 1))
        .collect::<Vec<_>>();
    expected.sort();
    assert_eq!(urls, expected);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_writes_names_from_every_log() -> Result<()> {
    init_tracing();
    let server = MockLogServer::start(vec![
        MockLog::new("alpha", 3),
        MockLog::new("beta", 20),
        MockLog::with_key("broken", 5, b"junk".to_vec()),
    ])
    .await?;
    let output = tempfile::tempdir()?;

    let config = MonitorConfig::builder()
        .log_list_url(server.log_list_url())
        .poll_interval(Duration::from_millis(25))
        .flush_interval(Duration::from_millis(10))
        .metrics_interval(Duration::from_millis(50))
        .output_dir(output.path())
        .build()?;
    let runner = Runner::new(config)?;

    let sources = vec![
        LogSource::new(&server.log_url("alpha"), LOG_KEY.to_vec())?,
        LogSource::new(&server.log_url("beta"), LOG_KEY.to_vec())?,
        LogSource::new(&server.log_url("broken"), b"junk".to_vec())?,
    ];

    let cursors = runner.cursors();
    let token = runner.cancellation_token();
    let alpha = server.log_url("alpha");
    let beta = server.log_url("beta");

    let drive = async {
        let reached = async {
            wait_for_cursor(&cursors, &alpha, 3, WAIT).await?;
            wait_for_cursor(&cursors, &beta, 20, WAIT).await?;
            server.log("alpha").grow(6);
            wait_for_cursor(&cursors, &alpha, 9, WAIT).await
        }
        .await;
        token.cancel();
        reached
    };
    let run = runner.run_sources(sources, std::future::pending::<()>());

    let (summary, driven) = tokio::join!(timeout(WAIT * 2, run), drive);
    driven?;
    let summary = summary.context("runner should stop after cancellation")??;

    assert_eq!(summary.sources, 3);
    assert_eq!(summary.started, 2);
    assert_eq!(summary.failed, 1);

    let expected = expected_names(3..9);
    assert_eq!(summary.lines_written, expected.len() as u64);
    let contents = tokio::fs::read_to_string(&summary.output_path).await?;
    assert_eq!(contents.lines().collect::<Vec<_>>(), expected);
    assert!(summary
        .output_path
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with("latest-"))
        .unwrap_or(false));
    assert_eq!(summary.telemetry.sources_failed, 1);
    assert_eq!(summary.telemetry.active_pollers, 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn start_offset_backfills_existing_entries() -> Result<()> {
    init_tracing();
    let server = MockLogServer::start(vec![MockLog::new("alpha", 12)]).await?;
    let output = tempfile::tempdir()?;

    let config = MonitorConfig::builder()
        .log_list_url(server.log_list_url())
        .poll_interval(Duration::from_millis(25))
        .output_dir(output.path())
        .start(StartPosition::Offset(2))
        .build()?;
    let runner = Runner::new(config)?;
    let cursors = runner.cursors();
    let token = runner.cancellation_token();
    let alpha = server.log_url("alpha");

    let sources = vec![LogSource::new(&alpha, LOG_KEY.to_vec())?];
    let run = runner.run_sources(sources, std::future::pending::<()>());

    let (summary, driven) = tokio::join!(timeout(WAIT * 2, run), async {
        let reached = wait_for_cursor(&cursors, &alpha, 12, WAIT).await;
        token.cancel();
        reached
    });
    driven?;
    let summary = summary.context("runner should stop after cancellation")??;

    let expected = expected_names(2..12);
    assert_eq!(summary.lines_written, expected.len() as u64);
    let contents = tokio::fs::read_to_string(&summary.output_path).await?;
    assert_eq!(contents.lines().collect::<Vec<_>>(), expected);
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn discovery_failure_aborts_run() -> Result<()> {
    init_tracing();
    let server = MockLogServer::start(Vec::new()).await?;
    let output = tempfile::tempdir()?;

    let config = MonitorConfig::builder()
        .log_list_url(server.log_list_url())
        .output_dir(output.path())
        .build()?;
    let runner = Runner::new(config)?;

    let err = runner.run().await.unwrap_err();
    let message = format!("{err:#}");
    assert!(
        message.contains("log discovery failed") && message.contains("no usable logs"),
        "unexpected error: {message}"
    );

    server.shutdown().await;
    Ok(())
}
