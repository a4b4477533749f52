use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    fixtures::{expected_names, LOG_KEY},
    helpers::{assert_strictly_increasing, collect_names, init_tracing, names_for, wait_for_cursor},
    mock_log::{MockLog, MockLogServer},
};
use anyhow::Result;
use ctlatest::runtime::sink;
use ctlatest::{
    CursorStore, EntryExtractor, HttpLogClientFactory, LogClientOptions, LogSource, Monitor,
    MonitorParams, PageSizePolicy, PollerExit, StartPosition, Telemetry,
};

const WAIT: Duration = Duration::from_secs(10);

fn monitor_params(
    cursors: Arc<CursorStore>,
    telemetry: Arc<Telemetry>,
    page_sizes: PageSizePolicy,
) -> Result<MonitorParams> {
    Ok(MonitorParams {
        factory: Arc::new(HttpLogClientFactory::new(LogClientOptions::default())?),
        cursors,
        page_sizes,
        extractor: EntryExtractor::default(),
        telemetry,
        poll_interval: Duration::from_millis(25),
        start: StartPosition::Head,
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn harvests_appended_entries_from_every_log() -> Result<()> {
    init_tracing();
    let server = MockLogServer::start(vec![
        MockLog::new("alpha", 10),
        MockLog::new("beta", 0),
        MockLog::with_key("broken", 5, b"not a key".to_vec()),
    ])
    .await?;
    let alpha = server.log_url("alpha");
    let beta = server.log_url("beta");

    let cursors = Arc::new(CursorStore::new());
    let telemetry = Arc::new(Telemetry::default());
    let page_sizes = PageSizePolicy::new(vec![("127.0.0.1".to_owned(), 4)], 32)?;
    let mut monitor = Monitor::new(monitor_params(cursors.clone(), telemetry.clone(), page_sizes)?);

    let sources = vec![
        LogSource::new(&alpha, LOG_KEY.to_vec())?,
        LogSource::new(&beta, LOG_KEY.to_vec())?,
        LogSource::new(&server.log_url("broken"), b"not a key".to_vec())?,
    ];
    let (name_sink, mut rx) = sink::channel(64);
    let report = monitor.start(&sources, name_sink)?;
    assert_eq!(report.started.len(), 2);
    assert_eq!(report.failed.len(), 1);

    wait_for_cursor(&cursors, &alpha, 10, WAIT).await?;
    wait_for_cursor(&cursors, &beta, 0, WAIT).await?;

    server.log("alpha").grow(13);
    server.log("beta").grow(7);
    let expected_alpha = expected_names(10..23);
    let expected_beta = expected_names(0..7);
    let received = collect_names(&mut rx, expected_alpha.len() + expected_beta.len(), WAIT).await?;

    for (log_id, expected) in [(&alpha, &expected_alpha), (&beta, &expected_beta)] {
        let names = names_for(&received, log_id);
        let indices = names.iter().map(|name| name.index).collect::<Vec<_>>();
        assert_strictly_increasing(&indices);
        assert_eq!(
            names.iter().map(|name| name.name.clone()).collect::<Vec<_>>(),
            *expected
        );
    }

    wait_for_cursor(&cursors, &alpha, 23, WAIT).await?;
    wait_for_cursor(&cursors, &beta, 7, WAIT).await?;
    assert!(server
        .log("alpha")
        .requests()
        .iter()
        .all(|line| line == "get-sth" || line.starts_with("get-entries?start=")));

    let exits = monitor.stop().await;
    assert_eq!(exits.len(), 2);
    assert!(exits.iter().all(|(_, exit)| *exit == PollerExit::Cancelled));
    assert_eq!(telemetry.snapshot().sources_failed, 1);
    assert_eq!(cursors.try_get(&server.log_url("broken")), None);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transient_failures_do_not_skip_entries() -> Result<()> {
    init_tracing();
    let server = MockLogServer::start(vec![MockLog::new("alpha", 0)]).await?;
    let alpha = server.log_url("alpha");

    let cursors = Arc::new(CursorStore::new());
    let telemetry = Arc::new(Telemetry::default());
    let page_sizes = PageSizePolicy::new(vec![("127.0.0.1".to_owned(), 5)], 32)?;
    let mut monitor = Monitor::new(monitor_params(cursors.clone(), telemetry.clone(), page_sizes)?);

    let (name_sink, mut rx) = sink::channel(64);
    monitor.start(&[LogSource::new(&alpha, LOG_KEY.to_vec())?], name_sink)?;
    wait_for_cursor(&cursors, &alpha, 0, WAIT).await?;

    let log = server.log("alpha");
    log.fail_entries_at(5, 2);
    log.fail_next_sth(1);
    log.grow(15);

    let expected = expected_names(0..15);
    let received = collect_names(&mut rx, expected.len(), WAIT).await?;
    let indices = received.iter().map(|name| name.index).collect::<Vec<_>>();
    assert_strictly_increasing(&indices);
    assert_eq!(
        received.iter().map(|name| name.name.clone()).collect::<Vec<_>>(),
        expected
    );
    wait_for_cursor(&cursors, &alpha, 15, WAIT).await?;

    let snapshot = telemetry.snapshot();
    assert_eq!(snapshot.page_errors, 2);
    assert!(snapshot.head_errors >= 1);
    assert_eq!(snapshot.entries_processed, 15);
    assert_eq!(snapshot.entries_skipped, 3);

    monitor.stop().await;
    assert!(rx.recv().await.is_none());
    server.shutdown().await;
    Ok(())
}
