//! Bounded hand-off between pollers and the output writer.

use crate::processor::extractor::HarvestedName;
use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Returned when the receiving side of the sink has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

impl fmt::Display for SinkClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("name sink is closed")
    }
}

impl std::error::Error for SinkClosed {}

/// Producer handle. Sends wait while the channel is full.
#[derive(Debug, Clone)]
pub struct NameSink {
    tx: mpsc::Sender<HarvestedName>,
}

pub type NameReceiver = mpsc::Receiver<HarvestedName>;

pub fn channel(capacity: usize) -> (NameSink, NameReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (NameSink { tx }, rx)
}

impl NameSink {
    pub async fn send(&self, name: HarvestedName) -> Result<(), SinkClosed> {
        self.tx.send(name).await.map_err(|_| SinkClosed)
    }

    /// Values buffered and not yet taken by the writer.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Path of a fresh output file named after the current unix time.
pub fn output_path(dir: &Path) -> PathBuf {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    dir.join(format!("latest-{seconds}.txt"))
}

/// Drains `rx` into `path`, one name per line, until every producer is gone.
///
/// The buffer is flushed every `flush_interval` and once more on exit. The
/// task resolves to the number of lines written.
pub fn spawn_file_writer(
    mut rx: NameReceiver,
    path: PathBuf,
    flush_interval: Duration,
) -> JoinHandle<Result<u64>> {
    tokio::spawn(async move {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open output file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let mut ticker = time::interval(flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut written = 0u64;

        tracing::info!(path = %path.display(), "writing harvested names");

        loop {
            tokio::select! {
                received = rx.recv() => {
                    let Some(harvested) = received else {
                        break;
                    };
                    let line = sanitize_line(&harvested.name);
                    writer
                        .write_all(line.as_bytes())
                        .await
                        .with_context(|| format!("failed to write to {}", path.display()))?;
                    written += 1;
                }
                _ = ticker.tick() => {
                    writer
                        .flush()
                        .await
                        .with_context(|| format!("failed to flush {}", path.display()))?;
                }
            }
        }

        writer
            .flush()
            .await
            .with_context(|| format!("failed to flush {}", path.display()))?;
        tracing::info!(path = %path.display(), lines = written, "name writer stopped");
        Ok(written)
    })
}

fn sanitize_line(name: &str) -> String {
    let mut line = name.replace(['\r', '\n'], " ");
    line.push('\n');
    line
}
