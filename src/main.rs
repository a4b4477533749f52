use anyhow::{Context, Result};
use ctlatest::{init_tracing, MonitorConfig, Runner};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = MonitorConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        log_list = config.log_list_url(),
        poll_interval_secs = config.poll_interval().as_secs(),
        output_dir = %config.output_dir().display(),
        "starting ctlatest"
    );

    let runner = Runner::new(config)?;
    let summary = runner.run_until_signal().await?;
    tracing::info!(
        lines = summary.lines_written,
        path = %summary.output_path.display(),
        "ctlatest finished"
    );
    Ok(())
}
