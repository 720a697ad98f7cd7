use anyhow::Context;
use rask_log_relay::app::{App, ConfigError, setup_logging_safe};
use rask_log_relay::domain::RelayError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app = match App::from_args(std::env::args_os()) {
        Ok(app) => app,
        // --help, --version and usage errors print themselves
        Err(RelayError::Config(ConfigError::Cli(e))) => e.exit(),
        Err(e) => return Err(e).context("Failed to load configuration"),
    };

    setup_logging_safe(app.config().log_level, app.config().log_format)
        .context("Failed to initialize logging")?;

    let report = app.run().await.context("rask-log-relay failed")?;
    if report.aborted_consumers > 0 {
        tracing::warn!(
            "{} consumer(s) had to be aborted during shutdown",
            report.aborted_consumers
        );
    }
    Ok(())
}
