//! Logging initialization for pgpq binaries
//!
//! `RUST_LOG` overrides the configured level. Output is human-readable or
//! JSON depending on `logging.json`.

use tracing_subscriber::{
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Log to stdout. Used by the exporter.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    init_logging_with_writer(config, std::io::stdout)
}

/// Log to stderr, keeping stdout free for command output.
pub fn init_stderr_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    init_logging_with_writer(config, std::io::stderr)
}

fn init_logging_with_writer<W>(config: &LoggingConfig, writer: W) -> anyhow::Result<()>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let subscriber = tracing_subscriber::registry().with(build_env_filter(config));

    if config.json {
        let console_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(writer);
        subscriber.with(console_layer).try_init()?;
    } else {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_writer(writer);
        subscriber.with(console_layer).try_init()?;
    }

    tracing::debug!(level = %config.level, json = config.json, "Logging initialized");
    Ok(())
}

fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)))
}

/// Keep sqlx quiet unless asked for explicitly.
fn default_directives(level: &str) -> String {
    format!(
        "pgpq={level},pgpq_server={level},pgpq_exporter={level},pgpq_cli={level},\
         tower_http=info,sqlx=warn"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_parse() {
        let directives = default_directives("debug");
        assert!(directives.starts_with("pgpq=debug,"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }
}
