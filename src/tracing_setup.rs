use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Build the filter: `RUST_LOG` wins over the configured level.
fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}")),
    }
}

/// Initialize tracing from the logging section of the relay configuration
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    init_tracing_with_config(&config.level, config.json)
}

/// Initialize tracing with JSON or pretty console output
pub fn init_tracing_with_config(level: &str, json_format: bool) -> Result<()> {
    let env_filter = env_filter(level)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json_format {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.json().with_current_span(true).with_span_list(true))
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    }

    tracing::info!(level, json = json_format, "delayhttp logging initialized");
    Ok(())
}

/// Span wrapping the whole life of one dispatch worker
pub fn worker_span(worker_id: usize) -> tracing::Span {
    tracing::info_span!("worker", worker.id = worker_id)
}

/// Span wrapping one job delivery
pub fn delivery_span(destination: &str, method: &str, path: &str) -> tracing::Span {
    tracing::info_span!(
        "delivery",
        destination = destination,
        http.method = method,
        http.path = path,
        http.status_code = tracing::field::Empty,
    )
}
