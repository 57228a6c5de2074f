use std::path::Path;

use config::{Config, ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};
use eyre::{Context, Result};

use crate::config::models::RelayConfig;

/// Prefix of environment variables overriding configuration
/// (`DELAYHTTP__DISPATCH__WORKERS=8`).
pub const ENV_PREFIX: &str = "DELAYHTTP";

/// Values given on the command line. They win over file and environment.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub workers: Option<usize>,
}

/// Commented starting point written by `delayhttp init`. Values match the defaults.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r##"# delayhttp configuration
#
# Every value below is the built-in default. Environment variables override the
# file, e.g. DELAYHTTP__DISPATCH__WORKERS=8, and command line flags override both.

bind = "127.0.0.1"
port = 3333

# How long queued jobs may keep draining after SIGINT / SIGTERM
shutdown_timeout = "30s"

[dispatch]
workers = 3
queue_capacity = 1000
# "block": intake waits for room; "reject": intake answers 503
overflow = "block"
# "continue": log and take the next job; "halt": the worker stops for good
on_failure = "continue"

[intake]
max_body_bytes = 10485760

[outbound]
request_timeout = "30s"
max_retries = 4
retry_wait_min = "1s"
retry_wait_max = "30s"
pool_idle_timeout = "90s"
pool_max_idle_per_host = 32
# user_agent = "delayhttp"

[logging]
# EnvFilter directive; RUST_LOG takes precedence when set
level = "info"
json = false
"##;

/// Load configuration from a single file using the config crate, without
/// environment or CLI layers. Supports YAML, JSON and TOML.
pub fn load_config_sync(config_path: &str) -> Result<RelayConfig> {
    let settings = Config::builder()
        .add_source(file_source(config_path)?)
        .build()
        .with_context(|| format!("Failed to build config from {config_path}"))?;

    settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from {config_path}"))
}

/// Build the effective relay configuration.
///
/// Layers, lowest precedence first: built-in defaults, the optional file at
/// `config_path`, `DELAYHTTP__*` environment variables, then `overrides`.
pub fn load_layered(config_path: Option<&str>, overrides: &CliOverrides) -> Result<RelayConfig> {
    let builder = Config::builder();
    let builder = match config_path {
        Some(path) => builder.add_source(file_source(path)?),
        None => builder,
    };
    let builder = builder.add_source(env_source());
    let builder = apply_overrides(builder, overrides)?;

    builder
        .build()
        .context("Failed to build layered configuration")?
        .try_deserialize()
        .context("Failed to deserialize layered configuration")
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

fn apply_overrides(
    mut builder: ConfigBuilder<DefaultState>,
    overrides: &CliOverrides,
) -> Result<ConfigBuilder<DefaultState>> {
    if let Some(bind) = &overrides.bind {
        builder = builder
            .set_override("bind", bind.as_str())
            .context("Invalid --bind override")?;
    }
    if let Some(port) = overrides.port {
        builder = builder
            .set_override("port", u64::from(port))
            .context("Invalid --port override")?;
    }
    if let Some(workers) = overrides.workers {
        builder = builder
            .set_override("dispatch.workers", workers as u64)
            .context("Invalid --worker override")?;
    }
    Ok(builder)
}

fn file_source(config_path: &str) -> Result<File<config::FileSourceFile, FileFormat>> {
    let path = Path::new(config_path);

    // Determine file format based on extension
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    };

    let name = path
        .to_str()
        .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?;

    Ok(File::new(name, format).required(true))
}
