use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use delayhttp::{
    adapters::{HttpClientAdapter, HttpHandler, router},
    config::{
        CliOverrides, DEFAULT_CONFIG_TEMPLATE, RelayConfig, RelayConfigValidator, load_layered,
    },
    core::{Dispatcher, StatsRegister},
    ports::http_client::HttpClient,
    tracing_setup,
    utils::graceful_shutdown::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Delay HTTP Server")]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Run HTTP server
    #[clap(alias = "s")]
    Server {
        /// Binding address (IP literal or host name, e.g. localhost)
        #[clap(long)]
        bind: Option<String>,
        /// Binding port
        #[clap(long)]
        port: Option<u16>,
        /// Number of worker
        #[clap(long)]
        worker: Option<usize>,
        /// Optional configuration file (TOML, YAML or JSON)
        #[clap(short, long)]
        config: Option<String>,
    },
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "delayhttp.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "delayhttp.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Commands::Server {
            bind,
            port,
            worker,
            config,
        } => {
            let overrides = CliOverrides {
                bind,
                port,
                workers: worker,
            };
            let relay_config = load_layered(config.as_deref(), &overrides)
                .context("Failed to load configuration")?;
            RelayConfigValidator::validate(&relay_config)
                .map_err(|e| eyre!("Invalid configuration: {}", e))?;
            serve(relay_config).await
        }
        Commands::Validate { config } => validate_config_command(&config),
        Commands::Init { config } => init_config_command(&config).await,
    }
}

async fn serve(config: RelayConfig) -> Result<()> {
    tracing_setup::init_tracing(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    let shutdown_timeout = config.shutdown_timeout()?;

    let http_client: Arc<dyn HttpClient> = Arc::new(
        HttpClientAdapter::new(&config.outbound).context("Failed to create outbound client")?,
    );
    let stats = Arc::new(StatsRegister::new());
    let dispatcher = Arc::new(Dispatcher::start(&config.dispatch, http_client, stats));
    let handler = Arc::new(HttpHandler::new(
        dispatcher.clone(),
        config.intake.max_body_bytes,
    ));
    let app = router(handler);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to address {addr}"))?;

    tracing::info!(
        "delayhttp listening on {} ({} workers, queue capacity {})",
        addr,
        config.dispatch.workers,
        config.dispatch.queue_capacity
    );

    let graceful_shutdown = GracefulShutdown::new();
    tokio::spawn({
        let graceful_shutdown = graceful_shutdown.clone();
        async move { graceful_shutdown.run_signal_handler().await }
    });

    let shutdown_signal = {
        let graceful_shutdown = graceful_shutdown.clone();
        async move {
            let reason = graceful_shutdown.wait_for_shutdown_signal().await;
            tracing::info!("Shutdown signal received: {:?}", reason);
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    tracing::info!("Listener closed, draining queued jobs");
    if dispatcher.shutdown(shutdown_timeout).await {
        tracing::info!("Graceful shutdown completed");
    } else {
        tracing::warn!("Shutdown finished with undelivered jobs");
    }

    Ok(())
}

/// Validate configuration file and exit
fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_layered(Some(config_path), &CliOverrides::default()) {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match RelayConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr());
            println!("   • Workers: {}", config.dispatch.workers);
            println!("   • Queue Capacity: {}", config.dispatch.queue_capacity);
            println!("   • Overflow Policy: {:?}", config.dispatch.overflow);
            println!("   • Failure Policy: {:?}", config.dispatch.on_failure);
            println!(
                "   • Outbound: timeout {}, {} retries",
                config.outbound.request_timeout, config.outbound.max_retries
            );
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Use an IP literal or host name for 'bind' (e.g. '127.0.0.1', '::1', 'localhost')");
            println!("   • Durations use humantime syntax ('500ms', '30s', '2m')");
            println!("   • Keep outbound.retry_wait_min at or below retry_wait_max");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    tokio::fs::write(path, DEFAULT_CONFIG_TEMPLATE)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'delayhttp server --config {config_path}' to start the relay");
    Ok(())
}
