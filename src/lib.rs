//! delayhttp - an asynchronous HTTP relay.
//!
//! The relay accepts any inbound HTTP request carrying an `X-Delay-Host`
//! header, answers `200 OK` right away, and forwards the request later from a
//! fixed pool of background workers. The forwarded copy keeps method, path,
//! headers and body; only the destination changes to the host named by the
//! header (scheme `https` unless the request was sent in absolute form with
//! another one).
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use delayhttp::{
//!     Dispatcher, HttpClientAdapter, HttpHandler, StatsRegister,
//!     adapters::router,
//!     config::{CliOverrides, load_layered},
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = load_layered(None, &CliOverrides::default())?;
//! let client = Arc::new(HttpClientAdapter::new(&cfg.outbound)?);
//! let dispatcher = Arc::new(Dispatcher::start(
//!     &cfg.dispatch,
//!     client,
//!     Arc::new(StatsRegister::new()),
//! ));
//! let app = router(Arc::new(HttpHandler::new(dispatcher, cfg.intake.max_body_bytes)));
//! let listener = tokio::net::TcpListener::bind(cfg.listen_addr()).await?;
//! axum::serve(listener, app).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! Business logic lives in `core` (capture, rewrite, queue, workers, counters).
//! The outbound HTTP client is a port in `ports` with its hyper implementation
//! in `adapters`, next to the axum intake handler.
//!
//! # Error Handling
//! Domain errors are `thiserror` enums next to the code raising them; startup
//! paths return `eyre::Result` with context attached through `WrapErr`.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler},
    core::{Dispatcher, StatsRegister},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
