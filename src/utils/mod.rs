pub mod backoff;
pub mod graceful_shutdown;

pub use backoff::calculate_backoff;
pub use graceful_shutdown::{GracefulShutdown, ShutdownReason};
