pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{CliOverrides, DEFAULT_CONFIG_TEMPLATE, load_config_sync, load_layered};
pub use models::*;
pub use validation::{RelayConfigValidator, ValidationError, ValidationResult};
