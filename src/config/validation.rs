use std::net::IpAddr;

use tracing_subscriber::EnvFilter;

use crate::config::models::{OutboundConfig, RelayConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Relay configuration validator
pub struct RelayConfigValidator;

impl RelayConfigValidator {
    /// Validate the entire relay configuration, reporting every problem at once
    pub fn validate(config: &RelayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.bind, &config.listen_addr()) {
            errors.push(e);
        }

        if config.dispatch.workers == 0 {
            errors.push(ValidationError::InvalidField {
                field: "dispatch.workers".to_string(),
                message: "At least one worker is required".to_string(),
            });
        }

        if config.dispatch.queue_capacity == 0 {
            errors.push(ValidationError::InvalidField {
                field: "dispatch.queue_capacity".to_string(),
                message: "Queue capacity must be greater than zero".to_string(),
            });
        }

        if config.intake.max_body_bytes == 0 {
            errors.push(ValidationError::InvalidField {
                field: "intake.max_body_bytes".to_string(),
                message: "Body limit must be greater than zero".to_string(),
            });
        }

        if let Err(e) = config.shutdown_timeout() {
            errors.push(ValidationError::InvalidField {
                field: "shutdown_timeout".to_string(),
                message: format!("{e:#}"),
            });
        }

        errors.extend(Self::validate_outbound(&config.outbound));

        if let Err(e) = EnvFilter::try_new(&config.logging.level) {
            errors.push(ValidationError::InvalidField {
                field: "logging.level".to_string(),
                message: e.to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format: an IP literal or a host name resolved at bind time
    fn validate_listen_address(bind: &str, address: &str) -> ValidationResult<()> {
        if bind.parse::<IpAddr>().is_ok() || is_host_name(bind) {
            return Ok(());
        }
        Err(ValidationError::InvalidListenAddress {
            address: address.to_string(),
            reason: "bind must be an IP address or a host name (e.g. '127.0.0.1', '::' or 'localhost')"
                .to_string(),
        })
    }

    fn validate_outbound(outbound: &OutboundConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let invalid = |field: &str, message: String| ValidationError::InvalidField {
            field: format!("outbound.{field}"),
            message,
        };

        match outbound.request_timeout() {
            Ok(timeout) if timeout.is_zero() => {
                errors.push(invalid("request_timeout", "Timeout must be greater than zero".to_string()))
            }
            Ok(_) => {}
            Err(e) => errors.push(invalid("request_timeout", format!("{e:#}"))),
        }

        if let Err(e) = outbound.pool_idle_timeout() {
            errors.push(invalid("pool_idle_timeout", format!("{e:#}")));
        }

        match (outbound.retry_wait_min(), outbound.retry_wait_max()) {
            (Ok(min), Ok(max)) if min > max => errors.push(invalid(
                "retry_wait_min",
                format!("{min:?} is larger than retry_wait_max {max:?}"),
            )),
            (Ok(_), Ok(_)) => {}
            (min, max) => {
                if let Err(e) = min {
                    errors.push(invalid("retry_wait_min", format!("{e:#}")));
                }
                if let Err(e) = max {
                    errors.push(invalid("retry_wait_max", format!("{e:#}")));
                }
            }
        }

        if let Some(agent) = &outbound.user_agent {
            if http::HeaderValue::from_str(agent).is_err() {
                errors.push(invalid(
                    "user_agent",
                    "Must be a valid header value".to_string(),
                ));
            }
        }

        errors
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        errors
            .iter()
            .map(|e| format!("  • {e}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// RFC 1123 host name: dot-separated labels of ASCII letters, digits and inner hyphens.
fn is_host_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 253
        && name.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        })
}
