use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;
use url::Url;

use crate::{config::models::GatewayConfig, core::rate_limiter::BucketShape};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid upstream URL in '{field}': {message}")]
    InvalidUrl { field: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

impl ValidationError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Gateway configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire configuration, reporting every problem at once.
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(config) {
            errors.push(e);
        }
        errors.extend(Self::validate_logging(config));
        errors.extend(Self::validate_auth(config));
        if config.discovery_enabled {
            errors.extend(Self::validate_discovery(config));
        } else {
            errors.extend(Self::validate_static_urls(config));
        }
        errors.extend(Self::validate_timeouts(config));
        errors.extend(Self::validate_rate_limit(config));

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::ValidationFailed {
                message: errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            }),
        }
    }

    fn validate_listen_address(config: &GatewayConfig) -> ValidationResult<()> {
        let address = config.listen_addr();
        address
            .parse::<SocketAddr>()
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidListenAddress {
                address,
                reason: e.to_string(),
            })
    }

    fn validate_logging(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if let Err(e) = EnvFilter::try_new(&config.log_level) {
            errors.push(ValidationError::invalid("log_level", e.to_string()));
        }
        errors
    }

    fn validate_auth(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if config.auth_enabled && config.effective_auth_token().is_none() {
            errors.push(ValidationError::MissingField {
                field: "auth_token (required when auth_enabled is true)".to_string(),
            });
        }
        errors
    }

    fn validate_static_urls(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if let Err(e) = Self::validate_base_url("primary_url", &config.primary_url) {
            errors.push(e);
        }
        if let Some(analyzer_url) = &config.analyzer_url {
            if let Err(e) = Self::validate_base_url("analyzer_url", analyzer_url) {
                errors.push(e);
            }
        }
        errors
    }

    /// Check that `value` is an absolute http(s) URL with a host.
    pub fn validate_base_url(field: &str, value: &str) -> ValidationResult<Url> {
        let url = Url::parse(value.trim()).map_err(|e| ValidationError::InvalidUrl {
            field: field.to_string(),
            message: format!("'{value}': {e}"),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ValidationError::InvalidUrl {
                field: field.to_string(),
                message: format!("'{value}' must use http or https"),
            });
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(ValidationError::InvalidUrl {
                field: field.to_string(),
                message: format!("'{value}' has no host"),
            });
        }
        Ok(url)
    }

    fn validate_discovery(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (field, value) in [
            ("discovery_namespace", &config.discovery_namespace),
            ("primary_selector", &config.primary_selector),
            ("analyzer_selector", &config.analyzer_selector),
            ("cluster_domain", &config.cluster_domain),
        ] {
            if value.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("{field} (required when discovery_enabled is true)"),
                });
            }
        }
        errors
    }

    fn validate_timeouts(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (field, value) in [
            ("discovery_interval_secs", config.discovery_interval_secs),
            ("discovery_timeout_secs", config.discovery_timeout_secs),
            ("upstream_timeout_secs", config.upstream_timeout_secs),
            (
                "upstream_connect_timeout_secs",
                config.upstream_connect_timeout_secs,
            ),
        ] {
            if value == 0 {
                errors.push(ValidationError::invalid(field, "must be greater than 0"));
            }
        }

        if config.discovery_timeout_secs > 0
            && config.discovery_timeout_secs >= config.discovery_interval_secs
        {
            errors.push(ValidationError::invalid(
                "discovery_timeout_secs",
                format!(
                    "must be shorter than discovery_interval_secs ({} >= {})",
                    config.discovery_timeout_secs, config.discovery_interval_secs
                ),
            ));
        }
        errors
    }

    fn validate_rate_limit(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !config.rate_limit_enabled {
            return errors;
        }

        let rates = [
            ("rate_limit_rps", Some(config.rate_limit_rps)),
            ("rate_limit_client_rps", config.rate_limit_client_rps),
        ];
        for (field, rate) in rates {
            if let Some(rate) = rate {
                if BucketShape::new(rate, 1).quota().is_err() {
                    errors.push(ValidationError::invalid(
                        field,
                        format!("must be a positive rate with a representable refill period, got {rate}"),
                    ));
                }
            }
        }

        let bursts = [
            ("rate_limit_burst", Some(config.rate_limit_burst)),
            ("rate_limit_client_burst", config.rate_limit_client_burst),
        ];
        for (field, burst) in bursts {
            if burst == Some(0) {
                errors.push(ValidationError::invalid(field, "must be greater than 0"));
            }
        }

        if config.rate_limit_max_clients == 0 {
            errors.push(ValidationError::invalid(
                "rate_limit_max_clients",
                "must be greater than 0",
            ));
        }
        if config.rate_limit_client_idle_secs == 0 {
            errors.push(ValidationError::invalid(
                "rate_limit_client_idle_secs",
                "must be greater than 0",
            ));
        }
        errors
    }
}
