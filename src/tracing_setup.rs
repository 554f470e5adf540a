use eyre::{Result, WrapErr};
use tracing::Subscriber;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

/// Build the filter: `RUST_LOG` wins, otherwise the configured level.
fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}")),
    }
}

/// Assemble the subscriber without installing it.
fn build_subscriber(level: &str, format: LogFormat) -> Result<Box<dyn Subscriber + Send + Sync>> {
    let env_filter = env_filter(level)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let subscriber: Box<dyn Subscriber + Send + Sync> = match format {
        LogFormat::Json => Box::new(
            Registry::default().with(env_filter).with(
                fmt_layer
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            ),
        ),
        LogFormat::Pretty => Box::new(
            Registry::default()
                .with(env_filter)
                .with(fmt_layer.pretty().with_ansi(true)),
        ),
    };
    Ok(subscriber)
}

/// Initialize the global subscriber with JSON or pretty console output.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    build_subscriber(level, format)?
        .try_init()
        .wrap_err("Failed to install tracing subscriber")?;

    tracing::info!(level, %format, "Meridian logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_rejected() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(env_filter("meridian=bogus").is_err());
            assert!(build_subscriber("meridian=bogus", LogFormat::Json).is_err());
        }
    }

    #[test]
    fn test_both_formats_build() {
        assert!(build_subscriber("debug", LogFormat::Json).is_ok());
        assert!(build_subscriber("meridian=trace,info", LogFormat::Pretty).is_ok());
    }
}
