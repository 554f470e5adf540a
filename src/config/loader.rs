use std::{collections::HashMap, path::Path};

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Prefix of environment variables that override file settings.
pub const ENV_PREFIX: &str = "MERIDIAN";

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml,
    }
}

/// Load configuration from an optional file overlaid with `MERIDIAN_*`
/// variables from the process environment.
pub fn load_config(config_path: Option<&str>) -> Result<GatewayConfig> {
    load_config_from(config_path, None)
}

/// Load configuration like [`load_config`], reading environment overrides from
/// `env` instead of the process environment when it is given.
///
/// A missing file is not an error: every key has a default.
pub fn load_config_from(
    config_path: Option<&str>,
    env: Option<HashMap<String, String>>,
) -> Result<GatewayConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        let path = Path::new(path);
        let name = path
            .to_str()
            .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?;
        builder = builder.add_source(File::new(name, file_format(path)).required(false));
    }

    let environment = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .try_parsing(true)
        .source(env);

    let settings = builder
        .add_source(environment)
        .build()
        .context("Failed to build gateway configuration")?;

    let config: GatewayConfig = settings
        .try_deserialize()
        .context("Failed to deserialize gateway configuration")?;

    tracing::debug!(
        path = config_path.unwrap_or("<none>"),
        "Loaded gateway configuration"
    );
    Ok(config)
}
