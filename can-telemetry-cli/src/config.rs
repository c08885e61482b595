//! Configuration loading

use anyhow::{Context, Result};
use can_telemetry::TelemetryConfig;
use std::fs;
use std::path::Path;

/// Load and validate a telemetry configuration file
pub fn load_config(path: &Path) -> Result<TelemetryConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config = TelemetryConfig::from_toml_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .validate()
        .with_context(|| format!("Invalid configuration in {:?}", path))?;

    log::debug!(
        "Loaded {} broadcast IDs, {} on-demand signals, {} custom fields",
        config.can_ids.len(),
        config.current_data.len(),
        config.fields.len()
    );

    Ok(config)
}
