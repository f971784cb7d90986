//! Configuration loading for the pulse CLI
//!
//! Configuration comes from an optional TOML file holding a `PulseConfig`,
//! with command-line flags layered on top.

use std::path::Path;

use tracing::info;

use pulse_core::PulseConfig;

use crate::cli::Cli;
use crate::error::{CliError, Result};

/// Parse a configuration from TOML text
pub fn parse_config(text: &str) -> Result<PulseConfig> {
    Ok(toml::from_str(text)?)
}

pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<PulseConfig> {
    let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        CliError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
    })?;
    parse_config(&text)
}

/// Apply command-line overrides to a loaded configuration
pub fn apply_overrides(mut config: PulseConfig, cli: &Cli) -> PulseConfig {
    if let Some(address) = &cli.address {
        config.persistent.address = address.clone();
    }
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    config
}

/// Load, override and validate the configuration for this invocation
pub fn load_configuration(cli: &Cli) -> Result<PulseConfig> {
    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            load_from_file(path)?
        }
        None => {
            info!("Using default configuration");
            PulseConfig::default()
        }
    };
    let config = apply_overrides(config, cli);
    config.validate()?;
    Ok(config)
}

pub fn to_toml(config: &PulseConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}
