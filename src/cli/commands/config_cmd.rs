//! `tc config`: show and validate the effective configuration.

use anyhow::{Context, Result};

use crate::cli::output;
use crate::cli::types::OutputFormat;
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

pub fn handle_show(config: &Config, format: OutputFormat) -> Result<()> {
    output::print(format, config, || {
        serde_yaml::to_string(config).unwrap_or_else(|e| format!("<unprintable config: {e}>"))
    });
    Ok(())
}

pub fn handle_validate(config: &Config) -> Result<()> {
    ConfigLoader::validate(config).context("configuration invalid")?;
    println!("Configuration OK");
    Ok(())
}
