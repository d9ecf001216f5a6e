//! Init and Config commands.

use std::path::PathBuf;

use anyhow::{Result, bail};

use crate::config::Settings;

/// Create the configuration file.
pub fn run_init(force: bool) -> Result<()> {
    let config_path = PathBuf::from(".lecture-rag/settings.toml");

    if config_path.exists() && !force {
        bail!(
            "Configuration file already exists at: {}\nUse --force to overwrite",
            config_path.display()
        );
    }

    match Settings::init_config_file(force) {
        Ok(path) => {
            println!("Created configuration file at: {}", path.display());
            println!("Edit this file to customize your settings.");
            Ok(())
        }
        Err(e) => bail!("{e}"),
    }
}

/// Display the effective configuration.
pub fn run_config(config: &Settings) -> Result<()> {
    println!("Current Configuration:");
    println!("{}", "=".repeat(50));
    println!("{}", toml::to_string_pretty(&redacted(config))?);
    Ok(())
}

/// Copy of `config` with API keys masked.
fn redacted(config: &Settings) -> Settings {
    let mask = |key: &Option<String>| key.as_ref().map(|_| "********".to_string());
    let mut shown = config.clone();
    shown.embedding.api_key = mask(&config.embedding.api_key);
    shown.generation.api_key = mask(&config.generation.api_key);
    shown.vector.api_key = mask(&config.vector.api_key);
    shown
}
