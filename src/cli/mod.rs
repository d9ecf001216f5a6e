//! CLI module for lecture question answering.
//!
//! Provides command-line interface parsing and command dispatch.

pub mod args;
pub mod commands;

pub use args::{Cli, Commands, CollectionAction, DocumentAction};

use anyhow::Result;

use crate::config::Settings;

/// Dispatch a parsed command. `init` runs before settings are loaded.
pub async fn dispatch(command: Commands, config: &Settings) -> Result<()> {
    match command {
        Commands::Init { force } => commands::init::run_init(force),
        Commands::Config => commands::init::run_config(config),
        Commands::Documents { action } => commands::documents::run(action, config).await,
        Commands::Sync => commands::sync::run(config).await,
        Commands::Ask {
            course,
            question,
            stream,
            json,
        } => commands::ask::run(config, course, question, stream, json).await,
        Commands::Collection { action } => commands::collection::run(action, config).await,
    }
}
