use clap::Parser;

use lecture_rag::Settings;
use lecture_rag::cli::{Cli, Commands, dispatch};
use lecture_rag::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Init must work without an existing settings file
    let config = if matches!(cli.command, Commands::Init { .. }) {
        Settings::default()
    } else {
        let loaded = match &cli.config {
            Some(path) => Settings::load_from(path).map(|mut s| {
                if s.workspace_root.is_none() {
                    s.workspace_root = path
                        .parent()
                        .and_then(|dir| dir.parent())
                        .map(|root| root.to_path_buf());
                }
                s
            }),
            None => Settings::load(),
        };
        match loaded {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Configuration error: {e}");
                std::process::exit(1);
            }
        }
    };

    logging::init_with_config(&config.logging);

    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {e}");
        std::process::exit(1);
    }

    if let Err(e) = dispatch(cli.command, &config).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
