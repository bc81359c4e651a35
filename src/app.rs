use std::time::Instant;

use vosk_service_lib::{Config, ModelService};

use crate::cli::{Cli, Commands};
use crate::commands;

pub fn run(cli: Cli) -> Result<(), String> {
    let config = build_config(&cli);
    let start = Instant::now();
    let service = ModelService::new(config).map_err(|e| {
        log::error!("Failed to start model service: {e}");
        e.user_message().to_string()
    })?;
    log::debug!("Model service ready in {:?}", start.elapsed());

    match cli.command {
        Commands::List { all } => commands::list(&service, all),
        Commands::Installed => commands::installed(&service),
        Commands::Install { name } => commands::install(&service, &name),
        Commands::Select { name } => commands::select(&service, &name),
        Commands::Remove { name } => commands::remove(&service, &name),
        Commands::Status => commands::status(&service),
        Commands::Cancel => commands::cancel(&service),
        Commands::Recover => commands::recover(&service),
        Commands::Watch { interval } => commands::watch(&service, interval),
    }
}

fn build_config(cli: &Cli) -> Config {
    let mut config = Config::from_env();
    if let Some(root) = &cli.models_root {
        config.models_root = root.clone();
    }
    if let Some(url) = &cli.catalog_url {
        config.catalog_url = url.clone();
    }
    if cli.no_verify {
        config.verify_checksum = false;
    }
    config
}
