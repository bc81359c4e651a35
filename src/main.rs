mod app;
mod cli;
mod commands;
mod utils;

use clap::Parser;

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();

    if let Err(err) = app::run(cli) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
