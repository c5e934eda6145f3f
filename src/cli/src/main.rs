//! kiln-store entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use kiln_cli::commands::{dispatch, load_config, Cli};

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let level = tracing::Level::from(config.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str())),
        )
        .with_target(false)
        .init();

    if let Err(e) = dispatch(cli, config) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
