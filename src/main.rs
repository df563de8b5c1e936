//! Mosaic CLI entry point
//!
//! Parses arguments, sets up logging, runs the command and renders errors
//! with their details and suggestions. Exits with status 1 on failure.

use clap::Parser;
use mosaic_cli::cli;
use mosaic_cli::core::user_friendly_error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    let config = cli.build_config();

    // RUST_LOG wins over the verbosity flags
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    if let Err(e) = cli.execute_with_config(config).await {
        user_friendly_error(e).display();
        std::process::exit(1);
    }
}
