//! FreqEnforcer CLI
//!
//! Command-line front end for the pitch correction pipeline.

use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::info;

use freqenforcer::cli::{commands, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    info!("FreqEnforcer v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd) => handle_command(cmd),
        None => {
            println!("FreqEnforcer v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Process {
            input,
            output,
            options,
        } => commands::process(&input, output.as_deref(), &options),
        Commands::Detect {
            input,
            json,
            config,
        } => commands::detect(&input, json, config.as_deref()),
        Commands::Batch {
            dir,
            out_dir,
            options,
        } => commands::batch(&dir, &out_dir, &options),
    }
}
