// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dripline - multi-device WhatsApp outbound scheduler.
//!
//! This is the binary entry point.

mod serve;
mod status;
mod tick;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dripline_config::model::DriplineConfig;

/// Dripline - multi-device WhatsApp outbound scheduler.
#[derive(Parser, Debug)]
#[command(name = "dripline", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run enrollment, materialization, dispatch and sweeping until stopped.
    Serve,
    /// Show message, progress and campaign counts by status.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run one enrollment and materialization pass.
    Tick,
    /// Run one sweep of stuck and expired messages.
    Sweep,
}

fn load_config(path: Option<&PathBuf>) -> DriplineConfig {
    let loaded = match path {
        Some(path) => dripline_config::load_and_validate_path(path),
        None => dripline_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            dripline_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("dripline: use --help for available commands");
        return;
    };
    let config = load_config(cli.config.as_ref());

    let result = match command {
        Commands::Serve => serve::run_serve(config).await,
        Commands::Status { json } => status::run_status(&config, json).await,
        Commands::Tick => tick::run_tick(&config).await,
        Commands::Sweep => tick::run_sweep(&config).await,
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
