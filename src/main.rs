// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "usbcam")]
#[command(about = "Control and capture from USB (V4L2) cameras")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Capture device node (overrides the config file)
    #[arg(short, long, global = true)]
    device: Option<String>,

    /// Use a simulated camera instead of real hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Config file (default: <config dir>/usbcam/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Show the formats the device supports
    Formats,

    /// Show device controls
    Controls {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set controls, e.g. `set brightness=10 auto_exposure=1`
    Set {
        /// NAME=VALUE pairs; NAME is an identifier, label or id
        #[arg(required = true)]
        assignments: Vec<String>,
    },

    /// Reset all writable controls to their defaults
    Defaults,

    /// Save a single frame
    Snap {
        /// Write to this file instead of an automatic name
        #[arg(long)]
        file: Option<PathBuf>,

        #[command(flatten)]
        export: cli::ExportArgs,
    },

    /// Save a burst of consecutive frames
    Burst {
        /// Number of frames (default: from config)
        #[arg(short = 'n', long)]
        count: Option<u32>,

        #[command(flatten)]
        export: cli::ExportArgs,
    },

    /// Stream frames and report throughput
    Stream {
        /// How long to stream (Ctrl+C stops early)
        #[arg(short, long, default_value = "10")]
        seconds: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=usbcam=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let options = cli::Options {
        device: cli.device,
        simulate: cli.simulate,
        config: cli.config,
    };

    match cli.command {
        Commands::List => cli::list_cameras(&options),
        Commands::Formats => cli::show_formats(&options),
        Commands::Controls { json } => cli::show_controls(&options, json),
        Commands::Set { assignments } => cli::set_controls(&options, &assignments),
        Commands::Defaults => cli::reset_controls(&options),
        Commands::Snap { file, export } => cli::snap(&options, file.as_deref(), &export),
        Commands::Burst { count, export } => cli::burst(&options, count, &export),
        Commands::Stream { seconds } => cli::stream(&options, seconds),
    }
}
