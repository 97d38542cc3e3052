//! CLI for sectorsim — cycle-accurate latency modeling for PCIe-attached SSDs.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sectorsim")]
#[command(about = "sectorsim — cycle-accurate latency modeling for PCIe-attached SSDs")]
#[command(version = sectorsim_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a synthetic workload through the simulator and report latencies
    Run(commands::run::RunArgs),

    /// Compare latency across host-link lane counts for one link preset
    Sweep(commands::sweep::SweepArgs),

    /// List link speed presets and their derived per-transfer delays
    Presets,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => commands::run::run(&args),
        Commands::Sweep(args) => commands::sweep::run(&args),
        Commands::Presets => commands::presets::run(),
    }
}
