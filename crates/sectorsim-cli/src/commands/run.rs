use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Args;

use sectorsim_core::{RunWriter, SsdSystem};
use sectorsim_tests::{
    generate, run_workload, FixedLatencyBacking, HostMemoryModel, LatencyStats, WorkloadSpec,
};

#[derive(Args)]
pub struct RunArgs {
    /// Simulator configuration as JSON (defaults to the built-in config)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of requests in the workload
    #[arg(long, default_value_t = 1000)]
    pub requests: usize,

    /// Fraction of requests that are reads
    #[arg(long, default_value_t = 0.5)]
    pub read_fraction: f64,

    /// Largest request size in sectors
    #[arg(long, default_value_t = 8)]
    pub max_sectors: u32,

    /// Address space size in sectors
    #[arg(long, default_value_t = 1 << 20)]
    pub address_sectors: u64,

    /// Requests kept outstanding at once
    #[arg(long, default_value_t = 4)]
    pub queue_depth: usize,

    /// Backing store latency in backing-store ticks
    #[arg(long, default_value_t = 50)]
    pub backing_latency: u32,

    /// Host memory latency in external ticks (DMA runs only)
    #[arg(long, default_value_t = 10)]
    pub dma_latency: u32,

    /// Submit addresses with random intra-sector offsets
    #[arg(long)]
    pub unaligned: bool,

    /// Workload seed; equal seeds replay equal workloads
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// Record the run (run.json, latencies.csv, summary.json) under this directory
    #[arg(long)]
    pub record: Option<PathBuf>,
}

pub fn run(args: &RunArgs) {
    let config = super::load_config(args.config.as_deref());

    let spec = WorkloadSpec {
        requests: args.requests,
        read_fraction: args.read_fraction,
        max_sectors: args.max_sectors,
        address_sectors: args.address_sectors,
        unaligned: args.unaligned,
        dma: config.enable_dma,
        seed: args.seed,
    };
    let requests = generate(&spec);

    let backing = FixedLatencyBacking::new(args.backing_latency.max(1));
    let mut system = match SsdSystem::new(0, config, Box::new(backing)) {
        Ok(system) => system,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let mut memory = system
        .config()
        .enable_dma
        .then(|| HostMemoryModel::new(args.dma_latency.max(1)));
    if let Some(memory) = &memory {
        system.register_dma(memory.dma_callback(), spec.dma_memory_span());
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        if let Err(e) = ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed)) {
            eprintln!("warning: could not install interrupt handler: {e}");
        }
    }

    // Generous drain bound: a stuck pipeline is a bug, not a slow run.
    let max_updates = (args.requests as u64 + 1) * 100_000_000;
    let result = run_workload(
        &mut system,
        &requests,
        args.queue_depth,
        max_updates,
        memory.as_mut(),
        Some(&stop),
    );

    if stop.load(Ordering::Relaxed) {
        println!("interrupted: drained in-flight requests and stopped early");
    }

    let stats = LatencyStats::from_latencies(&result.latencies());
    println!("\n{}", "=".repeat(60));
    println!("SECTORSIM RUN REPORT");
    println!("{}", "=".repeat(60));
    println!(
        "Requests:  {} completed ({} reads, {} writes)",
        stats.count, result.reads, result.writes
    );
    println!("Simulated: {} internal ticks", result.total_cycles);
    println!(
        "Latency:   min {} | mean {:.1} | p50 {} | p95 {} | p99 {} | max {}",
        stats.min, stats.mean, stats.p50, stats.p95, stats.p99, stats.max
    );

    if let Some(dir) = &args.record {
        match record_run(dir, &system, &result) {
            Ok(run_dir) => println!("Recorded:  {run_dir}"),
            Err(e) => {
                eprintln!("could not record run: {e}");
                std::process::exit(1);
            }
        }
    }
}

fn record_run(
    dir: &std::path::Path,
    system: &SsdSystem,
    result: &sectorsim_tests::RunResult,
) -> std::io::Result<String> {
    let mut writer = RunWriter::new(dir, system.config())?;
    for record in &result.records {
        writer.record(record)?;
    }
    let run_dir = writer.run_dir().display().to_string();
    writer.finish()?;
    Ok(run_dir)
}
