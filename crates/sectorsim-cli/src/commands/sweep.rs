use clap::Args;

use sectorsim_core::{Config, LinkConfig, SsdSystem, VALID_LANE_COUNTS};
use sectorsim_tests::{generate, run_workload, FixedLatencyBacking, LatencyStats, WorkloadSpec};

#[derive(Args)]
pub struct SweepArgs {
    /// Host-link preset to sweep: sata2, sata3, pcie2, pcie3, dmi2
    #[arg(long, default_value = "pcie3")]
    pub preset: String,

    /// Number of requests per lane count
    #[arg(long, default_value_t = 500)]
    pub requests: usize,

    /// Largest request size in sectors
    #[arg(long, default_value_t = 8)]
    pub max_sectors: u32,

    /// Requests kept outstanding at once
    #[arg(long, default_value_t = 4)]
    pub queue_depth: usize,

    /// Backing store latency in backing-store ticks
    #[arg(long, default_value_t = 50)]
    pub backing_latency: u32,

    /// Workload seed; every lane count replays the same workload
    #[arg(long, default_value_t = 1)]
    pub seed: u64,
}

pub fn run(args: &SweepArgs) {
    let Some(bytes_per_sec) = super::parse_preset(&args.preset) else {
        eprintln!(
            "unknown preset {:?}; expected one of: {}",
            args.preset,
            super::PRESETS
                .iter()
                .map(|&(name, _)| name)
                .collect::<Vec<_>>()
                .join(", ")
        );
        std::process::exit(1);
    };

    let spec = WorkloadSpec {
        requests: args.requests,
        max_sectors: args.max_sectors,
        seed: args.seed,
        ..WorkloadSpec::default()
    };
    let requests = generate(&spec);

    println!("\nHost link {} across lane counts:\n", args.preset);
    println!(
        "{:>5} {:>14} {:>12} {:>12} {:>12}",
        "lanes", "total ticks", "mean", "p95", "max"
    );
    println!("{}", "-".repeat(60));

    for lanes in VALID_LANE_COUNTS {
        let config = Config {
            host_link: LinkConfig {
                bytes_per_sec,
                lanes,
                full_duplex: true,
            },
            enable_dma: false,
            ..Config::default()
        };
        let backing = FixedLatencyBacking::new(args.backing_latency.max(1));
        let mut system = match SsdSystem::new(0, config, Box::new(backing)) {
            Ok(system) => system,
            Err(e) => {
                eprintln!("invalid configuration: {e}");
                std::process::exit(1);
            }
        };

        let max_updates = (args.requests as u64 + 1) * 100_000_000;
        let result = run_workload(
            &mut system,
            &requests,
            args.queue_depth,
            max_updates,
            None,
            None,
        );
        let stats = LatencyStats::from_latencies(&result.latencies());
        println!(
            "{:>5} {:>14} {:>12.1} {:>12} {:>12}",
            lanes, result.total_cycles, stats.mean, stats.p95, stats.max
        );
    }
}
