mod scenario;
mod sim_loader;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use assetstream_common::{ManualClock, Vec3};
use assetstream_core::{
    MemoryProbe, MetricsSummary, ProcessMemoryProbe, StreamConfig, StreamingCoordinator,
    StreamingSnapshot,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::scenario::Scenario;
use crate::sim_loader::{SimLoader, TrackedSizesOnly};

#[derive(Parser)]
#[command(name = "assetstream", about = "Run asset streaming scenarios")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print engine version and crate info
    Info,
    /// Print the default streaming configuration as YAML
    Config,
    /// Run a scenario file against the simulated loader
    Run {
        /// Path to a YAML scenario
        scenario: PathBuf,
        /// Number of coordination cycles to run
        #[arg(short, long, default_value = "20")]
        cycles: usize,
        /// Print snapshots as JSON lines
        #[arg(long)]
        json: bool,
        /// Measure the real process RSS instead of tracked asset sizes
        #[arg(long)]
        process_memory: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Info => {
            println!("assetstream v{}", env!("CARGO_PKG_VERSION"));
            println!("core: {}", assetstream_core::crate_info());
            let config = StreamConfig::default();
            println!(
                "defaults: streaming_radius={}, unload_radius={}, max_concurrent_loads={}",
                config.streaming_radius, config.unload_radius, config.queue.max_concurrent_loads
            );
        }
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&StreamConfig::default())?);
        }
        Commands::Run {
            scenario,
            cycles,
            json,
            process_memory,
        } => {
            let scenario = Scenario::load(&scenario)?;
            let probe: Box<dyn MemoryProbe> = if process_memory {
                Box::new(ProcessMemoryProbe)
            } else {
                Box::new(TrackedSizesOnly)
            };
            let mut stdout = std::io::stdout().lock();
            let summary = run(&scenario, cycles, probe, json, &mut stdout)?;
            if json {
                writeln!(stdout, "{}", serde_json::to_string_pretty(&summary)?)?;
            } else {
                print_summary(&mut stdout, &summary)?;
            }
        }
    }

    Ok(())
}

/// Drive `cycles` coordination cycles along the scenario path, writing one
/// line per snapshot.
fn run(
    scenario: &Scenario,
    cycles: usize,
    probe: Box<dyn MemoryProbe>,
    json: bool,
    out: &mut impl Write,
) -> anyhow::Result<MetricsSummary> {
    let loader = Arc::new(SimLoader::new(&scenario.resources));
    let clock = ManualClock::new();
    let mut coordinator =
        StreamingCoordinator::new(scenario.config.clone(), loader, probe, Arc::new(clock.clone()))?;

    for spec in &scenario.resources {
        if !coordinator.register(
            spec.key.as_str(),
            Vec3::from_array(spec.position),
            spec.priority,
            spec.tags.iter().cloned(),
        ) {
            tracing::warn!(key = %spec.key, "skipping resource");
        }
    }

    let tick = Duration::try_from_secs_f64(scenario.tick_secs)?;
    for cycle in 0..cycles {
        let viewpoint = scenario.viewpoint(cycle, cycles);
        if let Some(snapshot) = coordinator.tick(viewpoint) {
            if json {
                writeln!(out, "{}", serde_json::to_string(&snapshot)?)?;
            } else {
                print_snapshot(out, &snapshot)?;
            }
        }
        clock.advance(tick);
    }

    coordinator.shutdown();
    Ok(coordinator.stats())
}

fn print_snapshot(out: &mut impl Write, s: &StreamingSnapshot) -> std::io::Result<()> {
    writeln!(
        out,
        "cycle {:>4} @ ({:>7.1}, {:>7.1}, {:>7.1}): loaded={} loading={} queued={} failed={} \
         started={}/{} evicted={} pressure={:?} memory={}B",
        s.cycle,
        s.viewpoint.x,
        s.viewpoint.y,
        s.viewpoint.z,
        s.loaded,
        s.loading,
        s.queued_loads,
        s.failed,
        s.loads_started,
        s.unloads_started,
        s.evicted,
        s.pressure,
        s.memory_bytes,
    )
}

fn print_summary(out: &mut impl Write, m: &MetricsSummary) -> std::io::Result<()> {
    writeln!(out, "--- summary ---")?;
    writeln!(
        out,
        "loads: {} attempted, {} ok, {} failed ({} timed out), {} cancelled, failure rate {:.1}%",
        m.load_attempts,
        m.load_successes,
        m.load_failures,
        m.load_timeouts,
        m.load_cancellations,
        m.load_failure_rate * 100.0
    )?;
    writeln!(
        out,
        "load time: avg {:.2}ms, min {:.2}ms, max {:.2}ms",
        m.avg_load_ms, m.min_load_ms, m.max_load_ms
    )?;
    writeln!(
        out,
        "unloads: {} attempted, {} ok, {} failed; evictions: {}",
        m.unload_attempts, m.unload_successes, m.unload_failures, m.evictions
    )?;
    writeln!(
        out,
        "memory: current {}B, peak {}B; cycle avg {:.3}ms, max {:.3}ms",
        m.current_memory_bytes, m.peak_memory_bytes, m.avg_cycle_ms, m.max_cycle_ms
    )
}
