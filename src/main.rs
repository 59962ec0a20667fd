//! golem-driver: run the multi-tile MMIO test-pattern driver against a
//! simulated bus.

use std::env;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{bail, Context};
use golem_driver::config::Config;
use golem_driver::testing::{RunOutcome, Simulation};

const DEFAULT_MAX_TICKS: u64 = 1_000_000;

fn print_usage() {
    println!("Usage: golem-driver [CONFIG.toml] [--max-ticks N] [--dump] [--sample-config]");
    println!();
    println!("Options:");
    println!("  --max-ticks N     Stop after N bus ticks (default {})", DEFAULT_MAX_TICKS);
    println!("  --dump            Hexdump each tile's memory after the run");
    println!("  --sample-config   Print a sample config file and exit");
    println!();
    println!("Config is also read from ./golem-driver.toml and the user config dir.");
    println!("RUST_LOG=debug shows phase transitions, RUST_LOG=trace every request.");
}

fn main() -> anyhow::Result<ExitCode> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut config_path = None;
    let mut max_ticks = DEFAULT_MAX_TICKS;
    let mut dump = false;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(ExitCode::SUCCESS);
            }
            "--sample-config" => {
                print!("{}", Config::sample_config());
                return Ok(ExitCode::SUCCESS);
            }
            "--dump" => dump = true,
            "--max-ticks" => {
                let value = iter.next().context("--max-ticks needs a value")?;
                max_ticks = value
                    .parse()
                    .with_context(|| format!("Invalid --max-ticks value: {}", value))?;
            }
            other if other.starts_with('-') => bail!("Unknown option: {}", other),
            other => config_path = Some(other.to_string()),
        }
    }

    let config = Config::load(config_path.as_deref().map(Path::new)).context("Failed to load configuration")?;
    let mut sim = Simulation::from_config(&config)?;

    println!("golem-driver: {} tiles, {} tests each", sim.driver().tiles().len(), config.driver.num_tests());
    let outcome = sim.run(max_ticks);
    println!();

    print_results(&sim);

    if dump {
        println!();
        print_dump(&sim);
    }

    println!();
    println!("Result: {}", outcome);

    let passed = match outcome {
        RunOutcome::Pass { .. } => match sim.verify() {
            Ok(()) => true,
            Err(e) => {
                println!("Verification failed: {:#}", e);
                false
            }
        },
        RunOutcome::Fail { .. } | RunOutcome::Timeout { .. } => false,
    };

    Ok(if passed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn print_results(sim: &Simulation) {
    println!("Tile  Base              Tests   Phase         Requests  Posted  Polls");
    println!("----  ----------------  ------  ------------  --------  ------  -----");
    for tile in sim.driver().tiles() {
        let stats = tile.stats();
        println!(
            "{:>4}  0x{:014x}  {:>6}  {:<12}  {:>8}  {:>6}  {:>5}",
            tile.index(),
            tile.config().base_addr,
            tile.tests_completed(),
            tile.phase(),
            stats.requests,
            stats.posted_writes,
            stats.polls
        );
    }

    let bus = sim.bus().stats();
    println!();
    println!(
        "Bus: {} writes ({} posted), {} reads, {} completions",
        bus.writes, bus.posted_writes, bus.reads, bus.completions_delivered
    );
}

fn print_dump(sim: &Simulation) {
    for (i, tile) in sim.bus().tiles().iter().enumerate() {
        println!("Tile {} ({})", i, tile.config());
        for region in tile.memory().regions() {
            println!(
                "  {} @ 0x{:x} ({} bytes, {} written, {} read)",
                region.name, region.base_address, region.size, region.bytes_written, region.bytes_read
            );
            for line in tile.memory().hexdump(region.base_address, region.size).lines() {
                println!("    {}", line);
            }
        }
    }
}
