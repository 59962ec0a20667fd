//! Two tiles with different geometries, out-of-order completions and
//! several test iterations.
//!
//! Run with: `RUST_LOG=debug cargo run --example two_tiles`

use golem_driver::device::{MmioTile, TestComputeArray, TileConfig};
use golem_driver::driver::{Driver, DriverOptions, PollPolicy};
use golem_driver::testing::Simulation;
use golem_driver::transport::{BusOptions, MmioBus};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let configs = vec![
        // 2 arrays of 8 one-byte operands, 4-byte requests
        TileConfig::new(0x1000, 2, 8, 8, 1, 1, 4),
        // 3 arrays of 3 two-byte operands in, 2 four-byte operands out
        TileConfig::new(0x2000, 3, 3, 2, 2, 4, 5),
    ];

    let tiles = configs
        .iter()
        .map(|&cfg| MmioTile::new(cfg, Box::new(TestComputeArray::new(20))))
        .collect::<Result<Vec<_>, _>>()?;
    let bus = MmioBus::new(tiles, BusOptions { latency: 3, jitter: 5, seed: 7 })?;

    let options = DriverOptions {
        num_tests: 3,
        rng_seed: 85,
        poll: PollPolicy { max_attempts: 64, interval: 4 },
    };
    let driver = Driver::new(configs, options)?;

    let mut sim = Simulation::new(driver, bus);
    let outcome = sim.run(100_000);
    println!("{}", outcome);

    for tile in sim.driver().tiles() {
        println!(
            "tile {}: {} tests, input {:?} -> output {:02x?}",
            tile.index(),
            tile.tests_completed(),
            tile.input_buffer(),
            tile.output_buffer()
        );
    }
    println!("driver stats: {:?}", sim.driver().stats());
    println!("bus stats: {:?}", sim.bus().stats());

    sim.verify()?;
    Ok(())
}
