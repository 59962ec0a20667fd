//! End-to-end simulation harness.
//!
//! Wires a [`Driver`] to an [`MmioBus`] of [`TestComputeArray`] tiles and
//! runs both in lockstep until the driver finishes, fails, or runs out of
//! ticks.

use anyhow::{bail, ensure, Context, Result};

use crate::config::Config;
use crate::device::memory::{decode_operands, encode_operands};
use crate::device::{MmioTile, TestComputeArray, TileConfig};
use crate::driver::{Driver, TickStatus};
use crate::transport::MmioBus;

/// Outcome of a simulation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// All tiles completed all tests.
    Pass { ticks: u64 },
    /// The driver or the bus reported a fatal error.
    Fail { message: String, ticks: u64 },
    /// The tick budget ran out first.
    Timeout { ticks: u64 },
}

impl RunOutcome {
    /// Check if the run passed.
    pub fn is_pass(&self) -> bool {
        matches!(self, RunOutcome::Pass { .. })
    }

    /// Ticks run.
    pub fn ticks(&self) -> u64 {
        match self {
            RunOutcome::Pass { ticks }
            | RunOutcome::Fail { ticks, .. }
            | RunOutcome::Timeout { ticks } => *ticks,
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Pass { ticks } => write!(f, "PASS after {} ticks", ticks),
            RunOutcome::Fail { message, ticks } => write!(f, "FAIL at tick {}: {}", ticks, message),
            RunOutcome::Timeout { ticks } => write!(f, "TIMEOUT after {} ticks", ticks),
        }
    }
}

/// A driver and the bus it drives.
#[derive(Debug)]
pub struct Simulation {
    driver: Driver,
    bus: MmioBus,
}

impl Simulation {
    /// Pair an existing driver and bus.
    pub fn new(driver: Driver, bus: MmioBus) -> Self {
        Self { driver, bus }
    }

    /// Build tiles, bus and driver from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let tile_configs = config
            .driver
            .tile_configs()
            .context("Invalid tile configuration")?;

        let latency = config.array_latency();
        let tiles = tile_configs
            .iter()
            .map(|&cfg| {
                MmioTile::new(cfg, Box::new(TestComputeArray::new(latency)))
                    .with_context(|| format!("Failed to build tile at 0x{:x}", cfg.base_addr))
            })
            .collect::<Result<Vec<_>>>()?;

        let bus = MmioBus::new(tiles, config.bus_options()).context("Failed to build bus")?;
        let driver = Driver::new(tile_configs, config.driver.options()).context("Failed to build driver")?;
        Ok(Self::new(driver, bus))
    }

    /// The driver.
    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// The bus and its tiles.
    pub fn bus(&self) -> &MmioBus {
        &self.bus
    }

    /// Run until the driver finishes or `max_ticks` bus ticks have elapsed.
    pub fn run(&mut self, max_ticks: u64) -> RunOutcome {
        loop {
            match self.driver.service(&mut self.bus) {
                Ok(TickStatus::Running) => {}
                Ok(_) => {
                    log::info!("Simulation passed after {} ticks", self.bus.now());
                    return RunOutcome::Pass { ticks: self.bus.now() };
                }
                Err(e) => {
                    log::error!("Simulation failed: {}", e);
                    return RunOutcome::Fail {
                        message: e.to_string(),
                        ticks: self.bus.now(),
                    };
                }
            }

            if self.bus.now() >= max_ticks {
                log::warn!("Simulation timed out after {} ticks", max_ticks);
                return RunOutcome::Timeout { ticks: self.bus.now() };
            }
            if let Err(e) = self.bus.advance() {
                return RunOutcome::Fail {
                    message: e.to_string(),
                    ticks: self.bus.now(),
                };
            }
        }
    }

    /// Check every tile's last output against what [`TestComputeArray`]
    /// computes from the last input.
    pub fn verify(&self) -> Result<()> {
        for tile in self.driver.tiles() {
            let expected = expected_output(tile.config(), tile.input_buffer())?;
            if tile.output_buffer() != expected.as_slice() {
                bail!(
                    "Tile {}: output mismatch\n  expected {:02x?}\n  got      {:02x?}",
                    tile.index(),
                    expected,
                    tile.output_buffer()
                );
            }
        }
        Ok(())
    }
}

/// Output region contents [`TestComputeArray`] produces for `input`.
pub fn expected_output(config: &TileConfig, input: &[u8]) -> Result<Vec<u8>> {
    ensure!(
        input.len() as u64 == config.input_region_size(),
        "input is {} bytes, region is {}",
        input.len(),
        config.input_region_size()
    );

    let in_size = config.input_array_size() as usize;
    let out_size = config.output_array_size() as usize;
    let mut out = vec![0u8; config.output_region_size() as usize];

    for array_id in 0..config.array_count {
        let a = array_id as usize;
        let operands = if in_size > 0 {
            decode_operands(&input[a * in_size..(a + 1) * in_size], config.input_width)?
        } else {
            Vec::new()
        };
        let values: Vec<u64> = (0..config.output_len as usize)
            .map(|i| operands.get(i).copied().unwrap_or(0).wrapping_add(array_id as u64))
            .collect();
        if out_size > 0 {
            encode_operands(&values, config.output_width, &mut out[a * out_size..(a + 1) * out_size])?;
        }
    }
    Ok(out)
}
