//! Multi-tile test-pattern driver.
//!
//! The [`Driver`] owns one [`TileRuntime`] per tile, the completion
//! correlator and the shared pattern generator. It borrows a
//! [`MemoryTransport`] on every call and is driven from outside:
//!
//! ```text
//! loop {
//!     transport advances ──► completions ──► Driver::handle_completion
//!     Driver::tick ──► each tile issues 0 or 1 requests
//! }
//! ```
//!
//! [`Driver::service`] does one such round: drain completions, then tick.
//!
//! # Example
//!
//! ```
//! use golem_driver::device::{MmioTile, TestComputeArray, TileConfig};
//! use golem_driver::driver::{Driver, DriverOptions};
//! use golem_driver::transport::{BusOptions, MmioBus};
//!
//! let config = TileConfig::new(0x1000, 1, 4, 4, 1, 1, 2);
//! let tile = MmioTile::new(config, Box::new(TestComputeArray::new(3))).unwrap();
//! let mut bus = MmioBus::new(vec![tile], BusOptions::default()).unwrap();
//! let mut driver = Driver::new(vec![config], DriverOptions::default()).unwrap();
//!
//! while !driver.service(&mut bus).unwrap().is_done() {
//!     bus.advance().unwrap();
//! }
//! assert_eq!(driver.tile(0).unwrap().tests_completed(), 1);
//! ```

pub mod correlator;
pub mod error;
pub mod pattern;
pub mod tile;

pub use correlator::{CompletionCorrelator, PendingRequest, RequestTag};
pub use error::DriverError;
pub use pattern::{PatternGenerator, PATTERN_MODULUS};
pub use tile::{PollPolicy, TilePhase, TileRuntime, TileStats};

use crate::config::{validate_options, validate_tiles, DriverParams};
use crate::device::TileConfig;
use crate::transport::{Completion, MemoryTransport};
use tile::{StepContext, StepOutcome};

/// Global driver options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    /// Test iterations per tile (at least 1).
    pub num_tests: u32,
    /// Seed of the shared pattern generator.
    pub rng_seed: u64,
    /// Status polling limits.
    pub poll: PollPolicy,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            num_tests: 1,
            rng_seed: 85,
            poll: PollPolicy::default(),
        }
    }
}

/// Result of a driver tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// At least one tile still has work.
    Running,
    /// The last tile reached DONE on this tick.
    Finished,
    /// The driver had already finished; nothing was done.
    AlreadyFinished,
}

impl TickStatus {
    /// Check if the run is over.
    pub fn is_done(&self) -> bool {
        !matches!(self, TickStatus::Running)
    }
}

/// Orchestrates all tiles over a memory transport.
#[derive(Debug)]
pub struct Driver {
    tiles: Vec<TileRuntime>,
    correlator: CompletionCorrelator,
    patterns: PatternGenerator,
    options: DriverOptions,
    ticks: u64,
    finished_at: Option<u64>,
}

impl Driver {
    /// Create a driver for the given tiles.
    ///
    /// Input patterns for the first test are generated here, in tile order.
    pub fn new(tiles: Vec<TileConfig>, options: DriverOptions) -> Result<Self, DriverError> {
        validate_options(&options)?;
        validate_tiles(&tiles)?;

        let mut patterns = PatternGenerator::new(options.rng_seed);
        let tiles: Vec<TileRuntime> = tiles
            .into_iter()
            .enumerate()
            .map(|(i, config)| {
                log::debug!("T{}: {}", i, config);
                TileRuntime::new(i, config, options.num_tests, options.poll, &mut patterns)
            })
            .collect::<Result<_, _>>()?;

        log::info!(
            "Driver: {} tiles, {} tests each, seed {}",
            tiles.len(),
            options.num_tests,
            options.rng_seed
        );

        Ok(Self {
            tiles,
            correlator: CompletionCorrelator::new(),
            patterns,
            options,
            ticks: 0,
            finished_at: None,
        })
    }

    /// Create a driver from configuration parameters.
    pub fn from_params(params: &DriverParams) -> Result<Self, DriverError> {
        Self::new(params.tile_configs()?, params.options())
    }

    /// Driver options.
    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Route a completion to the tile that issued the request.
    pub fn handle_completion(&mut self, completion: Completion) -> Result<(), DriverError> {
        let entry = self.correlator.resolve(completion.id())?;
        log::trace!("T{}: {} completion {}", entry.tile, completion.kind(), completion.id());

        let tile = self.tiles.get_mut(entry.tile).ok_or(DriverError::UnknownRequest {
            id: completion.id(),
        })?;
        tile.on_completion(entry, &completion)
    }

    /// Advance every tile by one step, in index order.
    ///
    /// Returns [`TickStatus::Finished`] exactly once, on the tick where the
    /// last tile reaches DONE. Later ticks issue nothing.
    pub fn tick<T: MemoryTransport + ?Sized>(&mut self, transport: &mut T) -> Result<TickStatus, DriverError> {
        if self.finished_at.is_some() {
            return Ok(TickStatus::AlreadyFinished);
        }
        self.ticks += 1;

        let mut ctx = StepContext {
            correlator: &mut self.correlator,
            patterns: &mut self.patterns,
        };
        let mut all_done = true;
        for tile in &mut self.tiles {
            if tile.step(transport, &mut ctx)? != StepOutcome::Done {
                all_done = false;
            }
        }

        if all_done {
            self.finished_at = Some(self.ticks);
            log::info!("Driver: all {} tiles done after {} ticks", self.tiles.len(), self.ticks);
            return Ok(TickStatus::Finished);
        }
        Ok(TickStatus::Running)
    }

    /// Deliver all ready completions, then tick.
    pub fn service<T: MemoryTransport + ?Sized>(&mut self, transport: &mut T) -> Result<TickStatus, DriverError> {
        while let Some(completion) = transport.poll_completion() {
            self.handle_completion(completion)?;
        }
        self.tick(transport)
    }

    /// Check if every tile finished all its tests.
    pub fn is_done(&self) -> bool {
        self.tiles.iter().all(TileRuntime::is_done)
    }

    /// Get a tile by index.
    pub fn tile(&self, index: usize) -> Option<&TileRuntime> {
        self.tiles.get(index)
    }

    /// All tiles.
    pub fn tiles(&self) -> &[TileRuntime] {
        &self.tiles
    }

    /// Completion correlator (in-flight requests).
    pub fn correlator(&self) -> &CompletionCorrelator {
        &self.correlator
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Tick on which the run finished.
    pub fn finished_at(&self) -> Option<u64> {
        self.finished_at
    }

    /// Request statistics summed over all tiles.
    pub fn stats(&self) -> TileStats {
        self.tiles.iter().fold(TileStats::default(), |mut acc, t| {
            let s = t.stats();
            acc.requests += s.requests;
            acc.posted_writes += s.posted_writes;
            acc.tracked += s.tracked;
            acc.data_reads += s.data_reads;
            acc.polls += s.polls;
            acc.bytes_written += s.bytes_written;
            acc.bytes_read += s.bytes_read;
            acc
        })
    }
}
