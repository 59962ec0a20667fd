//! MMIO register model of a compute tile.
//!
//! The tile exposes its status bytes and data regions through plain reads
//! and writes. Writing a non-zero byte to an array's status register starts
//! that array; the result is written to the output region once the array
//! latency has elapsed, and the status byte then reads [`STATUS_DONE`].
//!
//! # Status Lifecycle
//!
//! ```text
//! ┌──────┐  write != 0  ┌──────┐  latency elapsed  ┌──────┐
//! │ IDLE ├─────────────►│ BUSY ├──────────────────►│ DONE │
//! └──────┘              └──────┘                   └──┬───┘
//!     ▲                                               │ write != 0
//!     │ write 0                                       ▼
//!     └───────────────────────────────────────── (BUSY again)
//! ```

use super::compute_array::ComputeArray;
use super::memory::{decode_operands, encode_operands, DataDirection, TileMemory, TileMemoryError};
use super::{TileConfig, STATUS_BUSY, STATUS_DONE, STATUS_IDLE};

/// An array computation waiting for its latency to elapse.
#[derive(Debug, Clone, Copy)]
struct PendingCompute {
    array_id: u32,
    ready_at: u64,
}

/// Register model of one tile.
pub struct MmioTile {
    config: TileConfig,
    memory: TileMemory,
    array: Box<dyn ComputeArray>,
    pending: Vec<PendingCompute>,
    now: u64,
    computations_started: u64,
    computations_finished: u64,
}

impl MmioTile {
    /// Create a tile backed by the given compute array.
    pub fn new(config: TileConfig, array: Box<dyn ComputeArray>) -> Result<Self, TileMemoryError> {
        let mut memory = TileMemory::new(config.base_addr, config.window_size() as usize);
        if config.array_count > 0 {
            memory.add_region(
                "status",
                config.status_start(),
                config.array_count as usize,
                DataDirection::Bidirectional,
            )?;
        }
        if config.input_region_size() > 0 {
            memory.add_region(
                "input",
                config.input_start(),
                config.input_region_size() as usize,
                DataDirection::Input,
            )?;
        }
        if config.output_region_size() > 0 {
            memory.add_region(
                "output",
                config.output_start(),
                config.output_region_size() as usize,
                DataDirection::Output,
            )?;
        }

        Ok(Self {
            config,
            memory,
            array,
            pending: Vec::new(),
            now: 0,
            computations_started: 0,
            computations_finished: 0,
        })
    }

    /// Tile geometry.
    pub fn config(&self) -> &TileConfig {
        &self.config
    }

    /// Tile memory (for inspection).
    pub fn memory(&self) -> &TileMemory {
        &self.memory
    }

    /// Check if an address range lies inside this tile's window.
    pub fn contains_range(&self, addr: u64, len: u64) -> bool {
        addr >= self.config.base_addr
            && addr.saturating_add(len) <= self.config.window_end()
    }

    /// Number of arrays started so far.
    pub fn computations_started(&self) -> u64 {
        self.computations_started
    }

    /// Number of arrays that finished computing.
    pub fn computations_finished(&self) -> u64 {
        self.computations_finished
    }

    /// Number of arrays currently computing.
    pub fn busy_arrays(&self) -> usize {
        self.pending.len()
    }

    /// Current status byte of an array.
    pub fn status(&self, array_id: u32) -> Option<u8> {
        self.memory
            .slice(self.config.status_addr(array_id), 1)
            .ok()
            .map(|s| s[0])
    }

    /// Handle a bus write.
    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), TileMemoryError> {
        let status_end = self.config.input_start();
        if !self.contains_range(addr, data.len() as u64) {
            return Err(TileMemoryError::OutOfBounds { address: addr, length: data.len() });
        }

        for (i, &byte) in data.iter().enumerate() {
            let byte_addr = addr + i as u64;
            if byte_addr >= status_end {
                // Data bytes from here on
                return self.memory.write_bytes(byte_addr, &data[i..]);
            }
            let array_id = (byte_addr - self.config.base_addr) as u32;
            self.write_status(array_id, byte)?;
        }
        Ok(())
    }

    /// Handle a bus read.
    pub fn read(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, TileMemoryError> {
        let mut buf = vec![0u8; len];
        self.memory.read_bytes(addr, &mut buf)?;
        Ok(buf)
    }

    fn write_status(&mut self, array_id: u32, value: u8) -> Result<(), TileMemoryError> {
        let addr = self.config.status_addr(array_id);
        let busy = self.pending.iter().any(|p| p.array_id == array_id);

        if busy {
            log::warn!(
                "Tile 0x{:x}: status write 0x{:02x} to busy array {} ignored",
                self.config.base_addr,
                value,
                array_id
            );
            return Ok(());
        }

        if value == STATUS_IDLE {
            return self.memory.write_bytes(addr, &[STATUS_IDLE]);
        }

        let latency = self.array.latency(array_id);
        self.pending.push(PendingCompute {
            array_id,
            ready_at: self.now + latency,
        });
        self.computations_started += 1;
        log::debug!(
            "Tile 0x{:x}: array {} started, done at tick {}",
            self.config.base_addr,
            array_id,
            self.now + latency
        );
        self.memory.write_bytes(addr, &[STATUS_BUSY])
    }

    /// Advance the tile to time `now`, finishing due computations.
    pub fn advance(&mut self, now: u64) -> Result<(), TileMemoryError> {
        self.now = now;

        let (due, waiting): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|p| p.ready_at <= now);
        self.pending = waiting;

        for job in due {
            self.finish(job.array_id)?;
        }
        Ok(())
    }

    fn finish(&mut self, array_id: u32) -> Result<(), TileMemoryError> {
        let cfg = self.config;
        let in_size = cfg.input_array_size() as usize;
        let out_size = cfg.output_array_size() as usize;
        let in_addr = cfg.input_start() + array_id as u64 * in_size as u64;
        let out_addr = cfg.output_start() + array_id as u64 * out_size as u64;

        let input = if in_size > 0 {
            decode_operands(self.memory.slice(in_addr, in_size)?, cfg.input_width)?
        } else {
            Vec::new()
        };
        let mut output = vec![0u64; cfg.output_len as usize];
        self.array.compute(array_id, &input, &mut output);

        if out_size > 0 {
            encode_operands(&output, cfg.output_width, self.memory.slice_mut(out_addr, out_size)?)?;
        }
        self.memory.write_bytes(cfg.status_addr(array_id), &[STATUS_DONE])?;
        self.computations_finished += 1;

        log::debug!("Tile 0x{:x}: array {} done", cfg.base_addr, array_id);
        Ok(())
    }
}

impl std::fmt::Debug for MmioTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmioTile")
            .field("config", &self.config)
            .field("busy_arrays", &self.pending.len())
            .field("computations_started", &self.computations_started)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::TestComputeArray;

    fn tile(latency: u64) -> MmioTile {
        // 2 arrays, 4 inputs x 1B, 4 outputs x 2B
        let config = TileConfig::new(0x1000, 2, 4, 4, 1, 2, 8);
        MmioTile::new(config, Box::new(TestComputeArray::new(latency))).unwrap()
    }

    #[test]
    fn test_regions_registered() {
        let t = tile(1);
        let mem = t.memory();
        assert_eq!(mem.region("status").unwrap().size, 2);
        assert_eq!(mem.region("input").unwrap().base_address, 0x1002);
        assert_eq!(mem.region("output").unwrap().base_address, 0x100A);
        assert_eq!(mem.size(), 2 + 8 + 16);
    }

    #[test]
    fn test_start_and_complete() {
        let mut t = tile(3);
        t.write(0x1002, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        // Start array 1 only
        t.write(0x1001, &[1]).unwrap();
        assert_eq!(t.status(0), Some(STATUS_IDLE));
        assert_eq!(t.status(1), Some(STATUS_BUSY));

        t.advance(2).unwrap();
        assert_eq!(t.status(1), Some(STATUS_BUSY));

        t.advance(3).unwrap();
        assert_eq!(t.status(1), Some(STATUS_DONE));

        // Array 1 inputs are 5..=8, outputs are input + 1 as 2-byte operands
        let out = t.read(0x1012, 8).unwrap();
        assert_eq!(out, vec![6, 0, 7, 0, 8, 0, 9, 0]);
        assert_eq!(t.computations_finished(), 1);
    }

    #[test]
    fn test_write_spanning_status_and_data() {
        let mut t = tile(0);
        // Last status byte plus first two input bytes
        t.write(0x1001, &[1, 0xAA, 0xBB]).unwrap();

        assert_eq!(t.status(1), Some(STATUS_BUSY));
        assert_eq!(t.read(0x1002, 2).unwrap(), vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_busy_write_ignored() {
        let mut t = tile(10);
        t.write(0x1000, &[1]).unwrap();
        t.write(0x1000, &[1]).unwrap();
        assert_eq!(t.computations_started(), 1);
        assert_eq!(t.busy_arrays(), 1);
    }

    #[test]
    fn test_restart_after_done() {
        let mut t = tile(0);
        t.write(0x1000, &[1]).unwrap();
        t.advance(0).unwrap();
        assert_eq!(t.status(0), Some(STATUS_DONE));

        t.write(0x1000, &[1]).unwrap();
        assert_eq!(t.status(0), Some(STATUS_BUSY));
        assert_eq!(t.computations_started(), 2);
    }

    #[test]
    fn test_contains_range() {
        let t = tile(0);
        assert!(t.contains_range(0x1000, 26));
        assert!(!t.contains_range(0x1000, 27));
        assert!(!t.contains_range(0xFFF, 1));
    }
}
