//! Device models for MMIO compute tiles.
//!
//! This module provides:
//! - Tile address geometry (`TileConfig`)
//! - The compute-array contract and a trivial test array
//! - Region-tracked tile memory
//! - An MMIO register model of a complete tile
//!
//! # Tile Address Map
//!
//! Each tile occupies one contiguous MMIO window. One status byte per array
//! precedes the data regions:
//!
//! ```text
//!   base                      input_start                output_start          window_end
//!    |                            |                           |                     |
//!    v                            v                           v                     v
//!    +----+----+----+-------------+---------------------------+---------------------+
//!    | S0 | S1 | .. | S(n-1)      | input operands (array 0..n) | output operands     |
//!    +----+----+----+-------------+---------------------------+---------------------+
//!      1 byte per array             n * in_len * in_width        n * out_len * out_width
//! ```
//!
//! # Example
//!
//! ```
//! use golem_driver::device::TileConfig;
//!
//! let tile = TileConfig::new(0x1000, 2, 4, 4, 1, 2, 8);
//! assert_eq!(tile.input_start(), 0x1002);
//! assert_eq!(tile.input_region_size(), 8);
//! assert_eq!(tile.output_start(), 0x100A);
//! assert_eq!(tile.output_region_size(), 16);
//! ```

pub mod compute_array;
pub mod memory;
pub mod mmio_tile;

pub use compute_array::{ComputeArray, TestComputeArray};
pub use memory::{DataDirection, MemoryRegion, TileMemory, TileMemoryError};
pub use mmio_tile::MmioTile;

/// Status byte of an array that has not been started (or was reset).
pub const STATUS_IDLE: u8 = 0;

/// Status byte of an array that is computing.
pub const STATUS_BUSY: u8 = 1;

/// Status byte of an array whose result is ready in the output region.
pub const STATUS_DONE: u8 = 2;

/// Value the driver writes to a status byte to start an array.
///
/// Any non-zero value triggers computation.
pub const STATUS_START: u8 = 1;

/// Largest operand width in bytes (operands are held as `u64`).
pub const MAX_OPERAND_WIDTH: u32 = 8;

/// Immutable geometry of one tile.
///
/// All sizes derived from this config are in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileConfig {
    /// Base MMIO address (first status byte).
    pub base_addr: u64,
    /// Number of independent arrays in the tile.
    pub array_count: u32,
    /// Input vector length (operands per array).
    pub input_len: u32,
    /// Output vector length (operands per array).
    pub output_len: u32,
    /// Input operand width in bytes.
    pub input_width: u32,
    /// Output operand width in bytes.
    pub output_width: u32,
    /// Largest byte size of a single memory request.
    pub max_request: u32,
}

impl TileConfig {
    /// Create a tile config.
    pub fn new(
        base_addr: u64,
        array_count: u32,
        input_len: u32,
        output_len: u32,
        input_width: u32,
        output_width: u32,
        max_request: u32,
    ) -> Self {
        Self {
            base_addr,
            array_count,
            input_len,
            output_len,
            input_width,
            output_width,
            max_request,
        }
    }

    /// Address of the first status byte.
    #[inline]
    pub fn status_start(&self) -> u64 {
        self.base_addr
    }

    /// Address of the status byte for one array.
    #[inline]
    pub fn status_addr(&self, array_id: u32) -> u64 {
        self.base_addr + array_id as u64
    }

    /// Bytes of input data per array.
    #[inline]
    pub fn input_array_size(&self) -> u64 {
        self.input_len as u64 * self.input_width as u64
    }

    /// Bytes of output data per array.
    #[inline]
    pub fn output_array_size(&self) -> u64 {
        self.output_len as u64 * self.output_width as u64
    }

    /// First byte of the input region.
    #[inline]
    pub fn input_start(&self) -> u64 {
        self.base_addr + self.array_count as u64
    }

    /// Total bytes of input data across all arrays.
    #[inline]
    pub fn input_region_size(&self) -> u64 {
        self.input_array_size() * self.array_count as u64
    }

    /// First byte of the output region.
    #[inline]
    pub fn output_start(&self) -> u64 {
        self.input_start() + self.input_region_size()
    }

    /// Total bytes of output data across all arrays.
    #[inline]
    pub fn output_region_size(&self) -> u64 {
        self.output_array_size() * self.array_count as u64
    }

    /// Total bytes spanned by the tile's MMIO window.
    #[inline]
    pub fn window_size(&self) -> u64 {
        self.array_count as u64 + self.input_region_size() + self.output_region_size()
    }

    /// Window size, or `None` if the geometry does not fit in 64 bits.
    ///
    /// The other size accessors assume this succeeded.
    pub fn checked_window_size(&self) -> Option<u64> {
        let arrays = self.array_count as u64;
        let input = self.input_array_size().checked_mul(arrays)?;
        let output = self.output_array_size().checked_mul(arrays)?;
        arrays.checked_add(input)?.checked_add(output)
    }

    /// One past the last byte of the MMIO window.
    #[inline]
    pub fn window_end(&self) -> u64 {
        self.base_addr + self.window_size()
    }

    /// Check if an address falls within the tile window.
    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base_addr && addr < self.window_end()
    }

    /// Check if two tile windows overlap.
    pub fn overlaps(&self, other: &TileConfig) -> bool {
        self.window_size() > 0
            && other.window_size() > 0
            && self.base_addr < other.window_end()
            && other.base_addr < self.window_end()
    }
}

impl std::fmt::Display for TileConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "0x{:x}: {} arrays, in {}x{}B, out {}x{}B, req {}B",
            self.base_addr,
            self.array_count,
            self.input_len,
            self.input_width,
            self.output_len,
            self.output_width,
            self.max_request
        )
    }
}
