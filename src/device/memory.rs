//! Backing store for a tile's MMIO window.
//!
//! The window is a flat byte array starting at the tile base address. Named
//! regions (status, input, output) are registered on top of it for
//! statistics and debugging.
//!
//! # Usage
//!
//! ```
//! use golem_driver::device::{TileMemory, DataDirection};
//!
//! let mut mem = TileMemory::new(0x1000, 64);
//! mem.add_region("input", 0x1000, 32, DataDirection::Input).unwrap();
//!
//! mem.write_bytes(0x1000, &[1, 2, 3, 4]).unwrap();
//! let mut buf = [0u8; 4];
//! mem.read_bytes(0x1000, &mut buf).unwrap();
//! assert_eq!(buf, [1, 2, 3, 4]);
//! ```

/// Direction of data flow for a memory region, seen from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    /// Driver writes, array reads
    Input,
    /// Array writes, driver reads
    Output,
    /// Both directions (status registers)
    Bidirectional,
}

/// A named region of the tile window.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    /// Region name ("status", "input", "output")
    pub name: String,
    /// First address of the region
    pub base_address: u64,
    /// Size in bytes
    pub size: usize,
    /// Direction of data flow
    pub direction: DataDirection,
    /// Bytes written through the bus
    pub bytes_written: usize,
    /// Bytes read through the bus
    pub bytes_read: usize,
}

impl MemoryRegion {
    /// Create a new region.
    pub fn new(name: impl Into<String>, base_address: u64, size: usize, direction: DataDirection) -> Self {
        Self {
            name: name.into(),
            base_address,
            size,
            direction,
            bytes_written: 0,
            bytes_read: 0,
        }
    }

    /// Check if an address falls within this region.
    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base_address && addr < self.base_address + self.size as u64
    }

    /// Number of bytes of `[addr, addr + len)` that fall inside this region.
    fn overlap_len(&self, addr: u64, len: usize) -> usize {
        let start = addr.max(self.base_address);
        let end = addr
            .saturating_add(len as u64)
            .min(self.base_address.saturating_add(self.size as u64));
        end.saturating_sub(start) as usize
    }
}

/// Error type for tile memory operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileMemoryError {
    /// Access falls outside the tile window
    OutOfBounds { address: u64, length: usize },
    /// Region overlaps an existing region
    RegionOverlap { new_base: u64, existing_name: String },
    /// Operand width outside 1..=8 bytes
    BadWidth(u32),
}

impl std::fmt::Display for TileMemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfBounds { address, length } => {
                write!(f, "Access 0x{:016x}+{} outside tile window", address, length)
            }
            Self::RegionOverlap { new_base, existing_name } => {
                write!(f, "Region at 0x{:016x} overlaps with '{}'", new_base, existing_name)
            }
            Self::BadWidth(width) => write!(f, "Operand width {} not in 1..=8", width),
        }
    }
}

impl std::error::Error for TileMemoryError {}

/// Encode `values` as little-endian operands of `width` bytes into `out`.
///
/// `out` must hold `values.len() * width` bytes; wider values are truncated.
pub fn encode_operands(values: &[u64], width: u32, out: &mut [u8]) -> Result<(), TileMemoryError> {
    let w = check_width(width)?;
    for (chunk, value) in out.chunks_exact_mut(w).zip(values) {
        chunk.copy_from_slice(&value.to_le_bytes()[..w]);
    }
    Ok(())
}

/// Decode little-endian operands of `width` bytes.
pub fn decode_operands(bytes: &[u8], width: u32) -> Result<Vec<u64>, TileMemoryError> {
    let w = check_width(width)?;
    Ok(bytes
        .chunks_exact(w)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf[..w].copy_from_slice(chunk);
            u64::from_le_bytes(buf)
        })
        .collect())
}

fn check_width(width: u32) -> Result<usize, TileMemoryError> {
    if (1..=super::MAX_OPERAND_WIDTH).contains(&width) {
        Ok(width as usize)
    } else {
        Err(TileMemoryError::BadWidth(width))
    }
}

/// Flat memory covering one tile window.
pub struct TileMemory {
    /// First address of the window
    base: u64,
    /// Window contents
    data: Vec<u8>,
    /// Named regions for statistics
    regions: Vec<MemoryRegion>,
}

impl TileMemory {
    /// Create zeroed memory for a window of `size` bytes at `base`.
    pub fn new(base: u64, size: usize) -> Self {
        Self {
            base,
            data: vec![0; size],
            regions: Vec::new(),
        }
    }

    /// First address of the window.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Size of the window in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Register a named region.
    pub fn add_region(
        &mut self,
        name: impl Into<String>,
        base_address: u64,
        size: usize,
        direction: DataDirection,
    ) -> Result<(), TileMemoryError> {
        self.offset_of(base_address, size)?;
        for existing in &self.regions {
            if existing.overlap_len(base_address, size) > 0 {
                return Err(TileMemoryError::RegionOverlap {
                    new_base: base_address,
                    existing_name: existing.name.clone(),
                });
            }
        }
        self.regions.push(MemoryRegion::new(name, base_address, size, direction));
        Ok(())
    }

    /// Get a region by name.
    pub fn region(&self, name: &str) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// Find the region containing an address.
    pub fn region_at(&self, addr: u64) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    /// Get all regions.
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    /// Translate an address range to an offset into the window.
    fn offset_of(&self, addr: u64, len: usize) -> Result<usize, TileMemoryError> {
        let out_of_bounds = TileMemoryError::OutOfBounds { address: addr, length: len };
        let offset = addr.checked_sub(self.base).ok_or(out_of_bounds.clone())?;
        let end = offset.checked_add(len as u64).ok_or(out_of_bounds.clone())?;
        if end > self.data.len() as u64 {
            return Err(out_of_bounds);
        }
        Ok(offset as usize)
    }

    /// Write bytes at an absolute address.
    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) -> Result<(), TileMemoryError> {
        let offset = self.offset_of(addr, data.len())?;
        self.data[offset..offset + data.len()].copy_from_slice(data);
        for region in &mut self.regions {
            region.bytes_written += region.overlap_len(addr, data.len());
        }
        Ok(())
    }

    /// Read bytes at an absolute address.
    pub fn read_bytes(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), TileMemoryError> {
        let offset = self.offset_of(addr, buf.len())?;
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
        for region in &mut self.regions {
            region.bytes_read += region.overlap_len(addr, buf.len());
        }
        Ok(())
    }

    /// Borrow a slice of the window without touching statistics.
    pub fn slice(&self, addr: u64, len: usize) -> Result<&[u8], TileMemoryError> {
        let offset = self.offset_of(addr, len)?;
        Ok(&self.data[offset..offset + len])
    }

    /// Mutably borrow a slice of the window without touching statistics.
    pub fn slice_mut(&mut self, addr: u64, len: usize) -> Result<&mut [u8], TileMemoryError> {
        let offset = self.offset_of(addr, len)?;
        Ok(&mut self.data[offset..offset + len])
    }

    /// Hexdump a range for debugging.
    pub fn hexdump(&self, addr: u64, len: usize) -> String {
        let bytes = match self.slice(addr, len) {
            Ok(bytes) => bytes,
            Err(e) => return format!("<{}>\n", e),
        };

        let mut result = String::new();
        for (i, chunk) in bytes.chunks(16).enumerate() {
            result.push_str(&format!("{:016x}: ", addr + (i * 16) as u64));
            for (j, byte) in chunk.iter().enumerate() {
                if j == 8 {
                    result.push(' ');
                }
                result.push_str(&format!("{:02x} ", byte));
            }
            result.push('\n');
        }
        result
    }
}

impl std::fmt::Debug for TileMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileMemory")
            .field("base", &format_args!("0x{:x}", self.base))
            .field("size", &self.data.len())
            .field("regions", &self.regions.len())
            .finish()
    }
}
