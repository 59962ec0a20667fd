//! Memory transport contract.
//!
//! The driver talks to tiles only through a [`MemoryTransport`]: an
//! asynchronous request/response channel. Every request gets a
//! [`RequestId`] at issue; non-posted writes and all reads later produce
//! exactly one [`Completion`] carrying that id, in any order relative to
//! issue. Posted writes never complete.
//!
//! # Usage
//!
//! ```
//! use golem_driver::transport::{MemoryTransport, MmioBus, BusOptions, Completion};
//! use golem_driver::device::{MmioTile, TestComputeArray, TileConfig};
//!
//! let config = TileConfig::new(0x1000, 1, 4, 4, 1, 1, 4);
//! let tile = MmioTile::new(config, Box::new(TestComputeArray::new(1))).unwrap();
//! let mut bus = MmioBus::new(vec![tile], BusOptions::default()).unwrap();
//!
//! let id = bus.write(0x1001, &[1, 2, 3, 4], false).unwrap();
//! while bus.in_flight() > 0 {
//!     bus.advance().unwrap();
//! }
//! assert!(matches!(bus.poll_completion(), Some(Completion::Write { id: done }) if done == id));
//! ```

pub mod bus;

pub use bus::{BusOptions, BusStats, MmioBus};

use thiserror::Error;

/// Transport-assigned request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Completion delivered for a non-posted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// A non-posted write finished.
    Write { id: RequestId },
    /// A read finished with the returned data.
    Read { id: RequestId, data: Vec<u8> },
}

impl Completion {
    /// Id of the request this completion answers.
    pub fn id(&self) -> RequestId {
        match self {
            Completion::Write { id } | Completion::Read { id, .. } => *id,
        }
    }

    /// Short name of the completion kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Completion::Write { .. } => "write",
            Completion::Read { .. } => "read",
        }
    }
}

/// Transport error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No device is mapped at the address.
    #[error("No device mapped at 0x{address:016x}")]
    Unmapped { address: u64 },

    /// The request runs past the end of the device window.
    #[error("Request 0x{address:016x}+{length} crosses the device window")]
    OutOfWindow { address: u64, length: u64 },

    /// Zero-length requests are not allowed.
    #[error("Zero-length request at 0x{address:016x}")]
    ZeroLength { address: u64 },

    /// The device rejected the access.
    #[error("Device error: {0}")]
    Device(String),
}

/// Asynchronous request/response memory channel.
pub trait MemoryTransport {
    /// Issue a write. Posted writes produce no completion.
    fn write(&mut self, address: u64, data: &[u8], posted: bool) -> Result<RequestId, TransportError>;

    /// Issue a read of `length` bytes. Always produces one completion.
    fn read(&mut self, address: u64, length: u32) -> Result<RequestId, TransportError>;

    /// Take the next delivered completion, if any.
    fn poll_completion(&mut self) -> Option<Completion>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_id() {
        let w = Completion::Write { id: RequestId(3) };
        let r = Completion::Read { id: RequestId(4), data: vec![1] };
        assert_eq!(w.id(), RequestId(3));
        assert_eq!(r.id(), RequestId(4));
        assert_eq!(w.kind(), "write");
        assert_eq!(r.kind(), "read");
    }

    #[test]
    fn test_error_display() {
        let e = TransportError::Unmapped { address: 0x10 };
        assert_eq!(e.to_string(), "No device mapped at 0x0000000000000010");
        assert_eq!(RequestId(7).to_string(), "#7");
    }
}
