//! Driver error types.
//!
//! Every variant is fatal: the run stops and the diagnostic names the tile,
//! phase and offending value.

use thiserror::Error;

use super::tile::TilePhase;
use crate::config::ConfigError;
use crate::transport::{RequestId, TransportError};

/// Fatal driver error.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Invalid setup parameters.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The transport handed out an id that is already being tracked.
    #[error("Request {id} already tracked for tile {tile}")]
    DuplicateRequest { id: RequestId, tile: usize },

    /// A completion arrived for a request the driver never tracked
    /// (or already resolved).
    #[error("Completion for unknown request {id}: transport and driver out of sync")]
    UnknownRequest { id: RequestId },

    /// A completion of the wrong kind arrived for a tracked request.
    #[error("Tile {tile} in {phase}: expected {expected} completion for {id}, got {got}")]
    CompletionMismatch {
        tile: usize,
        phase: TilePhase,
        id: RequestId,
        expected: &'static str,
        got: &'static str,
    },

    /// Read data length does not match the request.
    #[error("Tile {tile} in {phase}: read {id} returned {got} bytes, expected {expected}")]
    ShortRead {
        tile: usize,
        phase: TilePhase,
        id: RequestId,
        expected: u64,
        got: usize,
    },

    /// The status register never reported done within the poll budget.
    #[error("Tile {tile}: status not done after {attempts} polls (status byte 0x{last_status:02x})")]
    PollTimeout { tile: usize, attempts: u32, last_status: u8 },

    /// A tracked completion arrived while the tile was not waiting for it.
    #[error("Tile {tile} in {phase}: unexpected completion {id}")]
    UnexpectedCompletion { tile: usize, phase: TilePhase, id: RequestId },

    /// Internal chunking invariant violated.
    #[error("Tile {tile} in {phase}: invariant violated: {detail}")]
    Invariant {
        tile: usize,
        phase: TilePhase,
        detail: String,
    },

    /// The transport rejected a request.
    #[error("Tile {tile} in {phase}: transport error: {source}")]
    Transport {
        tile: usize,
        phase: TilePhase,
        #[source]
        source: TransportError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_names_tile_and_phase() {
        let e = DriverError::Invariant {
            tile: 3,
            phase: TilePhase::WriteInput,
            detail: "cursor 9 > region 8".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "Tile 3 in WRITE_INPUT: invariant violated: cursor 9 > region 8"
        );
    }

    #[test]
    fn test_unknown_request_message() {
        let e = DriverError::UnknownRequest { id: RequestId(42) };
        assert!(e.to_string().contains("#42"));
    }
}
