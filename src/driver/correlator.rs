//! Completion correlation.
//!
//! Maps in-flight request ids back to the tile that issued them. Two kinds
//! of entries exist:
//!
//! - **Tracked**: the final request of a phase. The tile waits on it; at
//!   most one per tile.
//! - **Data**: an intermediate output read. Its completion carries data that
//!   must land in the tile's output buffer, but it never gates the phase.
//!
//! Posted writes are never registered. A completion whose id is not present
//! is a protocol fault, never a transient condition.

use std::collections::HashMap;

use super::error::DriverError;
use crate::transport::RequestId;

/// What a correlated completion means for the tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTag {
    /// Final input chunk write.
    InputWrite,
    /// Final start-signal write.
    StartWrite,
    /// Status poll covering status bytes `[offset, offset + len)`.
    StatusPoll { offset: u64, len: u64 },
    /// Output read landing at byte `offset` of the output buffer.
    OutputRead { offset: u64, len: u64 },
}

/// A correlator entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    /// Tile that issued the request
    pub tile: usize,
    /// Meaning of the completion
    pub tag: RequestTag,
    /// Whether the tile's phase waits on this request
    pub tracked: bool,
}

/// Request id → owning tile table.
#[derive(Debug, Default)]
pub struct CompletionCorrelator {
    entries: HashMap<RequestId, PendingRequest>,
}

impl CompletionCorrelator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the tracked request of a phase.
    pub fn track(&mut self, id: RequestId, tile: usize, tag: RequestTag) -> Result<(), DriverError> {
        self.insert(id, PendingRequest { tile, tag, tracked: true })
    }

    /// Register a data-only request (intermediate output read).
    pub fn track_data(&mut self, id: RequestId, tile: usize, tag: RequestTag) -> Result<(), DriverError> {
        self.insert(id, PendingRequest { tile, tag, tracked: false })
    }

    fn insert(&mut self, id: RequestId, entry: PendingRequest) -> Result<(), DriverError> {
        if let Some(existing) = self.entries.get(&id) {
            return Err(DriverError::DuplicateRequest { id, tile: existing.tile });
        }
        self.entries.insert(id, entry);
        Ok(())
    }

    /// Remove and return the entry for a completed request.
    pub fn resolve(&mut self, id: RequestId) -> Result<PendingRequest, DriverError> {
        self.entries
            .remove(&id)
            .ok_or(DriverError::UnknownRequest { id })
    }

    /// Number of tracked (phase-gating) entries for a tile.
    pub fn tracked_for(&self, tile: usize) -> usize {
        self.entries
            .values()
            .filter(|e| e.tile == tile && e.tracked)
            .count()
    }

    /// Number of entries of any kind for a tile.
    pub fn outstanding_for(&self, tile: usize) -> usize {
        self.entries.values().filter(|e| e.tile == tile).count()
    }

    /// Total entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_and_resolve() {
        let mut c = CompletionCorrelator::new();
        c.track(RequestId(5), 1, RequestTag::InputWrite).unwrap();

        assert_eq!(c.tracked_for(1), 1);
        assert_eq!(c.tracked_for(0), 0);

        let entry = c.resolve(RequestId(5)).unwrap();
        assert_eq!(entry.tile, 1);
        assert_eq!(entry.tag, RequestTag::InputWrite);
        assert!(entry.tracked);
        assert!(c.is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut c = CompletionCorrelator::new();
        c.track(RequestId(1), 0, RequestTag::StartWrite).unwrap();

        let result = c.track_data(RequestId(1), 2, RequestTag::OutputRead { offset: 0, len: 2 });
        assert!(matches!(
            result,
            Err(DriverError::DuplicateRequest { id: RequestId(1), tile: 0 })
        ));
    }

    #[test]
    fn test_resolve_is_single_use() {
        let mut c = CompletionCorrelator::new();
        c.track(RequestId(9), 0, RequestTag::StartWrite).unwrap();
        c.resolve(RequestId(9)).unwrap();

        assert!(matches!(
            c.resolve(RequestId(9)),
            Err(DriverError::UnknownRequest { id: RequestId(9) })
        ));
    }

    #[test]
    fn test_data_entries_do_not_count_as_tracked() {
        let mut c = CompletionCorrelator::new();
        c.track_data(RequestId(1), 0, RequestTag::OutputRead { offset: 0, len: 4 }).unwrap();
        c.track_data(RequestId(2), 0, RequestTag::OutputRead { offset: 4, len: 4 }).unwrap();
        c.track(RequestId(3), 0, RequestTag::OutputRead { offset: 8, len: 2 }).unwrap();

        assert_eq!(c.tracked_for(0), 1);
        assert_eq!(c.outstanding_for(0), 3);
        assert_eq!(c.len(), 3);
    }
}
