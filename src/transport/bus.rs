//! Simulated MMIO bus.
//!
//! Routes requests to [`MmioTile`]s by address window and delivers
//! completions after a configurable latency. With non-zero jitter the
//! completions of different requests come back out of issue order.
//!
//! Write effects land in the tile at issue time, in issue order, so posted
//! writes are never overtaken by later writes. Read data is sampled when the
//! read's completion becomes ready.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Completion, MemoryTransport, RequestId, TransportError};
use crate::device::MmioTile;

/// Bus timing options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusOptions {
    /// Base completion latency in ticks.
    pub latency: u64,
    /// Maximum extra random latency in ticks (0 = in-order delivery).
    pub jitter: u64,
    /// Seed for the jitter generator.
    pub seed: u64,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            latency: 4,
            jitter: 0,
            seed: 13,
        }
    }
}

/// Bus statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Writes issued (posted and non-posted)
    pub writes: u64,
    /// Posted writes issued
    pub posted_writes: u64,
    /// Reads issued
    pub reads: u64,
    /// Completions handed to the requester
    pub completions_delivered: u64,
}

#[derive(Debug, Clone, Copy)]
enum PendingKind {
    Write,
    Read { tile: usize, address: u64, length: u32 },
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: RequestId,
    ready_at: u64,
    kind: PendingKind,
}

/// Simulated memory transport over a set of tiles.
#[derive(Debug)]
pub struct MmioBus {
    tiles: Vec<MmioTile>,
    options: BusOptions,
    rng: StdRng,
    now: u64,
    next_id: u64,
    /// Issue-ordered requests whose completion is not ready yet
    in_flight: Vec<InFlight>,
    /// Completions ready for the requester
    delivered: VecDeque<Completion>,
    stats: BusStats,
}

impl MmioBus {
    /// Create a bus over the given tiles.
    ///
    /// Fails if two tile windows overlap.
    pub fn new(tiles: Vec<MmioTile>, options: BusOptions) -> Result<Self, TransportError> {
        for (i, a) in tiles.iter().enumerate() {
            for b in &tiles[i + 1..] {
                if a.config().overlaps(b.config()) {
                    return Err(TransportError::Device(format!(
                        "tile windows overlap: 0x{:x} and 0x{:x}",
                        a.config().base_addr,
                        b.config().base_addr
                    )));
                }
            }
        }

        Ok(Self {
            tiles,
            options,
            rng: StdRng::seed_from_u64(options.seed),
            now: 0,
            next_id: 0,
            in_flight: Vec::new(),
            delivered: VecDeque::new(),
            stats: BusStats::default(),
        })
    }

    /// Current bus time in ticks.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Bus statistics.
    pub fn stats(&self) -> BusStats {
        self.stats
    }

    /// Timing options.
    pub fn options(&self) -> &BusOptions {
        &self.options
    }

    /// All tiles on the bus.
    pub fn tiles(&self) -> &[MmioTile] {
        &self.tiles
    }

    /// Get a tile by index.
    pub fn tile(&self, index: usize) -> Option<&MmioTile> {
        self.tiles.get(index)
    }

    /// Requests whose completion is not ready yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Completions ready but not yet polled.
    pub fn pending_completions(&self) -> usize {
        self.delivered.len()
    }

    fn route(&self, address: u64, length: u64) -> Result<usize, TransportError> {
        if length == 0 {
            return Err(TransportError::ZeroLength { address });
        }
        let index = self
            .tiles
            .iter()
            .position(|t| t.config().contains(address))
            .ok_or(TransportError::Unmapped { address })?;
        if !self.tiles[index].contains_range(address, length) {
            return Err(TransportError::OutOfWindow { address, length });
        }
        Ok(index)
    }

    fn allocate_id(&mut self) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        id
    }

    fn ready_time(&mut self) -> u64 {
        let jitter = if self.options.jitter > 0 {
            self.rng.gen_range(0..=self.options.jitter)
        } else {
            0
        };
        self.now + self.options.latency + jitter
    }

    /// Advance the bus by one tick.
    ///
    /// Tiles finish due computations first, then completions whose latency
    /// has elapsed move to the delivery queue (ordered by ready time, ties
    /// in issue order).
    pub fn advance(&mut self) -> Result<(), TransportError> {
        self.now += 1;
        let now = self.now;

        for tile in &mut self.tiles {
            tile.advance(now).map_err(|e| TransportError::Device(e.to_string()))?;
        }

        let (mut due, waiting): (Vec<_>, Vec<_>) =
            self.in_flight.drain(..).partition(|r| r.ready_at <= now);
        self.in_flight = waiting;
        // Stable sort keeps issue order among equal ready times
        due.sort_by_key(|r| r.ready_at);

        for request in due {
            let completion = match request.kind {
                PendingKind::Write => Completion::Write { id: request.id },
                PendingKind::Read { tile, address, length } => {
                    let data = self.tiles[tile]
                        .read(address, length as usize)
                        .map_err(|e| TransportError::Device(e.to_string()))?;
                    Completion::Read { id: request.id, data }
                }
            };
            log::trace!("Bus: {} completion {} ready at tick {}", completion.kind(), request.id, now);
            self.delivered.push_back(completion);
        }
        Ok(())
    }
}

impl MemoryTransport for MmioBus {
    fn write(&mut self, address: u64, data: &[u8], posted: bool) -> Result<RequestId, TransportError> {
        let tile = self.route(address, data.len() as u64)?;
        self.tiles[tile]
            .write(address, data)
            .map_err(|e| TransportError::Device(e.to_string()))?;

        let id = self.allocate_id();
        self.stats.writes += 1;
        if posted {
            self.stats.posted_writes += 1;
        } else {
            let ready_at = self.ready_time();
            self.in_flight.push(InFlight { id, ready_at, kind: PendingKind::Write });
        }
        Ok(id)
    }

    fn read(&mut self, address: u64, length: u32) -> Result<RequestId, TransportError> {
        let tile = self.route(address, length as u64)?;

        let id = self.allocate_id();
        self.stats.reads += 1;
        let ready_at = self.ready_time();
        self.in_flight.push(InFlight {
            id,
            ready_at,
            kind: PendingKind::Read { tile, address, length },
        });
        Ok(id)
    }

    fn poll_completion(&mut self) -> Option<Completion> {
        let completion = self.delivered.pop_front()?;
        self.stats.completions_delivered += 1;
        Some(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{TestComputeArray, TileConfig, STATUS_BUSY, STATUS_DONE};

    fn bus(options: BusOptions) -> MmioBus {
        let tiles = vec![
            MmioTile::new(TileConfig::new(0x1000, 1, 4, 4, 1, 1, 4), Box::new(TestComputeArray::new(2))).unwrap(),
            MmioTile::new(TileConfig::new(0x2000, 2, 2, 2, 1, 1, 4), Box::new(TestComputeArray::new(2))).unwrap(),
        ];
        MmioBus::new(tiles, options).unwrap()
    }

    fn drain(bus: &mut MmioBus) -> Vec<Completion> {
        let mut out = Vec::new();
        while bus.in_flight() > 0 {
            bus.advance().unwrap();
        }
        while let Some(c) = bus.poll_completion() {
            out.push(c);
        }
        out
    }

    #[test]
    fn test_routing_errors() {
        let mut b = bus(BusOptions::default());

        assert_eq!(b.read(0x3000, 1), Err(TransportError::Unmapped { address: 0x3000 }));
        assert_eq!(
            b.read(0x1008, 2),
            Err(TransportError::OutOfWindow { address: 0x1008, length: 2 })
        );
        assert_eq!(b.write(0x1000, &[], false), Err(TransportError::ZeroLength { address: 0x1000 }));
    }

    #[test]
    fn test_posted_write_has_no_completion() {
        let mut b = bus(BusOptions::default());
        b.write(0x1001, &[1, 2], true).unwrap();
        let tracked = b.write(0x1003, &[3, 4], false).unwrap();

        let completions = drain(&mut b);
        assert_eq!(completions, vec![Completion::Write { id: tracked }]);
        assert_eq!(b.stats().posted_writes, 1);
        assert_eq!(b.stats().writes, 2);
    }

    #[test]
    fn test_latency() {
        let mut b = bus(BusOptions { latency: 3, ..Default::default() });
        b.read(0x1001, 4).unwrap();

        b.advance().unwrap();
        b.advance().unwrap();
        assert!(b.poll_completion().is_none());
        b.advance().unwrap();
        assert!(b.poll_completion().is_some());
    }

    #[test]
    fn test_in_order_without_jitter() {
        let mut b = bus(BusOptions::default());
        let ids: Vec<_> = (0..5).map(|i| b.read(0x1001 + i, 1).unwrap()).collect();

        let got: Vec<_> = drain(&mut b).iter().map(Completion::id).collect();
        assert_eq!(got, ids);
    }

    #[test]
    fn test_jitter_reorders_but_delivers_all() {
        let mut b = bus(BusOptions { latency: 1, jitter: 16, seed: 7 });
        let mut ids: Vec<_> = (0..32).map(|_| b.read(0x2000, 2).unwrap()).collect();

        let mut got: Vec<_> = drain(&mut b).iter().map(Completion::id).collect();
        assert_eq!(got.len(), ids.len());
        got.sort();
        ids.sort();
        assert_eq!(got, ids);
    }

    #[test]
    fn test_status_read_reflects_compute() {
        let mut b = bus(BusOptions { latency: 1, ..Default::default() });
        b.write(0x2001, &[1], true).unwrap();
        let early = b.read(0x2001, 1).unwrap();

        b.advance().unwrap();
        assert_eq!(b.poll_completion(), Some(Completion::Read { id: early, data: vec![STATUS_BUSY] }));

        b.advance().unwrap();
        let late = b.read(0x2001, 1).unwrap();
        b.advance().unwrap();
        assert_eq!(b.poll_completion(), Some(Completion::Read { id: late, data: vec![STATUS_DONE] }));
    }

    #[test]
    fn test_overlapping_tiles_rejected() {
        let tiles = vec![
            MmioTile::new(TileConfig::new(0x1000, 1, 4, 4, 1, 1, 4), Box::new(TestComputeArray::new(1))).unwrap(),
            MmioTile::new(TileConfig::new(0x1004, 1, 4, 4, 1, 1, 4), Box::new(TestComputeArray::new(1))).unwrap(),
        ];
        assert!(matches!(MmioBus::new(tiles, BusOptions::default()), Err(TransportError::Device(_))));
    }
}
