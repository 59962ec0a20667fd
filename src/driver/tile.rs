//! Per-tile protocol state machine.
//!
//! Each tile cycles through the phases of one test iteration:
//!
//! ```text
//! IDLE ─► WRITE_INPUT ─► WAIT_INPUT ─► WRITE_START ─► WAIT_START ─► POLL_STATUS ◄─┐
//!              ▲                                                        │         │ not done
//!              │                                                        ▼         │
//!              │                                                    WAIT_POLL ────┘
//!              │                                                        │ done
//!              │                                                        ▼
//!              └──── more tests ◄── COMPLETE ◄── WAIT_OUTPUT ◄── READ_OUTPUT
//!                                      │
//!                                      └─► DONE
//! ```
//!
//! # Chunking
//!
//! WRITE_INPUT, WRITE_START and READ_OUTPUT move a region in chunks of at
//! most `max_request` bytes, one chunk per tick. All cursors are byte
//! offsets. Only the final chunk is tracked; earlier writes are posted.
//! Earlier output reads still complete (reads always do), so they are
//! registered as data-only entries that fill the output buffer without
//! gating the phase.
//!
//! # Polling
//!
//! The status block (one byte per array) is polled in chunks of at most
//! `max_request` bytes. A chunk is done when every byte reads
//! [`STATUS_DONE`]; otherwise it is re-polled after `poll_interval` ticks.

use super::correlator::{CompletionCorrelator, PendingRequest, RequestTag};
use super::error::DriverError;
use super::pattern::PatternGenerator;
use crate::device::{TileConfig, STATUS_DONE, STATUS_START};
use crate::transport::{Completion, MemoryTransport, RequestId};

/// Phase of a tile's test iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TilePhase {
    /// Test not yet started
    Idle,
    /// Issuing chunked writes of the input buffer
    WriteInput,
    /// Waiting for the final input chunk write
    WaitInput,
    /// Issuing start bytes to the status registers
    WriteStart,
    /// Waiting for the final start write
    WaitStart,
    /// Issuing a status poll
    PollStatus,
    /// Waiting for the status poll read
    WaitPoll,
    /// Issuing chunked reads of the output region
    ReadOutput,
    /// Waiting for the output reads
    WaitOutput,
    /// One test iteration finished
    Complete,
    /// All tests finished
    Done,
}

impl TilePhase {
    /// Check if the phase waits on an outstanding request.
    pub fn is_wait(&self) -> bool {
        matches!(
            self,
            TilePhase::WaitInput | TilePhase::WaitStart | TilePhase::WaitPoll | TilePhase::WaitOutput
        )
    }
}

impl std::fmt::Display for TilePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TilePhase::Idle => "IDLE",
            TilePhase::WriteInput => "WRITE_INPUT",
            TilePhase::WaitInput => "WAIT_INPUT",
            TilePhase::WriteStart => "WRITE_START",
            TilePhase::WaitStart => "WAIT_START",
            TilePhase::PollStatus => "POLL_STATUS",
            TilePhase::WaitPoll => "WAIT_POLL",
            TilePhase::ReadOutput => "READ_OUTPUT",
            TilePhase::WaitOutput => "WAIT_OUTPUT",
            TilePhase::Complete => "COMPLETE",
            TilePhase::Done => "DONE",
        };
        f.pad(name)
    }
}

/// Status polling limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Polls allowed for one status chunk before the tile fails.
    /// The count restarts whenever a chunk reads done.
    pub max_attempts: u32,
    /// Ticks to wait between a not-done poll and the next one.
    pub interval: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1024,
            interval: 0,
        }
    }
}

/// Per-tile request statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileStats {
    /// Requests issued of any kind
    pub requests: u64,
    /// Posted (untracked) writes
    pub posted_writes: u64,
    /// Tracked (phase-gating) requests
    pub tracked: u64,
    /// Data-only output reads
    pub data_reads: u64,
    /// Status polls issued
    pub polls: u64,
    /// Bytes written
    pub bytes_written: u64,
    /// Bytes read back
    pub bytes_read: u64,
}

/// Shared state a tile needs while stepping.
pub(crate) struct StepContext<'a> {
    pub correlator: &'a mut CompletionCorrelator,
    pub patterns: &'a mut PatternGenerator,
}

/// Outcome of one tile step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    /// A request was issued this tick
    Issued,
    /// Waiting on an outstanding request or poll backoff
    Blocked,
    /// All tests finished
    Done,
}

/// Mutable runtime state of one tile.
#[derive(Debug, Clone)]
pub struct TileRuntime {
    index: usize,
    config: TileConfig,
    num_tests: u32,
    poll: PollPolicy,
    phase: TilePhase,
    /// Byte offset within the current phase's region
    cursor: u64,
    tests_completed: u32,
    input_buffer: Vec<u8>,
    output_buffer: Vec<u8>,
    /// The single tracked request the tile waits on
    awaiting: Option<RequestId>,
    /// Data-only output reads still in flight
    data_reads_outstanding: u32,
    poll_attempts: u32,
    poll_cooldown: u32,
    last_status: u8,
    stats: TileStats,
}

impl TileRuntime {
    /// Create the runtime for a tile, filling its first input pattern.
    ///
    /// A tile without arrays has nothing to test and starts in DONE.
    /// Fails if the input operand width cannot be encoded.
    pub fn new(
        index: usize,
        config: TileConfig,
        num_tests: u32,
        poll: PollPolicy,
        patterns: &mut PatternGenerator,
    ) -> Result<Self, DriverError> {
        let mut input_buffer = vec![0u8; config.input_region_size() as usize];
        let output_buffer = vec![0u8; config.output_region_size() as usize];

        let (phase, tests_completed) = if config.array_count == 0 {
            log::debug!("T{}: no arrays, nothing to test", index);
            (TilePhase::Done, num_tests)
        } else {
            patterns
                .fill(&mut input_buffer, config.input_width)
                .map_err(|e| DriverError::Invariant {
                    tile: index,
                    phase: TilePhase::Idle,
                    detail: format!("input pattern: {}", e),
                })?;
            (TilePhase::Idle, 0)
        };

        Ok(Self {
            index,
            config,
            num_tests,
            poll,
            phase,
            cursor: 0,
            tests_completed,
            input_buffer,
            output_buffer,
            awaiting: None,
            data_reads_outstanding: 0,
            poll_attempts: 0,
            poll_cooldown: 0,
            last_status: 0,
            stats: TileStats::default(),
        })
    }

    /// Tile index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Tile geometry.
    pub fn config(&self) -> &TileConfig {
        &self.config
    }

    /// Current phase.
    pub fn phase(&self) -> TilePhase {
        self.phase
    }

    /// Byte offset within the current phase.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Test iterations finished.
    pub fn tests_completed(&self) -> u32 {
        self.tests_completed
    }

    /// Check if the tile finished all its tests.
    pub fn is_done(&self) -> bool {
        self.phase == TilePhase::Done
    }

    /// Input pattern of the current (or last) test iteration.
    pub fn input_buffer(&self) -> &[u8] {
        &self.input_buffer
    }

    /// Output data read back in the last test iteration.
    pub fn output_buffer(&self) -> &[u8] {
        &self.output_buffer
    }

    /// Tracked request the tile is waiting on, if any.
    pub fn awaiting(&self) -> Option<RequestId> {
        self.awaiting
    }

    /// Request statistics.
    pub fn stats(&self) -> &TileStats {
        &self.stats
    }

    fn invariant(&self, detail: String) -> DriverError {
        DriverError::Invariant {
            tile: self.index,
            phase: self.phase,
            detail,
        }
    }

    /// Compute the next chunk of a region: `(offset, len, is_final)`.
    fn next_chunk(&self, region_size: u64) -> Result<(u64, u64, bool), DriverError> {
        if self.cursor > region_size {
            return Err(self.invariant(format!(
                "cursor {} exceeds region size {}",
                self.cursor, region_size
            )));
        }
        let remaining = region_size - self.cursor;
        let len = remaining.min(self.config.max_request as u64);
        if len == 0 || len > self.config.max_request as u64 {
            return Err(self.invariant(format!(
                "chunk of {} bytes (max request {})",
                len, self.config.max_request
            )));
        }
        Ok((self.cursor, len, self.cursor + len >= region_size))
    }

    fn enter(&mut self, phase: TilePhase) {
        log::debug!("T{}: {} -> {}", self.index, self.phase, phase);
        self.phase = phase;
        self.cursor = 0;
    }

    /// Advance the tile by one tick, issuing at most one request.
    ///
    /// Transitions that issue nothing fall through within the same tick.
    pub(crate) fn step<T: MemoryTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepOutcome, DriverError> {
        loop {
            match self.phase {
                TilePhase::Idle => self.enter(TilePhase::WriteInput),

                TilePhase::WriteInput => {
                    if self.cursor >= self.config.input_region_size() {
                        self.phase = TilePhase::WaitInput;
                        continue;
                    }
                    self.issue_input_chunk(transport, ctx)?;
                    return Ok(StepOutcome::Issued);
                }

                TilePhase::WaitInput => {
                    if self.awaiting.is_some() {
                        return Ok(StepOutcome::Blocked);
                    }
                    self.enter(TilePhase::WriteStart);
                }

                TilePhase::WriteStart => {
                    if self.cursor >= self.config.array_count as u64 {
                        self.phase = TilePhase::WaitStart;
                        continue;
                    }
                    self.issue_start_chunk(transport, ctx)?;
                    return Ok(StepOutcome::Issued);
                }

                TilePhase::WaitStart => {
                    if self.awaiting.is_some() {
                        return Ok(StepOutcome::Blocked);
                    }
                    self.poll_attempts = 0;
                    self.poll_cooldown = 0;
                    self.enter(TilePhase::PollStatus);
                }

                TilePhase::PollStatus => {
                    if self.cursor >= self.config.array_count as u64 {
                        self.enter(TilePhase::ReadOutput);
                        continue;
                    }
                    if self.poll_cooldown > 0 {
                        self.poll_cooldown -= 1;
                        return Ok(StepOutcome::Blocked);
                    }
                    if self.poll_attempts >= self.poll.max_attempts {
                        return Err(DriverError::PollTimeout {
                            tile: self.index,
                            attempts: self.poll_attempts,
                            last_status: self.last_status,
                        });
                    }
                    self.issue_poll(transport, ctx)?;
                    return Ok(StepOutcome::Issued);
                }

                TilePhase::WaitPoll => {
                    if self.awaiting.is_some() {
                        return Ok(StepOutcome::Blocked);
                    }
                    // The completion already moved the cursor or set a cooldown
                    self.phase = TilePhase::PollStatus;
                }

                TilePhase::ReadOutput => {
                    if self.cursor >= self.config.output_region_size() {
                        self.phase = TilePhase::WaitOutput;
                        continue;
                    }
                    self.issue_output_chunk(transport, ctx)?;
                    return Ok(StepOutcome::Issued);
                }

                TilePhase::WaitOutput => {
                    if self.awaiting.is_some() || self.data_reads_outstanding > 0 {
                        return Ok(StepOutcome::Blocked);
                    }
                    self.enter(TilePhase::Complete);
                }

                TilePhase::Complete => {
                    self.tests_completed += 1;
                    log::info!(
                        "T{}: test {}/{} complete",
                        self.index,
                        self.tests_completed,
                        self.num_tests
                    );
                    log::debug!("T{}: output {:02x?}", self.index, self.output_buffer);

                    if self.tests_completed >= self.num_tests {
                        self.enter(TilePhase::Done);
                    } else {
                        ctx.patterns
                            .fill(&mut self.input_buffer, self.config.input_width)
                            .map_err(|e| self.invariant(format!("input pattern: {}", e)))?;
                        self.enter(TilePhase::WriteInput);
                    }
                }

                TilePhase::Done => return Ok(StepOutcome::Done),
            }
        }
    }

    fn transport_error(&self, source: crate::transport::TransportError) -> DriverError {
        DriverError::Transport {
            tile: self.index,
            phase: self.phase,
            source,
        }
    }

    fn issue_input_chunk<T: MemoryTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        ctx: &mut StepContext<'_>,
    ) -> Result<(), DriverError> {
        let (offset, len, is_final) = self.next_chunk(self.config.input_region_size())?;
        let addr = self.config.input_start() + offset;
        let payload = &self.input_buffer[offset as usize..(offset + len) as usize];

        log::trace!(
            "T{}: Writing {}B [Data] to 0x{:x}, final: {}",
            self.index, len, addr, is_final
        );
        let id = transport
            .write(addr, payload, !is_final)
            .map_err(|e| self.transport_error(e))?;

        self.stats.requests += 1;
        self.stats.bytes_written += len;
        if is_final {
            self.track(id, RequestTag::InputWrite, ctx)?;
            self.phase = TilePhase::WaitInput;
        } else {
            self.stats.posted_writes += 1;
        }
        self.cursor += len;
        Ok(())
    }

    fn issue_start_chunk<T: MemoryTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        ctx: &mut StepContext<'_>,
    ) -> Result<(), DriverError> {
        let (offset, len, is_final) = self.next_chunk(self.config.array_count as u64)?;
        let addr = self.config.status_start() + offset;
        let payload = vec![STATUS_START; len as usize];

        log::trace!(
            "T{}: Writing {}B [Status] to 0x{:x}, final: {}",
            self.index, len, addr, is_final
        );
        let id = transport
            .write(addr, &payload, !is_final)
            .map_err(|e| self.transport_error(e))?;

        self.stats.requests += 1;
        self.stats.bytes_written += len;
        if is_final {
            self.track(id, RequestTag::StartWrite, ctx)?;
            self.phase = TilePhase::WaitStart;
        } else {
            self.stats.posted_writes += 1;
        }
        self.cursor += len;
        Ok(())
    }

    fn issue_poll<T: MemoryTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        ctx: &mut StepContext<'_>,
    ) -> Result<(), DriverError> {
        // Polling never moves the cursor itself; a done completion does
        let (offset, len, _) = self.next_chunk(self.config.array_count as u64)?;
        let addr = self.config.status_start() + offset;

        log::trace!("T{}: Polling {}B [Status] at 0x{:x}", self.index, len, addr);
        let id = transport
            .read(addr, len as u32)
            .map_err(|e| self.transport_error(e))?;

        self.stats.requests += 1;
        self.stats.polls += 1;
        self.poll_attempts += 1;
        self.track(id, RequestTag::StatusPoll { offset, len }, ctx)?;
        self.phase = TilePhase::WaitPoll;
        Ok(())
    }

    fn issue_output_chunk<T: MemoryTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        ctx: &mut StepContext<'_>,
    ) -> Result<(), DriverError> {
        let (offset, len, is_final) = self.next_chunk(self.config.output_region_size())?;
        let addr = self.config.output_start() + offset;

        log::trace!(
            "T{}: Reading {}B [Data] from 0x{:x}, final: {}",
            self.index, len, addr, is_final
        );
        let id = transport
            .read(addr, len as u32)
            .map_err(|e| self.transport_error(e))?;

        self.stats.requests += 1;
        let tag = RequestTag::OutputRead { offset, len };
        if is_final {
            self.track(id, tag, ctx)?;
            self.phase = TilePhase::WaitOutput;
        } else {
            ctx.correlator.track_data(id, self.index, tag)?;
            self.data_reads_outstanding += 1;
            self.stats.data_reads += 1;
        }
        self.cursor += len;
        Ok(())
    }

    fn track(&mut self, id: RequestId, tag: RequestTag, ctx: &mut StepContext<'_>) -> Result<(), DriverError> {
        if let Some(existing) = self.awaiting {
            return Err(self.invariant(format!(
                "second tracked request {} while waiting on {}",
                id, existing
            )));
        }
        ctx.correlator.track(id, self.index, tag)?;
        self.awaiting = Some(id);
        self.stats.tracked += 1;
        Ok(())
    }

    /// Apply a correlated completion.
    pub(crate) fn on_completion(
        &mut self,
        entry: PendingRequest,
        completion: &Completion,
    ) -> Result<(), DriverError> {
        let id = completion.id();

        if entry.tracked {
            if self.awaiting != Some(id) {
                return Err(DriverError::UnexpectedCompletion {
                    tile: self.index,
                    phase: self.phase,
                    id,
                });
            }
            self.awaiting = None;
        }

        match (entry.tag, completion) {
            (RequestTag::InputWrite | RequestTag::StartWrite, Completion::Write { .. }) => {
                log::trace!("T{}: write {} acknowledged", self.index, id);
            }

            (RequestTag::StatusPoll { offset, len }, Completion::Read { data, .. }) => {
                self.check_length(id, len, data)?;
                match data.iter().find(|&&b| b != STATUS_DONE) {
                    None => {
                        log::debug!("T{}: arrays {}..{} done", self.index, offset, offset + len);
                        self.cursor = offset + len;
                        self.poll_attempts = 0;
                    }
                    Some(&status) => {
                        self.last_status = status;
                        self.poll_cooldown = self.poll.interval;
                    }
                }
            }

            (RequestTag::OutputRead { offset, len }, Completion::Read { data, .. }) => {
                self.check_length(id, len, data)?;
                self.output_buffer[offset as usize..(offset + len) as usize].copy_from_slice(data);
                self.stats.bytes_read += len;
                if !entry.tracked {
                    self.data_reads_outstanding = self.data_reads_outstanding.saturating_sub(1);
                }
            }

            (tag, got) => {
                let expected = match tag {
                    RequestTag::InputWrite | RequestTag::StartWrite => "write",
                    RequestTag::StatusPoll { .. } | RequestTag::OutputRead { .. } => "read",
                };
                return Err(DriverError::CompletionMismatch {
                    tile: self.index,
                    phase: self.phase,
                    id,
                    expected,
                    got: got.kind(),
                });
            }
        }
        Ok(())
    }

    fn check_length(&self, id: RequestId, expected: u64, data: &[u8]) -> Result<(), DriverError> {
        if data.len() as u64 != expected {
            return Err(DriverError::ShortRead {
                tile: self.index,
                phase: self.phase,
                id,
                expected,
                got: data.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingTransport, RequestKind};

    fn runtime(config: TileConfig) -> (TileRuntime, CompletionCorrelator, PatternGenerator) {
        let mut patterns = PatternGenerator::new(85);
        let tile = TileRuntime::new(0, config, 1, PollPolicy::default(), &mut patterns).unwrap();
        (tile, CompletionCorrelator::new(), patterns)
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(TilePhase::WaitPoll.to_string(), "WAIT_POLL");
        assert_eq!(format!("{:<8}|", TilePhase::Done), "DONE    |");
        assert!(TilePhase::WaitOutput.is_wait());
        assert!(!TilePhase::ReadOutput.is_wait());
    }

    #[test]
    fn test_bad_width_fails_construction() {
        let mut patterns = PatternGenerator::new(85);
        let config = TileConfig::new(0x100, 1, 4, 4, 0, 1, 4);
        let err = TileRuntime::new(2, config, 1, PollPolicy::default(), &mut patterns).unwrap_err();
        assert!(matches!(err, DriverError::Invariant { tile: 2, phase: TilePhase::Idle, .. }));
        assert!(err.to_string().contains("input pattern"));
    }

    #[test]
    fn test_buffers_sized_in_bytes() {
        let (tile, _, _) = runtime(TileConfig::new(0x100, 3, 5, 2, 4, 8, 16));
        assert_eq!(tile.input_buffer().len(), 3 * 5 * 4);
        assert_eq!(tile.output_buffer().len(), 3 * 2 * 8);
        assert_eq!(tile.phase(), TilePhase::Idle);
    }

    #[test]
    fn test_one_request_per_step() {
        let (mut tile, mut correlator, mut patterns) = runtime(TileConfig::new(0x100, 1, 10, 1, 1, 1, 3));
        let mut transport = RecordingTransport::new();

        for n in 1..=4 {
            let mut ctx = StepContext { correlator: &mut correlator, patterns: &mut patterns };
            assert_eq!(tile.step(&mut transport, &mut ctx).unwrap(), StepOutcome::Issued);
            assert_eq!(transport.issued().len(), n);
        }
        // 3 + 3 + 3 + 1 bytes, the last one tracked
        let lens: Vec<_> = transport.issued().iter().map(|r| r.length).collect();
        assert_eq!(lens, vec![3, 3, 3, 1]);
        assert_eq!(tile.phase(), TilePhase::WaitInput);
        assert_eq!(tile.cursor(), 10);
        assert_eq!(tile.awaiting(), Some(transport.issued()[3].id));
        assert_eq!(correlator.len(), 1);

        let mut ctx = StepContext { correlator: &mut correlator, patterns: &mut patterns };
        assert_eq!(tile.step(&mut transport, &mut ctx).unwrap(), StepOutcome::Blocked);
        assert_eq!(tile.stats().posted_writes, 3);
        assert_eq!(tile.stats().bytes_written, 10);
    }

    #[test]
    fn test_empty_input_passes_through() {
        let (mut tile, mut correlator, mut patterns) = runtime(TileConfig::new(0x100, 2, 0, 1, 1, 1, 4));
        let mut transport = RecordingTransport::new();
        let mut ctx = StepContext { correlator: &mut correlator, patterns: &mut patterns };

        // No input bytes: the first request is the start write
        tile.step(&mut transport, &mut ctx).unwrap();
        let first = &transport.issued()[0];
        assert_eq!(first.kind, RequestKind::Write);
        assert_eq!(first.address, 0x100);
        assert_eq!(first.data, vec![STATUS_START; 2]);
        assert_eq!(tile.phase(), TilePhase::WaitStart);
    }

    #[test]
    fn test_untracked_completion_while_waiting() {
        let (mut tile, mut correlator, mut patterns) = runtime(TileConfig::new(0x100, 1, 4, 1, 1, 1, 4));
        let mut transport = RecordingTransport::new();
        let mut ctx = StepContext { correlator: &mut correlator, patterns: &mut patterns };
        tile.step(&mut transport, &mut ctx).unwrap();

        let bogus = PendingRequest { tile: 0, tag: RequestTag::InputWrite, tracked: true };
        let err = tile
            .on_completion(bogus, &Completion::Write { id: RequestId(77) })
            .unwrap_err();
        assert!(matches!(
            err,
            DriverError::UnexpectedCompletion { tile: 0, phase: TilePhase::WaitInput, id: RequestId(77) }
        ));
    }

    #[test]
    fn test_not_done_poll_keeps_cursor() {
        let (mut tile, mut correlator, mut patterns) = runtime(TileConfig::new(0x100, 4, 1, 1, 1, 1, 4));
        let mut transport = RecordingTransport::new();
        transport.set_auto_complete(true);

        // Input write, start write, first poll
        for _ in 0..3 {
            while let Some(c) = transport.poll_completion() {
                let entry = correlator.resolve(c.id()).unwrap();
                tile.on_completion(entry, &c).unwrap();
            }
            let mut ctx = StepContext { correlator: &mut correlator, patterns: &mut patterns };
            tile.step(&mut transport, &mut ctx).unwrap();
        }
        assert_eq!(tile.phase(), TilePhase::WaitPoll);

        let poll = transport.poll_completion().unwrap();
        let entry = correlator.resolve(poll.id()).unwrap();
        let partial = Completion::Read { id: poll.id(), data: vec![STATUS_DONE, STATUS_DONE, 1, STATUS_DONE] };
        tile.on_completion(entry, &partial).unwrap();
        assert_eq!(tile.cursor(), 0);
        assert_eq!(tile.awaiting(), None);
    }
}
