//! Scriptable in-memory transport.
//!
//! [`RecordingTransport`] accepts every request, remembers it, and only
//! delivers completions when told to. Tests use it to control completion
//! order precisely and to inspect the exact request stream a driver issued.

use std::collections::VecDeque;

use crate::device::{STATUS_BUSY, STATUS_DONE};
use crate::transport::{Completion, MemoryTransport, RequestId, TransportError};

/// Kind of an issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Write,
    Read,
}

/// A request as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedRequest {
    pub id: RequestId,
    pub kind: RequestKind,
    pub address: u64,
    pub length: u32,
    /// Posted writes never complete
    pub posted: bool,
    /// Write payload (empty for reads)
    pub data: Vec<u8>,
}

/// Transport that records requests and completes them on demand.
#[derive(Debug)]
pub struct RecordingTransport {
    next_id: u64,
    issued: Vec<IssuedRequest>,
    /// Non-posted requests not yet completed, in issue order
    outstanding: Vec<RequestId>,
    ready: VecDeque<Completion>,
    auto_complete: bool,
    read_fill: u8,
    busy_reads: u32,
    reject: Option<TransportError>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    /// Create a transport that completes nothing until asked.
    pub fn new() -> Self {
        Self {
            next_id: 0,
            issued: Vec::new(),
            outstanding: Vec::new(),
            ready: VecDeque::new(),
            auto_complete: false,
            read_fill: STATUS_DONE,
            busy_reads: 0,
            reject: None,
        }
    }

    /// Complete every non-posted request immediately at issue.
    pub fn set_auto_complete(&mut self, enabled: bool) {
        self.auto_complete = enabled;
    }

    /// Byte returned for every read.
    pub fn set_read_fill(&mut self, fill: u8) {
        self.read_fill = fill;
    }

    /// Make the next `count` read completions return [`STATUS_BUSY`].
    pub fn set_busy_reads(&mut self, count: u32) {
        self.busy_reads = count;
    }

    /// Fail the next request with `error`.
    pub fn reject_next(&mut self, error: TransportError) {
        self.reject = Some(error);
    }

    /// Every request issued so far.
    pub fn issued(&self) -> &[IssuedRequest] {
        &self.issued
    }

    /// Requests waiting for [`complete`](Self::complete).
    pub fn outstanding(&self) -> &[RequestId] {
        &self.outstanding
    }

    /// Complete one outstanding request. Returns false if it is not outstanding.
    pub fn complete(&mut self, id: RequestId) -> bool {
        let Some(pos) = self.outstanding.iter().position(|&o| o == id) else {
            return false;
        };
        self.outstanding.remove(pos);
        let completion = self.completion_for(id);
        self.ready.push_back(completion);
        true
    }

    /// Complete every outstanding request, in issue order or reversed.
    pub fn complete_all(&mut self, reverse: bool) -> usize {
        let mut ids = std::mem::take(&mut self.outstanding);
        if reverse {
            ids.reverse();
        }
        let count = ids.len();
        for id in ids {
            let completion = self.completion_for(id);
            self.ready.push_back(completion);
        }
        count
    }

    /// Queue an arbitrary completion, bypassing request bookkeeping.
    pub fn inject(&mut self, completion: Completion) {
        self.ready.push_back(completion);
    }

    /// Drop completions that are ready but not yet polled.
    pub fn clear_ready(&mut self) {
        self.ready.clear();
    }

    fn completion_for(&mut self, id: RequestId) -> Completion {
        let Some(request) = self.issued.iter().find(|r| r.id == id) else {
            return Completion::Write { id };
        };
        match request.kind {
            RequestKind::Write => Completion::Write { id },
            RequestKind::Read => {
                let length = request.length as usize;
                let fill = if self.busy_reads > 0 {
                    self.busy_reads -= 1;
                    STATUS_BUSY
                } else {
                    self.read_fill
                };
                Completion::Read { id, data: vec![fill; length] }
            }
        }
    }

    fn issue(&mut self, kind: RequestKind, address: u64, length: u32, posted: bool, data: &[u8]) -> Result<RequestId, TransportError> {
        if let Some(error) = self.reject.take() {
            return Err(error);
        }
        if length == 0 {
            return Err(TransportError::ZeroLength { address });
        }

        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.issued.push(IssuedRequest {
            id,
            kind,
            address,
            length,
            posted,
            data: data.to_vec(),
        });

        if !posted {
            if self.auto_complete {
                let completion = self.completion_for(id);
                self.ready.push_back(completion);
            } else {
                self.outstanding.push(id);
            }
        }
        Ok(id)
    }
}

impl MemoryTransport for RecordingTransport {
    fn write(&mut self, address: u64, data: &[u8], posted: bool) -> Result<RequestId, TransportError> {
        self.issue(RequestKind::Write, address, data.len() as u32, posted, data)
    }

    fn read(&mut self, address: u64, length: u32) -> Result<RequestId, TransportError> {
        self.issue(RequestKind::Read, address, length, false, &[])
    }

    fn poll_completion(&mut self) -> Option<Completion> {
        self.ready.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posted_writes_never_complete() {
        let mut t = RecordingTransport::new();
        t.write(0x10, &[1, 2], true).unwrap();
        assert!(t.outstanding().is_empty());
        assert_eq!(t.complete_all(false), 0);
        assert!(t.poll_completion().is_none());
    }

    #[test]
    fn test_complete_in_reverse() {
        let mut t = RecordingTransport::new();
        let a = t.write(0x10, &[1], false).unwrap();
        let b = t.read(0x20, 3).unwrap();

        assert_eq!(t.complete_all(true), 2);
        assert_eq!(t.poll_completion(), Some(Completion::Read { id: b, data: vec![STATUS_DONE; 3] }));
        assert_eq!(t.poll_completion(), Some(Completion::Write { id: a }));
    }

    #[test]
    fn test_busy_reads_then_fill() {
        let mut t = RecordingTransport::new();
        t.set_auto_complete(true);
        t.set_busy_reads(1);
        t.read(0x0, 1).unwrap();
        t.read(0x0, 1).unwrap();

        let data: Vec<_> = std::iter::from_fn(|| t.poll_completion())
            .map(|c| match c {
                Completion::Read { data, .. } => data[0],
                Completion::Write { .. } => panic!("unexpected write completion"),
            })
            .collect();
        assert_eq!(data, vec![STATUS_BUSY, STATUS_DONE]);
    }

    #[test]
    fn test_complete_unknown_id() {
        let mut t = RecordingTransport::new();
        assert!(!t.complete(RequestId(7)));
    }

    #[test]
    fn test_reject_next() {
        let mut t = RecordingTransport::new();
        t.reject_next(TransportError::Device("boom".to_string()));
        assert!(t.read(0, 1).is_err());
        assert!(t.read(0, 1).is_ok());
        assert_eq!(t.issued().len(), 1);
    }
}
