//! The inflight RPC queue (spec §4.2).
//!
//! Pipelining is the point of departure from the teacher's single-buffer
//! retransmit model (`ReplicationCore` keeps exactly one outstanding
//! `AppendEntries` at a time). Here the entry pump may have several requests
//! on the wire at once, each tagged with a monotonic `req_seq` so responses
//! can be matched and reordered (spec §4.3) independently of arrival order.

use crate::LogIndex;

/// One outstanding request the entry pump is waiting on a response for.
/// Field names follow spec §3's `Inflight` record.
#[derive(Debug, Clone)]
pub struct Inflight {
    /// Monotonic sequence number assigned at send time; matched against the
    /// corresponding [`crate::reorder::RpcResponse::seq`].
    pub seq: u64,
    /// Index of the first entry this request carries, or the probed index
    /// for a zero-entry request.
    pub start_index: LogIndex,
    /// Number of entries the request carries. `0` for a probe/heartbeat.
    pub count: usize,
}

impl Inflight {
    /// `true` if this request carries at least one log entry, as opposed to
    /// being a bare probe or heartbeat.
    pub fn carries_entries(&self) -> bool {
        self.count > 0
    }
}

/// FIFO of outstanding requests, enforcing the two admission rules of spec
/// §4.2's `next_send_index`:
///
/// 1. the queue may not grow past `max_inflight_msgs`;
/// 2. if the tail is not entry-bearing (a probe, snapshot, or the queue is
///    otherwise blocked), no further sends may be admitted until it
///    completes — its completion is what tells the pump where to continue
///    from.
#[derive(Debug, Default)]
pub struct InflightQueue {
    queue: std::collections::VecDeque<Inflight>,
    next_seq: u64,
}

impl InflightQueue {
    pub fn new() -> Self {
        Self { queue: std::collections::VecDeque::new(), next_seq: 0 }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// The sequence number that would be assigned to the next admitted
    /// request, without reserving it.
    pub fn peek_next_seq(&self) -> u64 {
        self.next_seq
    }

    /// The start index the next send should use, or `None` if admission is
    /// currently blocked (spec §4.2 rules 1–3): either the queue is at cap,
    /// or its tail is a probe/snapshot whose outcome isn't known yet.
    pub fn next_send_index(&self, max_inflight_msgs: usize, fallback_next_index: LogIndex) -> Option<LogIndex> {
        if self.queue.len() >= max_inflight_msgs {
            return None;
        }
        match self.queue.back() {
            Some(tail) if !tail.carries_entries() => None,
            Some(tail) => Some(tail.start_index + tail.count as LogIndex),
            None => Some(fallback_next_index),
        }
    }

    /// Assign the next sequence number and push a new inflight record,
    /// returning the assigned `req_seq`.
    pub fn push(&mut self, start_index: LogIndex, count: usize) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.queue.push_back(Inflight { seq, start_index, count });
        seq
    }

    /// Remove and return the record matching `seq`, wherever it sits in the
    /// queue. Returns `None` if no such record is outstanding (a response
    /// for a request already dropped by `reset`).
    pub fn remove(&mut self, seq: u64) -> Option<Inflight> {
        let pos = self.queue.iter().position(|i| i.seq == seq)?;
        self.queue.remove(pos)
    }

    /// The head of the queue, i.e. the oldest outstanding request.
    pub fn front(&self) -> Option<&Inflight> {
        self.queue.front()
    }

    /// Drop every outstanding request. Used on mismatch recovery (spec §4.4)
    /// and on step-down, when in-flight responses can no longer be trusted.
    pub fn reset(&mut self) {
        self.queue.clear();
    }
}
