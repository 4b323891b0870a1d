//! The catch-up closure: a single-occupancy notification slot (spec §4.7).
//!
//! Grounded in the teacher's `ReplicaEvent::NeedsSnapshot { tx: oneshot::Sender }`
//! pattern (`async-raft/src/replication/mod.rs`) of handing a one-shot channel
//! across a boundary rather than holding a raw callback; generalized here to
//! carry a caller-chosen margin and an optional timeout.

use crate::LogIndex;

/// Outcome delivered to a registered catch-up waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchupOutcome {
    /// The peer's match index closed to within `max_margin` of the leader's
    /// last log index.
    CaughtUp,
    /// The closure's timer elapsed first.
    TimedOut,
    /// The replicator was destroyed (or stopped) before either of the above.
    Destroyed,
}

/// A registered, not-yet-fired catch-up wait.
pub struct CatchupSlot {
    pub max_margin: LogIndex,
    tx: Option<tokio::sync::oneshot::Sender<CatchupOutcome>>,
    /// Set under the latch by the success path when it wins the race against
    /// the timer (spec §4.7's race note). Once set, a timer that fires after
    /// the fact must not redeliver.
    error_was_set: bool,
    /// Handle to the timer task, if one was armed (`due_time > 0`); aborted
    /// on success delivery so it never fires after the waiter has already
    /// been notified.
    timer: Option<tokio::task::JoinHandle<()>>,
}

impl CatchupSlot {
    pub fn new(
        max_margin: LogIndex,
        tx: tokio::sync::oneshot::Sender<CatchupOutcome>,
        timer: Option<tokio::task::JoinHandle<()>>,
    ) -> Self {
        Self { max_margin, tx: Some(tx), error_was_set: false, timer }
    }

    /// `true` once this slot has already been resolved (by either path).
    pub fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }

    /// Deliver an outcome exactly once. Aborts the timer task if still
    /// pending so it cannot independently resolve this same slot later.
    ///
    /// Per spec §4.7: if the timer has already started firing (its abort
    /// races and loses), this call still marks `error_was_set` and defers —
    /// the timer's own delivery attempt below is expected to observe the
    /// slot already resolved and do nothing.
    pub fn resolve(&mut self, outcome: CatchupOutcome) {
        if self.tx.is_none() {
            return;
        }
        self.error_was_set = true;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(outcome);
        }
    }

    pub fn error_was_set(&self) -> bool {
        self.error_was_set
    }
}

impl Drop for CatchupSlot {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(CatchupOutcome::Destroyed);
        }
    }
}

/// `true` if the peer has closed to within `max_margin` of the leader's last
/// log index, the success condition of spec §4.7 (`next_index - 1 + max_margin
/// >= log.last_index`).
pub fn has_caught_up(next_index: LogIndex, max_margin: LogIndex, last_log_index: LogIndex) -> bool {
    next_index.saturating_sub(1) + max_margin >= last_log_index
}
