//! Error types for the replicator.
//!
//! Mirrors the error table of spec §7. `ErrorCode` is the small, closed set of codes
//! delivered to [`crate::replicator::ReplicatorState::on_error`] through the latch
//! (spec §4.1); `ReplicatorError` is the richer, typed error surfaced to callers of
//! the public API and to collaborator trait methods.

use thiserror::Error;

/// Codes deliverable to a replicator's `on_error` handler while the latch is held.
///
/// These correspond to the `ESTOP` / `ETIMEDOUT` / `EPERM` / `EINVAL` codes named
/// throughout spec §4 and §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Explicit stop requested; cancel everything and destroy.
    Stop,
    /// Heartbeat timer fired; not fatal, triggers a heartbeat.
    TimedOut,
    /// A higher term or a terminal condition not permitting the caller's request.
    Perm,
    /// An invalid request against the replicator's public API (e.g. a second
    /// concurrent catch-up wait).
    Inval,
}

/// Errors surfaced by the replicator's public API and its interactions with
/// collaborators.
#[derive(Debug, Error)]
pub enum ReplicatorError {
    /// An RPC transport call failed (connection refused, timeout, decode error, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// Snapshot open/load/URI generation failed. Per spec §7 this is surfaced to the
    /// node level and not retried internally by the replicator.
    #[error("snapshot I/O error: {0}")]
    SnapshotIo(String),

    /// A protocol invariant was violated (e.g. a response's sequence number did not
    /// match the head of the inflight queue). Recovered via `reset_inflights`, but
    /// logged as an error because it should never happen in a correct system.
    #[error("protocol invariant violated: {0}")]
    InvariantViolation(String),

    /// `wait_for_caught_up` was called while a catch-up closure was already
    /// installed.
    #[error("a catch-up wait is already registered")]
    AlreadyWaiting,

    /// The replicator has already been destroyed; any `lock` attempt after
    /// destruction observes this.
    #[error("replicator has been destroyed")]
    Destroyed,

    /// The identity token did not resolve to a live replicator in the registry.
    #[error("unknown replicator id")]
    UnknownReplicator,

    /// The supplied `Config` failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ReplicatorError>;
