//! Collaborator trait contracts (spec §6).
//!
//! A replicator never touches storage, the network, or peer timers directly;
//! it is handed `Arc<dyn ...>` collaborators at construction and drives them
//! through these traits. Mirrors the teacher's `RaftStorage`/`RaftNetwork`
//! split in `async-raft/src/storage.rs`, generalized to the narrower surface
//! this component actually needs.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ReplicatorError;
use crate::wire::AppendEntriesRequest;
use crate::wire::AppendEntriesResponse;
use crate::wire::InstallSnapshotRequest;
use crate::wire::InstallSnapshotResponse;
use crate::wire::SnapshotMeta;
use crate::wire::TimeoutNowRequest;
use crate::wire::TimeoutNowResponse;
use crate::GroupId;
use crate::LogIndex;
use crate::NodeId;
use crate::Term;

/// A one-shot callback registered with [`LogStore::wait`], invoked once the
/// log has advanced to or past the watched index. Boxed rather than generic
/// so the trait stays object-safe; captures whatever identity (latch, version)
/// the caller needs to re-enter safely.
pub type WaitCallback = Box<dyn FnOnce() + Send>;

/// Read access to the leader's log, used by the entry pump to fetch entries
/// to batch and, on mismatch, the term of a conflicting entry (spec §4.4, §6).
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Index of the last entry in the log.
    async fn last_log_index(&self) -> Result<LogIndex, ReplicatorError>;

    /// Index of the oldest entry still retained (i.e. not yet compacted away).
    async fn first_log_index(&self) -> Result<LogIndex, ReplicatorError>;

    /// Term of the entry at `index`, or `None` if `index` is `0` or has been
    /// compacted away (spec §4.4: signals a required fallback to snapshot).
    async fn term_at(&self, index: LogIndex) -> Result<Option<Term>, ReplicatorError>;

    /// Up to `max_entries` entries starting at `start_index` (inclusive),
    /// stopping early once `max_body_size_bytes` total payload would be
    /// exceeded (spec §4.5 step 3). Returns fewer than `max_entries` entries
    /// if the log ends first or compaction has removed `start_index`.
    async fn entries_from(
        &self,
        start_index: LogIndex,
        max_entries: usize,
        max_body_size_bytes: usize,
    ) -> Result<Vec<crate::wire::Entry>, ReplicatorError>;

    /// Register a one-shot `callback` to run once the log has advanced past
    /// `index` (spec §4.5 step 4's pull-based wait). Returns an opaque
    /// `wait_id` usable with `remove_waiter` to cancel before it fires.
    async fn wait(&self, index: LogIndex, callback: WaitCallback) -> u64;

    /// Cancel a previously registered waiter. A no-op if it already fired or
    /// `wait_id` is stale (spec §4.4: destruction "removes any log-store
    /// waiter").
    async fn remove_waiter(&self, wait_id: u64);
}

/// The leader's commit-tracking collaborator. A replicator reports a peer's
/// newly matched index here; the ballot box decides whether that advances
/// the cluster's commit index (spec §4.5, §6).
#[async_trait]
pub trait BallotBox: Send + Sync {
    /// The cluster's current commit index, advertised to peers as
    /// `AppendEntries.committed_index` (spec §6) rather than a per-peer
    /// matched-index estimate.
    async fn last_committed_index(&self) -> Result<LogIndex, ReplicatorError>;

    async fn update_match_index(&self, peer: NodeId, matched: LogIndex) -> Result<(), ReplicatorError>;
}

/// Access to the leader's snapshot store, used when falling back to snapshot
/// transfer (spec §4.4 Snapshotting state, §4.1 snapshot reader ownership).
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Open the current snapshot for reading. The returned [`SnapshotReader`]
    /// is a scoped resource: its `Drop` impl releases any underlying lock or
    /// refcount held by the store.
    async fn open_current(&self) -> Result<Box<dyn SnapshotReader>, ReplicatorError>;
}

/// A scoped handle to an open snapshot, released on drop (spec §4.1).
#[async_trait]
pub trait SnapshotReader: Send {
    fn meta(&self) -> SnapshotMeta;

    /// A transfer-addressable URI for this snapshot's bytes (spec §6's wire
    /// grammar: `InstallSnapshotRequest::uri`). The follower fetches the
    /// bytes out-of-band; this component never streams snapshot bytes itself.
    async fn uri(&self) -> Result<String, ReplicatorError>;
}

/// Outbound RPC transport to the target peer (spec §6).
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn append_entries(
        &self,
        target: NodeId,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, ReplicatorError>;

    async fn install_snapshot(
        &self,
        target: NodeId,
        request: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse, ReplicatorError>;

    async fn timeout_now(
        &self,
        target: NodeId,
        request: TimeoutNowRequest,
    ) -> Result<TimeoutNowResponse, ReplicatorError>;
}

/// Scheduling collaborator for the heartbeat and block timers (spec §4.6).
///
/// Kept as a trait rather than calling `tokio::time` directly so tests can
/// substitute a controllable clock, following the teacher's `RaftRouter`
/// `send_delay` knob in `tests/fixtures/mod.rs`.
#[async_trait]
pub trait TimerService: Send + Sync {
    /// Sleep for `duration`, returning once it has elapsed.
    async fn sleep(&self, duration: std::time::Duration);
}

/// Narrow view into the owning node's leadership state, consulted on
/// step-down (spec §4.4, §4.8, §6).
#[async_trait]
pub trait NodeHandle: Send + Sync {
    /// Report that a higher term was observed in a peer response; the node
    /// should step down from leadership.
    async fn revert_to_follower(&self, group: GroupId, higher_term: Term);
}

/// Handles to update-able metrics surfaces (spec §4.1 metrics surface, §6).
/// Grouped behind a trait so an embedder can choose any metrics backend.
/// Names are registered lazily and duplicate registration under the same
/// name is tolerated — it returns the same handle rather than erroring
/// (spec §5: "duplicate registration is tolerated (ignored)").
pub trait MetricsRegistry: Send + Sync {
    fn gauge(&self, name: &str) -> GaugeHandle;
    fn counter(&self, name: &str) -> CounterHandle;
    fn histogram(&self, name: &str) -> HistogramHandle;
}

/// A settable gauge metric.
pub trait GaugeHandleImpl: Send + Sync {
    fn set(&self, value: u64);
}

/// An incrementable counter metric.
pub trait CounterHandleImpl: Send + Sync {
    fn increment(&self, by: u64);
}

/// A latency/duration histogram, recorded in nanoseconds. Kept as a plain
/// count+sum accumulator rather than the teacher pack's bucketed histograms
/// (`kimberlite-vsr::instrumentation`) — this component only needs to surface
/// mean RPC latency, not full percentile buckets.
pub trait HistogramHandleImpl: Send + Sync {
    fn record(&self, value_ns: u64);
}

pub type GaugeHandle = std::sync::Arc<dyn GaugeHandleImpl>;
pub type CounterHandle = std::sync::Arc<dyn CounterHandleImpl>;
pub type HistogramHandle = std::sync::Arc<dyn HistogramHandleImpl>;

/// A fully-owned, decoded entry payload handed to [`LogStore::entries_from`]
/// callers that need ownership rather than a borrow. Kept as a thin alias so
/// collaborator implementations aren't forced to depend on `bytes` in their
/// own public surface beyond what `wire::Entry` already requires.
pub type Payload = Bytes;
