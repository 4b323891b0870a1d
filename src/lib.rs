//! A per-follower Raft-style log replicator.
//!
//! A [`Replicator`](replicator::Replicator) is instantiated once per remote peer by a
//! consensus leader. It drives that peer's log up to date via pipelined `AppendEntries`
//! RPCs, maintains liveness through heartbeats, falls back to snapshot transfer when the
//! peer's log has diverged or been truncated, and participates in leadership transfer.
//!
//! This crate specifies only the replicator itself. The log store, ballot box, snapshot
//! store, node term machinery, RPC transport and metrics registry are external
//! collaborators; this crate only depends on the trait interfaces in [`collaborators`].

pub mod catchup;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod inflight;
pub mod latch;
pub mod metrics;
pub mod registry;
pub mod reorder;
pub mod replicator;
#[cfg(test)]
pub(crate) mod tests_support;
pub mod wire;

pub use collaborators::BallotBox;
pub use collaborators::LogStore;
pub use collaborators::MetricsRegistry;
pub use collaborators::NodeHandle;
pub use collaborators::RpcClient;
pub use collaborators::SnapshotReader;
pub use collaborators::SnapshotStorage;
pub use collaborators::TimerService;
pub use config::Config;
pub use error::ErrorCode;
pub use error::ReplicatorError;
pub use registry::ReplicatorRegistry;
pub use replicator::Replicator;
pub use replicator::ReplicatorId;
pub use replicator::StartOptions;
pub use replicator::State;

/// A Raft node identifier.
pub type NodeId = u64;
/// A Raft consensus group identifier.
pub type GroupId = std::sync::Arc<str>;
/// A Raft term.
pub type Term = u64;
/// A 1-based log index. `0` denotes "no entry."
pub type LogIndex = u64;
