//! Runtime configuration for a replicator.
//!
//! Follows the teacher's builder-then-validate pattern (`Config::build(name).validate()`,
//! see `async-raft`'s `tests/leader_metrics.rs`).

use std::time::Duration;

use crate::error::ReplicatorError;

/// Runtime configuration shared by all replicators of a consensus group.
#[derive(Debug, Clone)]
pub struct Config {
    /// Human-readable cluster/group name, used in metric names
    /// (`replicator-<group>/<peer>`, spec §5) and tracing spans.
    pub cluster_name: String,

    /// Admission cap on the inflight queue (spec §4.2 rule 1).
    pub max_inflight_msgs: usize,

    /// Maximum number of entries batched into a single `AppendEntries` (spec §4.5
    /// step 3).
    pub max_entries_per_batch: usize,

    /// Maximum accumulated payload size, in bytes, per `AppendEntries` batch (spec
    /// §4.5 step 3).
    pub max_body_size_bytes: usize,

    /// Heartbeat interval in milliseconds; also used, per spec §4.6, as the base
    /// duration for the block timer.
    pub heartbeat_interval_ms: u64,

    /// Lower bound of the election timeout range, used to derive the per-RPC
    /// heartbeat deadline (`election_timeout / 2`, spec §5).
    pub election_timeout_min_ms: u64,
    /// Upper bound of the election timeout range.
    pub election_timeout_max_ms: u64,

    /// Maximum chunk size used by `SnapshotStorage` implementations that stream
    /// snapshot bytes rather than handing over a URI.
    pub snapshot_max_chunk_size: usize,

    /// Default due-time for a catch-up wait when the caller does not specify one,
    /// in milliseconds. `0` means "no timeout."
    pub catchup_default_timeout_ms: u64,
}

impl Config {
    /// Start building a config for the named cluster.
    pub fn build(cluster_name: String) -> ConfigBuilder {
        ConfigBuilder {
            cluster_name,
            max_inflight_msgs: 16,
            max_entries_per_batch: 64,
            max_body_size_bytes: 1024 * 1024,
            heartbeat_interval_ms: 150,
            election_timeout_min_ms: 1500,
            election_timeout_max_ms: 3000,
            snapshot_max_chunk_size: 4 * 1024 * 1024,
            catchup_default_timeout_ms: 0,
        }
    }

    /// The per-RPC heartbeat timeout, `election_timeout / 2` as specified in §5.
    pub fn heartbeat_rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.election_timeout_min_ms / 2)
    }

    /// The duration used to arm both the heartbeat timer and the block timer
    /// (spec §4.6: "Duration equals the heartbeat timeout").
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Builder for [`Config`], following the teacher's `Config::build(name).validate()`
/// idiom.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    pub cluster_name: String,
    pub max_inflight_msgs: usize,
    pub max_entries_per_batch: usize,
    pub max_body_size_bytes: usize,
    pub heartbeat_interval_ms: u64,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub snapshot_max_chunk_size: usize,
    pub catchup_default_timeout_ms: u64,
}

impl ConfigBuilder {
    pub fn max_inflight_msgs(mut self, v: usize) -> Self {
        self.max_inflight_msgs = v;
        self
    }

    pub fn max_entries_per_batch(mut self, v: usize) -> Self {
        self.max_entries_per_batch = v;
        self
    }

    pub fn max_body_size_bytes(mut self, v: usize) -> Self {
        self.max_body_size_bytes = v;
        self
    }

    pub fn heartbeat_interval_ms(mut self, v: u64) -> Self {
        self.heartbeat_interval_ms = v;
        self
    }

    pub fn election_timeout_range_ms(mut self, min: u64, max: u64) -> Self {
        self.election_timeout_min_ms = min;
        self.election_timeout_max_ms = max;
        self
    }

    /// Validate the config, producing an immutable [`Config`].
    pub fn validate(self) -> Result<Config, ReplicatorError> {
        if self.max_inflight_msgs == 0 {
            return Err(ReplicatorError::InvalidConfig("max_inflight_msgs must be > 0".into()));
        }
        if self.max_entries_per_batch == 0 {
            return Err(ReplicatorError::InvalidConfig("max_entries_per_batch must be > 0".into()));
        }
        if self.max_body_size_bytes == 0 {
            return Err(ReplicatorError::InvalidConfig("max_body_size_bytes must be > 0".into()));
        }
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return Err(ReplicatorError::InvalidConfig(
                "election_timeout_min_ms must be < election_timeout_max_ms".into(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ReplicatorError::InvalidConfig("heartbeat_interval_ms must be > 0".into()));
        }
        Ok(Config {
            cluster_name: self.cluster_name,
            max_inflight_msgs: self.max_inflight_msgs,
            max_entries_per_batch: self.max_entries_per_batch,
            max_body_size_bytes: self.max_body_size_bytes,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            election_timeout_min_ms: self.election_timeout_min_ms,
            election_timeout_max_ms: self.election_timeout_max_ms,
            snapshot_max_chunk_size: self.snapshot_max_chunk_size,
            catchup_default_timeout_ms: self.catchup_default_timeout_ms,
        })
    }
}
