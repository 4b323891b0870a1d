//! Minimal collaborator stand-ins for unit tests that only need a
//! `ReplicatorState` to exist, not to exercise any particular collaborator
//! behavior (e.g. `registry.rs`'s tests). Integration tests use the richer
//! scripted doubles in `tests/support/mod.rs` instead.

use async_trait::async_trait;

use crate::collaborators::BallotBox;
use crate::collaborators::LogStore;
use crate::collaborators::NodeHandle;
use crate::collaborators::RpcClient;
use crate::collaborators::SnapshotStorage;
use crate::collaborators::TimerService;
use crate::error::ReplicatorError;
use crate::metrics::ReplicatorMetrics;
use crate::replicator::Collaborators;
use crate::wire::AppendEntriesRequest;
use crate::wire::AppendEntriesResponse;
use crate::wire::InstallSnapshotRequest;
use crate::wire::InstallSnapshotResponse;
use crate::wire::TimeoutNowRequest;
use crate::wire::TimeoutNowResponse;
use crate::GroupId;
use crate::LogIndex;
use crate::NodeId;
use crate::Term;
use std::sync::Arc;

struct NoopLogStore;

#[async_trait]
impl LogStore for NoopLogStore {
    async fn last_log_index(&self) -> Result<LogIndex, ReplicatorError> {
        Ok(0)
    }
    async fn first_log_index(&self) -> Result<LogIndex, ReplicatorError> {
        Ok(1)
    }
    async fn term_at(&self, _index: LogIndex) -> Result<Option<Term>, ReplicatorError> {
        Ok(None)
    }
    async fn entries_from(
        &self,
        _start_index: LogIndex,
        _max_entries: usize,
        _max_body_size_bytes: usize,
    ) -> Result<Vec<crate::wire::Entry>, ReplicatorError> {
        Ok(Vec::new())
    }
    async fn wait(&self, _index: LogIndex, _callback: crate::collaborators::WaitCallback) -> u64 {
        0
    }
    async fn remove_waiter(&self, _wait_id: u64) {}
}

struct NoopBallotBox;

#[async_trait]
impl BallotBox for NoopBallotBox {
    async fn last_committed_index(&self) -> Result<LogIndex, ReplicatorError> {
        Ok(0)
    }
    async fn update_match_index(&self, _peer: NodeId, _matched: LogIndex) -> Result<(), ReplicatorError> {
        Ok(())
    }
}

struct NoopSnapshotStorage;

#[async_trait]
impl SnapshotStorage for NoopSnapshotStorage {
    async fn open_current(&self) -> Result<Box<dyn crate::collaborators::SnapshotReader>, ReplicatorError> {
        Err(ReplicatorError::SnapshotIo("no snapshot available in test stand-in".into()))
    }
}

struct NoopRpcClient;

#[async_trait]
impl RpcClient for NoopRpcClient {
    async fn append_entries(&self, _target: NodeId, _request: AppendEntriesRequest) -> Result<AppendEntriesResponse, ReplicatorError> {
        Err(ReplicatorError::Transport("test stand-in never sends".into()))
    }
    async fn install_snapshot(
        &self,
        _target: NodeId,
        _request: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse, ReplicatorError> {
        Err(ReplicatorError::Transport("test stand-in never sends".into()))
    }
    async fn timeout_now(&self, _target: NodeId, _request: TimeoutNowRequest) -> Result<TimeoutNowResponse, ReplicatorError> {
        Err(ReplicatorError::Transport("test stand-in never sends".into()))
    }
}

struct NoopTimerService;

#[async_trait]
impl TimerService for NoopTimerService {
    async fn sleep(&self, duration: std::time::Duration) {
        tokio::time::sleep(duration).await;
    }
}

struct NoopNodeHandle;

#[async_trait]
impl NodeHandle for NoopNodeHandle {
    async fn revert_to_follower(&self, _group: GroupId, _higher_term: Term) {}
}

pub(crate) fn noop_collaborators() -> Collaborators {
    Collaborators {
        log_store: Arc::new(NoopLogStore),
        ballot_box: Arc::new(NoopBallotBox),
        snapshot_storage: Arc::new(NoopSnapshotStorage),
        rpc_client: Arc::new(NoopRpcClient),
        timer_service: Arc::new(NoopTimerService),
        node_handle: Arc::new(NoopNodeHandle),
        metrics: Arc::new(ReplicatorMetrics::new()),
    }
}
