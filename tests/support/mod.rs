//! Scripted collaborator doubles for integration tests.
//!
//! Grounded in the teacher's `MemRaft`/`RaftRouter` pair in
//! `async-raft/tests/fixtures/mod.rs`: an in-memory, `Mutex`-guarded log plus
//! a router that can be told in advance what each RPC should answer with.
//! Unlike the teacher's router (which actually drives a full cluster of
//! nodes), this one only ever has one peer on the other end, since a
//! replicator only ever talks to one.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use replicator::collaborators::BallotBox;
use replicator::collaborators::LogStore;
use replicator::collaborators::NodeHandle;
use replicator::collaborators::RpcClient;
use replicator::collaborators::SnapshotReader;
use replicator::collaborators::SnapshotStorage;
use replicator::collaborators::TimerService;
use replicator::collaborators::WaitCallback;
use replicator::wire::AppendEntriesRequest;
use replicator::wire::AppendEntriesResponse;
use replicator::wire::Entry;
use replicator::wire::EntryMeta;
use replicator::wire::EntryType;
use replicator::wire::InstallSnapshotRequest;
use replicator::wire::InstallSnapshotResponse;
use replicator::wire::SnapshotMeta;
use replicator::wire::TimeoutNowRequest;
use replicator::wire::TimeoutNowResponse;
use replicator::GroupId;
use replicator::LogIndex;
use replicator::NodeId;
use replicator::ReplicatorError;
use replicator::Term;

/// A leader-side in-memory log, with an optional compaction floor below which
/// `term_at`/`entries_from` behave as if those entries were removed.
///
/// Also stands in for the log store's wait/notify side: `wait` registers a
/// callback keyed by an opaque id, and any call that appends entries wakes
/// every registered waiter whose watched index has now been passed, the way
/// a real log store would notify blocked readers after a write.
pub struct MemLog {
    inner: Mutex<MemLogInner>,
    waiters: Mutex<HashMap<u64, (LogIndex, WaitCallback)>>,
    next_wait_id: AtomicU64,
}

struct MemLogInner {
    /// `entries[i]` is the entry at index `i + first_index`.
    entries: Vec<Entry>,
    first_index: LogIndex,
}

impl MemLog {
    pub fn new(first_index: LogIndex, entries: Vec<Entry>) -> Self {
        Self {
            inner: Mutex::new(MemLogInner { entries, first_index }),
            waiters: Mutex::new(HashMap::new()),
            next_wait_id: AtomicU64::new(1),
        }
    }

    /// Build a log of `count` no-op entries starting at index 1, each tagged
    /// with `term`.
    pub fn with_entries(count: u64, term: Term) -> Self {
        let entries = (1..=count)
            .map(|index| Entry {
                index,
                meta: EntryMeta { term, entry_type: EntryType::Normal, data_len: 0, peers: None, old_peers: None },
                data: bytes::Bytes::new(),
            })
            .collect();
        Self::new(1, entries)
    }

    /// Drop every entry below `new_first_index`, simulating compaction.
    pub fn compact_to(&self, new_first_index: LogIndex) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.retain(|e| e.index >= new_first_index);
        inner.first_index = new_first_index;
    }

    /// Append `count` further no-op entries after whatever is currently the
    /// last index, simulating new writes landing on the leader's log.
    pub fn append_entries(&self, count: u64, term: Term) {
        let last_index = {
            let mut inner = self.inner.lock().unwrap();
            let start = inner.entries.last().map(|e| e.index + 1).unwrap_or(inner.first_index);
            for index in start..start + count {
                inner.entries.push(Entry {
                    index,
                    meta: EntryMeta { term, entry_type: EntryType::Normal, data_len: 0, peers: None, old_peers: None },
                    data: bytes::Bytes::new(),
                });
            }
            inner.entries.last().map(|e| e.index).unwrap_or(inner.first_index.saturating_sub(1))
        };
        self.wake_waiters(last_index);
    }

    /// Fire and remove every registered waiter whose watched index has been
    /// passed by `last_log_index`.
    fn wake_waiters(&self, last_log_index: LogIndex) {
        let ready: Vec<u64> = {
            let waiters = self.waiters.lock().unwrap();
            waiters.iter().filter(|(_, (index, _))| last_log_index > *index).map(|(id, _)| *id).collect()
        };
        for id in ready {
            let callback = self.waiters.lock().unwrap().remove(&id);
            if let Some((_, callback)) = callback {
                callback();
            }
        }
    }
}

#[async_trait]
impl LogStore for MemLog {
    async fn last_log_index(&self) -> Result<LogIndex, ReplicatorError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.entries.last().map(|e| e.index).unwrap_or(inner.first_index.saturating_sub(1)))
    }

    async fn first_log_index(&self) -> Result<LogIndex, ReplicatorError> {
        Ok(self.inner.lock().unwrap().first_index)
    }

    async fn term_at(&self, index: LogIndex) -> Result<Option<Term>, ReplicatorError> {
        if index == 0 {
            return Ok(Some(0));
        }
        let inner = self.inner.lock().unwrap();
        if index < inner.first_index {
            return Ok(None);
        }
        Ok(inner.entries.iter().find(|e| e.index == index).map(|e| e.meta.term))
    }

    async fn entries_from(
        &self,
        start_index: LogIndex,
        max_entries: usize,
        _max_body_size_bytes: usize,
    ) -> Result<Vec<Entry>, ReplicatorError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.entries.iter().filter(|e| e.index >= start_index).take(max_entries).cloned().collect())
    }

    async fn wait(&self, index: LogIndex, callback: WaitCallback) -> u64 {
        let id = self.next_wait_id.fetch_add(1, Ordering::Relaxed);
        let last_log_index = self.inner.lock().unwrap().entries.last().map(|e| e.index).unwrap_or(0);
        if last_log_index > index {
            callback();
        } else {
            self.waiters.lock().unwrap().insert(id, (index, callback));
        }
        id
    }

    async fn remove_waiter(&self, wait_id: u64) {
        self.waiters.lock().unwrap().remove(&wait_id);
    }
}

/// Records every reported match index; a real ballot box would fold this into
/// a commit-index computation. `committed_index` is settable directly since
/// nothing in this double derives it from the matched indices it records.
#[derive(Default)]
pub struct RecordingBallotBox {
    pub matched: Mutex<Vec<(NodeId, LogIndex)>>,
    committed_index: std::sync::atomic::AtomicU64,
}

impl RecordingBallotBox {
    pub fn set_committed_index(&self, index: LogIndex) {
        self.committed_index.store(index, std::sync::atomic::Ordering::Relaxed);
    }
}

#[async_trait]
impl BallotBox for RecordingBallotBox {
    async fn last_committed_index(&self) -> Result<LogIndex, ReplicatorError> {
        Ok(self.committed_index.load(std::sync::atomic::Ordering::Relaxed))
    }

    async fn update_match_index(&self, peer: NodeId, matched: LogIndex) -> Result<(), ReplicatorError> {
        self.matched.lock().unwrap().push((peer, matched));
        Ok(())
    }
}

pub struct FixedSnapshotReader {
    meta: SnapshotMeta,
}

#[async_trait]
impl SnapshotReader for FixedSnapshotReader {
    fn meta(&self) -> SnapshotMeta {
        self.meta.clone()
    }

    async fn uri(&self) -> Result<String, ReplicatorError> {
        Ok(format!("mem://snapshot/{}", self.meta.last_included_index))
    }
}

pub struct FixedSnapshotStorage {
    pub meta: SnapshotMeta,
}

#[async_trait]
impl SnapshotStorage for FixedSnapshotStorage {
    async fn open_current(&self) -> Result<Box<dyn SnapshotReader>, ReplicatorError> {
        Ok(Box::new(FixedSnapshotReader { meta: self.meta.clone() }))
    }
}

/// One scripted answer for an `AppendEntries` RPC.
#[derive(Clone)]
pub enum ScriptedAppend {
    Success { last_log_index: LogIndex },
    Mismatch { last_log_index: LogIndex },
    HigherTerm { term: Term },
    TransportError,
}

/// Looked up by `(prev_log_index, is_probe)` rather than call order: a
/// zero-entry probe and the first real batch that follows it often share the
/// same `prev_log_index`, and tests that exercise out-of-order completion
/// (S2) need to delay individual answers independently of dispatch order.
#[derive(Clone)]
struct ScriptedAnswer {
    answer: ScriptedAppend,
    delay: std::time::Duration,
}

/// A router that answers RPCs from a pre-loaded script keyed by request
/// shape, and records every request it observed. Delays are driven through
/// `tokio::time::sleep`, meant to be used under `tokio::time::pause()` so
/// tests can force a precise completion order with `tokio::time::advance`.
#[derive(Default)]
pub struct ScriptedRouter {
    append_script: Mutex<std::collections::HashMap<(LogIndex, bool), ScriptedAnswer>>,
    install_snapshot_script: Mutex<VecDeque<Result<InstallSnapshotResponse, ReplicatorError>>>,
    timeout_now_script: Mutex<VecDeque<Result<TimeoutNowResponse, ReplicatorError>>>,
    pub append_requests: Mutex<Vec<AppendEntriesRequest>>,
    pub install_snapshot_requests: Mutex<Vec<InstallSnapshotRequest>>,
    pub timeout_now_requests: Mutex<Vec<TimeoutNowRequest>>,
    leader_term: Term,
}

impl ScriptedRouter {
    pub fn new(leader_term: Term) -> Self {
        Self { leader_term, ..Default::default() }
    }

    /// Script the answer to the `AppendEntries` whose `prev_log_index` is
    /// `prev_log_index` and whose entry count is empty (`is_probe`) or not.
    pub fn script_append(&self, prev_log_index: LogIndex, is_probe: bool, answer: ScriptedAppend) {
        self.script_append_delayed(prev_log_index, is_probe, answer, std::time::Duration::ZERO);
    }

    pub fn script_append_delayed(&self, prev_log_index: LogIndex, is_probe: bool, answer: ScriptedAppend, delay: std::time::Duration) {
        self.append_script.lock().unwrap().insert((prev_log_index, is_probe), ScriptedAnswer { answer, delay });
    }

    pub fn push_install_snapshot(&self, result: Result<InstallSnapshotResponse, ReplicatorError>) {
        self.install_snapshot_script.lock().unwrap().push_back(result);
    }

    pub fn push_timeout_now(&self, result: Result<TimeoutNowResponse, ReplicatorError>) {
        self.timeout_now_script.lock().unwrap().push_back(result);
    }
}

#[async_trait]
impl RpcClient for ScriptedRouter {
    async fn append_entries(&self, _target: NodeId, request: AppendEntriesRequest) -> Result<AppendEntriesResponse, ReplicatorError> {
        let is_probe = request.entries.is_empty();
        let key = (request.prev_log_index, is_probe);
        self.append_requests.lock().unwrap().push(request);
        let scripted = self.append_script.lock().unwrap().get(&key).cloned();
        let Some(scripted) = scripted else {
            return Ok(AppendEntriesResponse { term: self.leader_term, success: true, last_log_index: key.0 });
        };
        if scripted.delay > std::time::Duration::ZERO {
            tokio::time::sleep(scripted.delay).await;
        }
        match scripted.answer {
            ScriptedAppend::Success { last_log_index } => Ok(AppendEntriesResponse { term: self.leader_term, success: true, last_log_index }),
            ScriptedAppend::Mismatch { last_log_index } => Ok(AppendEntriesResponse { term: self.leader_term, success: false, last_log_index }),
            ScriptedAppend::HigherTerm { term } => Ok(AppendEntriesResponse { term, success: false, last_log_index: 0 }),
            ScriptedAppend::TransportError => Err(ReplicatorError::Transport("scripted failure".into())),
        }
    }

    async fn install_snapshot(&self, _target: NodeId, request: InstallSnapshotRequest) -> Result<InstallSnapshotResponse, ReplicatorError> {
        self.install_snapshot_requests.lock().unwrap().push(request);
        self.install_snapshot_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(InstallSnapshotResponse { term: self.leader_term, success: true }))
    }

    async fn timeout_now(&self, _target: NodeId, request: TimeoutNowRequest) -> Result<TimeoutNowResponse, ReplicatorError> {
        self.timeout_now_requests.lock().unwrap().push(request);
        self.timeout_now_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(TimeoutNowResponse { term: self.leader_term, success: true }))
    }
}

/// A timer service that never fires on its own; tests drive timing explicitly
/// via `Replicator::unblock_and_send_now`/`send_heartbeat` rather than racing
/// real sleeps, following the teacher's `send_delay` knob in spirit (here
/// pushed to the extreme of "never" rather than "after N ms").
pub struct NeverFiringTimerService;

#[async_trait]
impl TimerService for NeverFiringTimerService {
    async fn sleep(&self, _duration: std::time::Duration) {
        std::future::pending::<()>().await;
    }
}

#[derive(Default)]
pub struct RecordingNodeHandle {
    pub stepped_down: Mutex<Vec<(GroupId, Term)>>,
}

#[async_trait]
impl NodeHandle for RecordingNodeHandle {
    async fn revert_to_follower(&self, group: GroupId, higher_term: Term) {
        self.stepped_down.lock().unwrap().push((group, higher_term));
    }
}

pub struct Fixture {
    pub log: Arc<MemLog>,
    pub ballot_box: Arc<RecordingBallotBox>,
    pub router: Arc<ScriptedRouter>,
    pub node_handle: Arc<RecordingNodeHandle>,
    pub snapshot_storage: Arc<FixedSnapshotStorage>,
    pub metrics: Arc<replicator::metrics::ReplicatorMetrics>,
}

impl Fixture {
    pub fn new(last_log_index: u64, leader_term: Term) -> Self {
        let ballot_box = RecordingBallotBox::default();
        // The whole log starts out quorum-committed, matching a leader that
        // has already heard back from a majority for everything it holds;
        // individual tests can call `set_committed_index` to simulate lag.
        ballot_box.set_committed_index(last_log_index);
        Self {
            log: Arc::new(MemLog::with_entries(last_log_index, leader_term)),
            ballot_box: Arc::new(ballot_box),
            router: Arc::new(ScriptedRouter::new(leader_term)),
            node_handle: Arc::new(RecordingNodeHandle::default()),
            snapshot_storage: Arc::new(FixedSnapshotStorage {
                meta: SnapshotMeta { last_included_index: 0, last_included_term: leader_term },
            }),
            metrics: Arc::new(replicator::metrics::ReplicatorMetrics::new()),
        }
    }

    pub fn collaborators(&self) -> replicator::replicator::Collaborators {
        replicator::replicator::Collaborators {
            log_store: self.log.clone(),
            ballot_box: self.ballot_box.clone(),
            snapshot_storage: self.snapshot_storage.clone(),
            rpc_client: self.router.clone(),
            timer_service: Arc::new(NeverFiringTimerService),
            node_handle: self.node_handle.clone(),
            metrics: self.metrics.clone(),
        }
    }
}
