//! The per-follower replicator state machine (spec §3, §4.4).
//!
//! Submodules hold the bulk of the behavior as `impl ReplicatorState` blocks:
//! [`entry_pump`] (the `AppendEntries` batching loop), [`response`] (reorder
//! drain and mismatch/success handling), [`timers`] (heartbeat/block timer
//! arming), and [`transfer`] (leadership transfer / `TimeoutNow`). This file
//! holds the shared types, construction, and the small set of control-surface
//! entry points that don't belong more naturally in one of those.

mod entry_pump;
mod response;
mod timers;
mod transfer;

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing_futures::Instrument;

use crate::catchup::CatchupOutcome;
use crate::catchup::CatchupSlot;
use crate::collaborators::BallotBox;
use crate::collaborators::GaugeHandleImpl;
use crate::collaborators::LogStore;
use crate::collaborators::MetricsRegistry;
use crate::collaborators::NodeHandle;
use crate::collaborators::RpcClient;
use crate::collaborators::SnapshotReader;
use crate::collaborators::SnapshotStorage;
use crate::collaborators::TimerService;
use crate::config::Config;
use crate::error::ErrorCode;
use crate::error::ReplicatorError;
use crate::inflight::InflightQueue;
use crate::latch::Latch;
use crate::registry::ReplicatorRegistry;
use crate::reorder::ReorderBuffer;
use crate::GroupId;
use crate::LogIndex;
use crate::NodeId;
use crate::Term;

/// The replicator's lifecycle state (spec §4.4): `Probe → Replicate ↔
/// Snapshot → Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Probe,
    Replicate,
    Snapshot,
    Destroyed,
}

/// Opaque identity token minted by [`ReplicatorRegistry::insert`] (spec §3's
/// Ownership paragraph, SPEC_FULL §12). Carries no data beyond a generation
/// number; a stale id simply fails to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplicatorId(pub(crate) u64);

/// The shared collaborators a replicator is handed at construction (spec §6's
/// "Collaborator contracts consumed").
#[derive(Clone)]
pub struct Collaborators {
    pub log_store: Arc<dyn LogStore>,
    pub ballot_box: Arc<dyn BallotBox>,
    pub snapshot_storage: Arc<dyn SnapshotStorage>,
    pub rpc_client: Arc<dyn RpcClient>,
    pub timer_service: Arc<dyn TimerService>,
    pub node_handle: Arc<dyn NodeHandle>,
    pub metrics: Arc<dyn MetricsRegistry>,
}

/// Arguments to [`Replicator::start`] (spec §6's control surface).
pub struct StartOptions {
    pub group: GroupId,
    pub peer: NodeId,
    pub server_id: NodeId,
    pub term: Term,
    /// The leader's best initial guess at the peer's next index; usually
    /// `leader_last_log_index + 1`.
    pub next_index: LogIndex,
    pub config: Arc<Config>,
    pub collaborators: Collaborators,
}

/// The full mutable state of one replicator, held inside a [`Latch`] (spec §3).
pub struct ReplicatorState {
    pub(crate) id: ReplicatorId,
    pub(crate) group: GroupId,
    pub(crate) peer: NodeId,
    pub(crate) server_id: NodeId,
    pub(crate) term: Term,

    pub(crate) next_index: LogIndex,
    pub(crate) state: State,
    pub(crate) has_succeeded: bool,
    pub(crate) consecutive_errors: u32,
    pub(crate) last_rpc_send_ts: Instant,

    /// Reset-generation counter (spec §3, §7). Bumped by `reset_inflights`.
    pub(crate) version: u64,
    pub(crate) required_next_seq: u64,

    pub(crate) timeout_now_index: LogIndex,
    pub(crate) catchup: Option<CatchupSlot>,
    pub(crate) snapshot_reader: Option<Box<dyn SnapshotReader>>,

    pub(crate) inflights: InflightQueue,
    pub(crate) pending_responses: ReorderBuffer,

    pub(crate) heartbeat_timer_generation: u64,
    pub(crate) block_timer_generation: u64,
    pub(crate) heartbeat_in_fly: bool,
    pub(crate) timeout_now_in_fly: bool,
    pub(crate) wait_id: Option<u64>,

    pub(crate) config: Arc<Config>,
    pub(crate) collaborators: Collaborators,

    /// Handle back to the registry this replicator was minted from, used by
    /// [`finalize`] to deregister on destruction (spec §3's "lookup fails
    /// after destruction").
    pub(crate) registry: ReplicatorRegistry,

    /// Weak reference to this replicator's own latch, set once at
    /// registration. Lets internal handlers (e.g. heartbeat completion)
    /// schedule their own reentry without every caller threading an
    /// `Arc<Latch<_>>` through — the "capability handle that knows how to
    /// schedule reentry" pattern from the design notes.
    pub(crate) self_latch: std::sync::Weak<Latch<ReplicatorState>>,
}

impl ReplicatorState {
    fn new(id: ReplicatorId, registry: ReplicatorRegistry, opts: StartOptions) -> Self {
        Self {
            id,
            group: opts.group,
            peer: opts.peer,
            server_id: opts.server_id,
            term: opts.term,
            next_index: opts.next_index.max(1),
            state: State::Probe,
            has_succeeded: false,
            consecutive_errors: 0,
            last_rpc_send_ts: Instant::now(),
            version: 0,
            required_next_seq: 0,
            timeout_now_index: 0,
            catchup: None,
            snapshot_reader: None,
            inflights: InflightQueue::new(),
            pending_responses: ReorderBuffer::new(),
            heartbeat_timer_generation: 0,
            block_timer_generation: 0,
            heartbeat_in_fly: false,
            timeout_now_in_fly: false,
            wait_id: None,
            config: opts.config,
            collaborators: opts.collaborators,
            registry,
            self_latch: std::sync::Weak::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn test_default() -> Self {
        use crate::config::Config;
        use std::sync::Arc;

        Self::new(
            ReplicatorId(0),
            ReplicatorRegistry::new(),
            StartOptions {
                group: GroupId::from("test-group"),
                peer: 2,
                server_id: 1,
                term: 1,
                next_index: 1,
                config: Arc::new(Config::build("test".into()).validate().unwrap()),
                collaborators: crate::tests_support::noop_collaborators(),
            },
        )
    }

    /// Is this replicator alive, i.e. not [`State::Destroyed`]?
    pub fn is_live(&self) -> bool {
        self.state != State::Destroyed
    }

    /// Metric name prefix, spec §5: `replicator-<group>/<peer>`.
    pub(crate) fn metric_prefix(&self) -> String {
        format!("replicator-{}/{}", self.group, self.peer)
    }

    /// Deliver `ETIMEDOUT`/`ESTOP`/etc through the latch's error hook (spec §4.1,
    /// §7). Called with the guard already held.
    pub(crate) async fn on_error(&mut self, code: ErrorCode) {
        match code {
            ErrorCode::TimedOut => {
                self.dispatch_heartbeat().await;
            }
            ErrorCode::Stop => {
                self.begin_destroy().await;
            }
            ErrorCode::Perm => {
                self.begin_destroy().await;
            }
            ErrorCode::Inval => {
                tracing::warn!(peer = self.peer, "unexpected EINVAL delivered to on_error");
            }
        }
    }

    /// Unconditionally bump `version`, clear the inflight/reorder state, and
    /// release the snapshot reader (spec §7's `reset_inflights`).
    pub(crate) fn reset_inflights(&mut self) {
        self.version = self.version.wrapping_add(1);
        let next_seq = self.inflights.peek_next_seq().max(self.required_next_seq);
        self.inflights.reset();
        self.pending_responses.reset();
        self.required_next_seq = next_seq;
        self.snapshot_reader = None;
    }

    /// Transition into `Destroyed`: cancel outstanding work, notify the
    /// catch-up closure, release the snapshot reader, and remove any
    /// outstanding log-store waiter (spec §4.4).
    pub(crate) async fn begin_destroy(&mut self) {
        if self.state == State::Destroyed {
            return;
        }
        self.state = State::Destroyed;
        self.inflights.reset();
        self.pending_responses.reset();
        self.snapshot_reader = None;
        if let Some(wait_id) = self.wait_id.take() {
            self.collaborators.log_store.remove_waiter(wait_id).await;
        }
        if let Some(mut catchup) = self.catchup.take() {
            catchup.resolve(CatchupOutcome::Destroyed);
        }
        self.heartbeat_timer_generation = self.heartbeat_timer_generation.wrapping_add(1);
        self.block_timer_generation = self.block_timer_generation.wrapping_add(1);
    }
}

/// Release a guard acquired via `latch.lock()`, finalizing destruction if the
/// logical state transitioned to [`State::Destroyed`] during this reentry.
///
/// Every internal reentry point (RPC completions, timer firings, control
/// calls) goes through this instead of letting the guard simply drop, since
/// `begin_destroy` only updates `state` — it cannot itself call
/// `Latch::unlock_and_destroy` because that consumes the guard, which
/// internal handlers only ever see through `&mut self`.
pub(crate) async fn finalize(latch: &Arc<Latch<ReplicatorState>>, guard: crate::latch::LatchGuard<'_, ReplicatorState>) {
    if guard.state == State::Destroyed {
        let id = guard.id;
        let registry = guard.registry.clone();
        let taken = Latch::unlock_and_destroy(guard);
        drop(taken);
        latch.notify_destroyed();
        registry.remove(id);
    } else {
        Latch::unlock(guard);
    }
}

/// A handle to a live replicator, resolved from a [`ReplicatorId`] through a
/// [`ReplicatorRegistry`].
#[derive(Clone)]
pub struct Replicator {
    pub id: ReplicatorId,
    latch: Arc<Latch<ReplicatorState>>,
}

impl Replicator {
    /// Create, register metrics, arm the heartbeat timer, and emit an initial
    /// probe (spec §6's `start`).
    pub async fn start(registry: &ReplicatorRegistry, opts: StartOptions) -> Option<Replicator> {
        let metrics = opts.collaborators.metrics.clone();
        let group = opts.group.clone();
        let peer = opts.peer;
        let state = ReplicatorState::new(ReplicatorId(0), registry.clone(), opts);
        let (id, latch) = registry.insert(state);
        let mut guard = latch.lock().await?;
        guard.id = id;
        guard.self_latch = Arc::downgrade(&latch);
        metrics.gauge(&format!("{}/next-index", guard.metric_prefix())).set(guard.next_index);
        let span = tracing::info_span!("replicator", group = %group, peer = peer);
        async {
            guard.arm_heartbeat_timer(&latch);
            guard.send_entries(&latch).await;
        }
        .instrument(span)
        .await;
        finalize(&latch, guard).await;
        Some(Replicator { id, latch })
    }

    /// Register a one-shot catch-up notification (spec §4.7, §6).
    pub async fn wait_for_caught_up(
        &self,
        max_margin: LogIndex,
        due_time_ms: u64,
    ) -> Result<oneshot::Receiver<CatchupOutcome>, ReplicatorError> {
        let mut guard = self.latch.lock().await.ok_or(ReplicatorError::Destroyed)?;
        if guard.catchup.is_some() {
            return Err(ReplicatorError::AlreadyWaiting);
        }
        let (tx, rx) = oneshot::channel();
        let timer_service = guard.collaborators.timer_service.clone();
        let latch = self.latch.clone();
        let timer = if due_time_ms > 0 {
            Some(tokio::spawn(async move {
                timer_service.sleep(std::time::Duration::from_millis(due_time_ms)).await;
                if let Some(mut guard) = latch.lock().await {
                    if let Some(mut catchup) = guard.catchup.take() {
                        catchup.resolve(CatchupOutcome::TimedOut);
                    }
                }
            }))
        } else {
            None
        };
        let last_log_index = guard.collaborators.log_store.last_log_index().await.unwrap_or(guard.next_index.saturating_sub(1));
        let mut slot = CatchupSlot::new(max_margin, tx, timer);
        if crate::catchup::has_caught_up(guard.next_index, max_margin, last_log_index) {
            slot.resolve(CatchupOutcome::CaughtUp);
        }
        guard.catchup = Some(slot);
        Latch::unlock(guard);
        Ok(rx)
    }

    pub async fn stop(&self) {
        if let Some(mut guard) = self.latch.lock().await {
            guard.on_error(ErrorCode::Stop).await;
            finalize(&self.latch, guard).await;
        }
    }

    pub async fn join(&self) {
        self.latch.join().await;
    }

    pub async fn get_next_index(&self) -> Option<LogIndex> {
        Some(self.latch.lock().await?.next_index)
    }

    pub async fn get_last_rpc_send_ts(&self) -> Option<Instant> {
        Some(self.latch.lock().await?.last_rpc_send_ts)
    }

    pub async fn unblock_and_send_now(&self) {
        if let Some(mut guard) = self.latch.lock().await {
            guard.block_timer_generation = guard.block_timer_generation.wrapping_add(1);
            guard.send_entries(&self.latch).await;
            finalize(&self.latch, guard).await;
        }
    }

    pub async fn send_heartbeat(&self) {
        if let Some(mut guard) = self.latch.lock().await {
            guard.dispatch_heartbeat().await;
            finalize(&self.latch, guard).await;
        }
    }

    pub async fn transfer_leadership(&self, log_index: LogIndex) -> bool {
        let Some(mut guard) = self.latch.lock().await else { return false };
        let started = guard.begin_transfer_leadership(&self.latch, log_index);
        finalize(&self.latch, guard).await;
        started
    }

    pub async fn stop_transfer_leadership(&self) -> bool {
        let Some(mut guard) = self.latch.lock().await else { return false };
        let was_active = guard.timeout_now_index > 0;
        guard.timeout_now_index = 0;
        Latch::unlock(guard);
        was_active
    }

    pub async fn send_timeout_now_and_stop(&self, timeout_ms: u64) -> bool {
        let Some(guard) = self.latch.lock().await else { return false };
        guard.dispatch_timeout_now_and_stop(&self.latch, timeout_ms);
        finalize(&self.latch, guard).await;
        true
    }
}
