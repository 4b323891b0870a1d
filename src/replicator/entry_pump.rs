//! Entry batching loop (spec §4.5).
//!
//! Grounded in the teacher's `frontload_outbound_buffer`/`prep_outbound_buffer_from_storage`
//! pair in `async-raft/src/replication/mod.rs`, generalized from "refill one
//! buffer, send it" to "admit as many pipelined batches as the inflight cap
//! and tail-admission rule allow in one latch acquisition."

use std::sync::Arc;

use crate::collaborators::CounterHandleImpl;
use crate::latch::Latch;
use crate::wire::AppendEntriesRequest;
use crate::LogIndex;

use super::finalize;
use super::ReplicatorState;
use super::State;

impl ReplicatorState {
    /// Drive as many `AppendEntries` sends as admission allows, looping until
    /// `next_send_index` stops advancing (spec §4.5).
    ///
    /// Must be called with the latch held; each iteration that actually sends
    /// a request spawns the RPC off the latch (non-blocking) before looping
    /// to consider the next one.
    pub(crate) async fn send_entries(&mut self, latch: &Arc<Latch<ReplicatorState>>) {
        if self.state == State::Destroyed || self.state == State::Snapshot {
            return;
        }
        loop {
            let Some(start_index) = self.inflights.next_send_index(self.config.max_inflight_msgs, self.next_index) else {
                break;
            };
            let prev_log_index = start_index.saturating_sub(1);
            let prev_log_term = match self.collaborators.log_store.term_at(prev_log_index).await {
                Ok(Some(term)) => term,
                Ok(None) => 0,
                Err(err) => {
                    tracing::warn!(peer = self.peer, error = %err, "log store term_at failed");
                    0
                }
            };

            if prev_log_term == 0 && prev_log_index != 0 {
                self.begin_snapshot_transition(latch).await;
                return;
            }

            if self.state == State::Probe {
                // The match point hasn't been confirmed yet: verify it with a
                // zero-entry probe before committing to a real batch (spec
                // §4.4). Its tail blocks further admission until it resolves.
                let req_seq = self.inflights.push(start_index, 0);
                let request = AppendEntriesRequest {
                    term: self.term,
                    group_id: self.group.clone(),
                    server_id: self.server_id,
                    peer_id: self.peer,
                    prev_log_index,
                    prev_log_term,
                    committed_index: self.committed_index().await,
                    entries: Vec::new(),
                    data: bytes::Bytes::new(),
                };
                self.dispatch_append_entries(latch.clone(), req_seq, request);
                return;
            }

            let entries = match self
                .collaborators
                .log_store
                .entries_from(start_index, self.config.max_entries_per_batch, self.config.max_body_size_bytes)
                .await
            {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(peer = self.peer, error = %err, "log store entries_from failed");
                    Vec::new()
                }
            };

            if entries.is_empty() {
                let first_index = self.collaborators.log_store.first_log_index().await.unwrap_or(start_index);
                if start_index < first_index {
                    self.begin_snapshot_transition(latch).await;
                    return;
                }
                self.register_log_waiter(latch.clone(), prev_log_index).await;
                return;
            }

            let entry_count = entries.len();
            let req_seq = self.inflights.push(start_index, entry_count);
            let request = AppendEntriesRequest {
                term: self.term,
                group_id: self.group.clone(),
                server_id: self.server_id,
                peer_id: self.peer,
                prev_log_index,
                prev_log_term,
                committed_index: self.committed_index().await,
                entries,
                data: bytes::Bytes::new(),
            };
            self.collaborators.metrics.counter("append_entries_sent").increment(1);
            self.dispatch_append_entries(latch.clone(), req_seq, request);

            if self.inflights.next_send_index(self.config.max_inflight_msgs, self.next_index).is_none() {
                break;
            }
        }
    }

    /// The leader's commit index, as advertised to the peer on the wire
    /// (spec §6's `BallotBox::last_committed_index`). This is the cluster's
    /// quorum-commit point, not this peer's own matched-index estimate — a
    /// follower must never be told to apply past what a quorum has actually
    /// committed.
    pub(crate) async fn committed_index(&self) -> LogIndex {
        match self.collaborators.ballot_box.last_committed_index().await {
            Ok(index) => index,
            Err(err) => {
                tracing::warn!(peer = self.peer, error = %err, "ballot box last_committed_index failed");
                0
            }
        }
    }

    fn dispatch_append_entries(
        &mut self,
        latch: Arc<Latch<ReplicatorState>>,
        req_seq: u64,
        request: AppendEntriesRequest,
    ) {
        let version = self.version;
        let peer = self.peer;
        let rpc_client = self.collaborators.rpc_client.clone();
        let metrics = self.collaborators.metrics.clone();
        self.last_rpc_send_ts = tokio::time::Instant::now();
        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let result = rpc_client.append_entries(peer, request).await;
            metrics.histogram("append_entries_times").record(started.elapsed().as_nanos() as u64);
            let Some(mut guard) = latch.lock().await else { return };
            if guard.version != version {
                Latch::unlock(guard);
                return;
            }
            guard.on_append_entries_completed(&latch, req_seq, result).await;
            finalize(&latch, guard).await;
        });
    }

    /// Register a single-shot waiter with the log store, to be woken once new
    /// entries land past `at_index` (spec §4.5 step 4's pull-based
    /// `wait(index, callback)`). Replaces any previously registered waiter,
    /// though `send_entries` never calls this while one is already
    /// outstanding (spec §7 property #6: at most one log-store waiter).
    async fn register_log_waiter(&mut self, latch: Arc<Latch<ReplicatorState>>, at_index: LogIndex) {
        let version = self.version;
        let callback_latch = latch.clone();
        let callback: crate::collaborators::WaitCallback = Box::new(move || {
            tokio::spawn(async move {
                let Some(mut guard) = callback_latch.lock().await else { return };
                if guard.version != version {
                    Latch::unlock(guard);
                    return;
                }
                guard.wait_id = None;
                guard.send_entries(&callback_latch).await;
                finalize(&callback_latch, guard).await;
            });
        });
        let wait_id = self.collaborators.log_store.wait(at_index, callback).await;
        self.wait_id = Some(wait_id);
    }
}
