//! Response handling: reorder drain, mismatch recovery, success effects,
//! and the snapshot fallback (spec §4.3, §4.4, §4.5).

use std::sync::Arc;

use crate::catchup::CatchupOutcome;
use crate::collaborators::CounterHandleImpl;
use crate::collaborators::GaugeHandleImpl;
use crate::error::ReplicatorError;
use crate::latch::Latch;
use crate::reorder::RpcResponse;
use crate::wire::AppendEntriesResponse;
use crate::wire::InstallSnapshotRequest;
use crate::wire::InstallSnapshotResponse;
use crate::LogIndex;

use super::finalize;
use super::ReplicatorState;
use super::State;

impl ReplicatorState {
    /// Entry point for a completed `AppendEntries` RPC (spec §4.3). Pushes
    /// the response into the reorder buffer, then drains whatever prefix is
    /// now contiguous.
    pub(crate) async fn on_append_entries_completed(
        &mut self,
        latch: &Arc<Latch<ReplicatorState>>,
        req_seq: u64,
        result: Result<AppendEntriesResponse, ReplicatorError>,
    ) {
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                self.on_transport_failure(latch, &err).await;
                return;
            }
        };

        if self.handle_higher_term(latch, response.term).await {
            return;
        }

        self.pending_responses.push(RpcResponse {
            seq: req_seq,
            term: response.term,
            success: response.success,
            last_log_index: response.last_log_index,
        });

        if self.pending_responses.len() > self.config.max_inflight_msgs {
            tracing::warn!(peer = self.peer, "pending response backlog exceeded max_inflight_msgs");
            self.reset_inflights();
            self.state = State::Probe;
            self.send_entries(latch).await;
            return;
        }

        self.drain_responses(latch).await;
    }

    /// Drain the reorder buffer's contiguous prefix, applying each response's
    /// effects in sequence order (spec §4.3).
    async fn drain_responses(&mut self, latch: &Arc<Latch<ReplicatorState>>) {
        loop {
            let (ready, next_required) = self.pending_responses.drain_ready(self.required_next_seq);
            if ready.is_empty() {
                break;
            }
            self.required_next_seq = next_required;
            for response in ready {
                let Some(inflight) = self.inflights.remove(response.seq) else {
                    tracing::error!(
                        peer = self.peer,
                        seq = response.seq,
                        "protocol invariant violated: response seq not found in inflights"
                    );
                    self.reset_inflights();
                    self.state = State::Probe;
                    self.send_entries(latch).await;
                    return;
                };

                if response.success {
                    if inflight.start_index != self.next_index {
                        tracing::error!(
                            peer = self.peer,
                            expected = self.next_index,
                            got = inflight.start_index,
                            "protocol invariant violated: inflight start_index does not match next_index"
                        );
                        self.reset_inflights();
                        self.state = State::Probe;
                        self.send_entries(latch).await;
                        return;
                    }
                    self.apply_success(latch, inflight.count).await;
                } else {
                    self.apply_mismatch(response.last_log_index).await;
                    self.reset_inflights();
                    self.state = State::Probe;
                    self.send_entries(latch).await;
                    return;
                }
            }
        }
        self.send_entries(latch).await;
    }

    /// Success path of spec §4.5: advance `next_index`, report commitment,
    /// transition out of `Probe` on a probe ack, notify catch-up and
    /// leadership transfer.
    async fn apply_success(&mut self, latch: &Arc<Latch<ReplicatorState>>, entry_count: usize) {
        if entry_count > 0 {
            let start = self.next_index;
            let end = self.next_index + entry_count as LogIndex - 1;
            if let Err(err) = self.collaborators.ballot_box.update_match_index(self.peer, end).await {
                tracing::warn!(peer = self.peer, error = %err, "ballot box update failed");
            }
            tracing::trace!(peer = self.peer, start, end, "reported commitment range to ballot box");
            self.next_index += entry_count as LogIndex;
        } else if self.state == State::Probe {
            self.state = State::Replicate;
        }

        self.has_succeeded = true;
        self.consecutive_errors = 0;
        self.last_rpc_send_ts = tokio::time::Instant::now();
        self.collaborators.metrics.gauge(&format!("{}/next-index", self.metric_prefix())).set(self.next_index);

        let last_log_index = self.collaborators.log_store.last_log_index().await.unwrap_or(self.next_index.saturating_sub(1));
        let matched_index = self.next_index.saturating_sub(1);
        self.collaborators
            .metrics
            .gauge(&format!("{}/log-lag", self.metric_prefix()))
            .set(last_log_index.saturating_sub(matched_index));

        if let Some(catchup) = self.catchup.as_ref() {
            if crate::catchup::has_caught_up(self.next_index, catchup.max_margin, last_log_index) {
                if let Some(mut catchup) = self.catchup.take() {
                    catchup.resolve(CatchupOutcome::CaughtUp);
                }
            }
        }

        if self.timeout_now_index > 0 && self.next_index > self.timeout_now_index {
            self.timeout_now_index = 0;
            self.dispatch_timeout_now(latch.clone());
        }
    }

    /// Mismatch recovery of spec §4.4: shrink `next_index` toward the peer's
    /// reported log extent, floored at 1.
    async fn apply_mismatch(&mut self, peer_last_log_index: LogIndex) {
        if peer_last_log_index + 1 < self.next_index {
            self.next_index = peer_last_log_index + 1;
        } else if self.next_index > 1 {
            self.next_index -= 1;
        } else {
            // spec §9 open question: stay at the floor, log and count it
            // rather than underflow or silently diverge.
            tracing::warn!(peer = self.peer, "mismatch recovery at next_index floor of 1");
            self.collaborators.metrics.counter("mismatch_at_floor").increment(1);
        }
    }

    async fn on_transport_failure(&mut self, latch: &Arc<Latch<ReplicatorState>>, err: &ReplicatorError) {
        self.consecutive_errors += 1;
        if self.consecutive_errors % 10 == 1 {
            tracing::warn!(peer = self.peer, error = %err, consecutive = self.consecutive_errors, "transport failure");
        }
        self.reset_inflights();
        self.state = State::Probe;
        self.arm_block_timer(latch);
    }

    /// `true` if a higher term was observed, in which case the node is told
    /// to step down and the replicator is destroyed (spec §4.4, §7).
    pub(crate) async fn handle_higher_term(&mut self, _latch: &Arc<Latch<ReplicatorState>>, observed_term: crate::Term) -> bool {
        if observed_term <= self.term {
            return false;
        }
        if let Some(mut catchup) = self.catchup.take() {
            catchup.resolve(CatchupOutcome::Destroyed);
        }
        self.begin_destroy().await;
        self.collaborators.node_handle.revert_to_follower(self.group.clone(), observed_term).await;
        true
    }

    /// Open a snapshot reader and emit `InstallSnapshot` (spec §4.4 Snapshot
    /// state, §4.5 step 2/4's compaction branch).
    pub(crate) async fn begin_snapshot_transition(&mut self, latch: &Arc<Latch<ReplicatorState>>) {
        self.state = State::Snapshot;
        let reader = match self.collaborators.snapshot_storage.open_current().await {
            Ok(reader) => reader,
            Err(err) => {
                tracing::error!(peer = self.peer, error = %err, "snapshot open failed");
                self.reset_inflights();
                self.state = State::Probe;
                self.arm_block_timer(latch);
                return;
            }
        };
        let meta = reader.meta();
        let uri = match reader.uri().await {
            Ok(uri) => uri,
            Err(err) => {
                tracing::error!(peer = self.peer, error = %err, "snapshot uri generation failed");
                self.reset_inflights();
                self.state = State::Probe;
                self.arm_block_timer(latch);
                return;
            }
        };
        self.snapshot_reader = Some(reader);

        let request = InstallSnapshotRequest {
            term: self.term,
            group_id: self.group.clone(),
            server_id: self.server_id,
            peer_id: self.peer,
            meta: meta.clone(),
            uri,
        };
        self.collaborators.metrics.counter("install_snapshots_sent").increment(1);
        self.last_rpc_send_ts = tokio::time::Instant::now();

        let version = self.version;
        let peer = self.peer;
        let rpc_client = self.collaborators.rpc_client.clone();
        let metrics = self.collaborators.metrics.clone();
        let last_included_index = meta.last_included_index;
        let latch_clone = latch.clone();
        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let result = rpc_client.install_snapshot(peer, request).await;
            metrics.histogram("install_snapshot_times").record(started.elapsed().as_nanos() as u64);
            let Some(mut guard) = latch_clone.lock().await else { return };
            if guard.version != version {
                Latch::unlock(guard);
                return;
            }
            guard.on_install_snapshot_completed(&latch_clone, last_included_index, result).await;
            finalize(&latch_clone, guard).await;
        });
    }

    async fn on_install_snapshot_completed(
        &mut self,
        latch: &Arc<Latch<ReplicatorState>>,
        last_included_index: LogIndex,
        result: Result<InstallSnapshotResponse, ReplicatorError>,
    ) {
        self.snapshot_reader = None;
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(peer = self.peer, error = %err, "install_snapshot transport failure");
                self.reset_inflights();
                self.state = State::Probe;
                self.arm_block_timer(latch);
                return;
            }
        };
        if self.handle_higher_term(latch, response.term).await {
            return;
        }
        if !response.success {
            self.reset_inflights();
            self.state = State::Probe;
            self.arm_block_timer(latch);
            return;
        }
        self.next_index = last_included_index + 1;
        self.state = State::Replicate;
        self.has_succeeded = true;
        self.collaborators.metrics.gauge(&format!("{}/next-index", self.metric_prefix())).set(self.next_index);
        self.send_entries(latch).await;
    }
}
