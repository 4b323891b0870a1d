//! Heartbeat and block timer scheduling (spec §4.6).
//!
//! Each timer is represented as a generation counter rather than a real
//! cancel handle: a fired timer re-locks the latch and checks its captured
//! generation against the live one, so a superseded timer (rearmed or
//! invalidated by destruction/reset) is a silent no-op. This is the "capability
//! handle that knows how to schedule reentry" pattern SPEC_FULL's design notes
//! call for in place of the source's raw cancel-token timers.

use std::sync::Arc;

use crate::collaborators::CounterHandleImpl;
use crate::latch::Latch;
use crate::wire::AppendEntriesRequest;

use super::finalize;
use super::ReplicatorState;
use super::State;

impl ReplicatorState {
    /// Arm (or re-arm) the heartbeat timer for `heartbeat_timeout()` from now
    /// (spec §4.6). Re-arming bumps the generation, invalidating any
    /// previously scheduled firing.
    pub(crate) fn arm_heartbeat_timer(&mut self, latch: &Arc<Latch<ReplicatorState>>) {
        self.heartbeat_timer_generation = self.heartbeat_timer_generation.wrapping_add(1);
        let generation = self.heartbeat_timer_generation;
        let timer_service = self.collaborators.timer_service.clone();
        let duration = self.config.heartbeat_timeout();
        let latch = latch.clone();
        tokio::spawn(async move {
            timer_service.sleep(duration).await;
            let Some(mut guard) = latch.lock().await else { return };
            if guard.heartbeat_timer_generation != generation || guard.state == State::Destroyed {
                Latch::unlock(guard);
                return;
            }
            guard.dispatch_heartbeat().await;
            finalize(&latch, guard).await;
        });
    }

    /// Arm the block timer (spec §4.6): fires `continue_sending` (here, a
    /// fresh probe attempt) after a backoff equal to the heartbeat timeout.
    pub(crate) fn arm_block_timer(&mut self, latch: &Arc<Latch<ReplicatorState>>) {
        self.block_timer_generation = self.block_timer_generation.wrapping_add(1);
        let generation = self.block_timer_generation;
        let timer_service = self.collaborators.timer_service.clone();
        let duration = self.config.heartbeat_timeout();
        let latch = latch.clone();
        tokio::spawn(async move {
            timer_service.sleep(duration).await;
            let Some(mut guard) = latch.lock().await else { return };
            if guard.block_timer_generation != generation || guard.state == State::Destroyed {
                Latch::unlock(guard);
                return;
            }
            guard.send_entries(&latch).await;
            finalize(&latch, guard).await;
        });
    }

    /// Send a zero-entry `AppendEntries` as a heartbeat (spec §4.6). Does not
    /// participate in the inflight/sequence protocol — tracked only by
    /// `heartbeat_in_fly`.
    pub(crate) async fn dispatch_heartbeat(&mut self) {
        if self.state == State::Destroyed || self.heartbeat_in_fly {
            return;
        }
        let Some(latch) = self.self_latch.upgrade() else { return };
        self.heartbeat_in_fly = true;
        let request = AppendEntriesRequest {
            term: self.term,
            group_id: self.group.clone(),
            server_id: self.server_id,
            peer_id: self.peer,
            prev_log_index: self.next_index.saturating_sub(1),
            prev_log_term: 0,
            committed_index: self.committed_index().await,
            entries: Vec::new(),
            data: bytes::Bytes::new(),
        };
        self.collaborators.metrics.counter("heartbeats_sent").increment(1);
        let peer = self.peer;
        let version = self.version;
        let rpc_client = self.collaborators.rpc_client.clone();
        let metrics = self.collaborators.metrics.clone();
        let timeout = self.config.heartbeat_rpc_timeout();
        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let result = tokio::time::timeout(timeout, rpc_client.append_entries(peer, request)).await;
            metrics.histogram("heartbeat_times").record(started.elapsed().as_nanos() as u64);
            let Some(mut guard) = latch.lock().await else { return };
            guard.heartbeat_in_fly = false;
            if guard.version != version || guard.state == State::Destroyed {
                finalize(&latch, guard).await;
                return;
            }
            let destroyed = match result {
                Ok(Ok(response)) => {
                    let destroyed = guard.handle_higher_term(&latch, response.term).await;
                    if !destroyed {
                        guard.has_succeeded = true;
                        guard.last_rpc_send_ts = tokio::time::Instant::now();
                    }
                    destroyed
                }
                Ok(Err(err)) => {
                    tracing::debug!(peer, error = %err, "heartbeat failed");
                    false
                }
                Err(_) => {
                    tracing::debug!(peer, "heartbeat timed out");
                    false
                }
            };
            if !destroyed {
                guard.arm_heartbeat_timer(&latch);
            }
            finalize(&latch, guard).await;
        });
    }
}
