//! Leadership transfer (spec §4.8).

use std::sync::Arc;

use crate::latch::Latch;
use crate::wire::TimeoutNowRequest;
use crate::LogIndex;

use super::finalize;
use super::ReplicatorState;
use super::State;

impl ReplicatorState {
    /// `transfer_leadership(log_index)`: send `TimeoutNow` immediately if the
    /// peer has already caught up past `log_index`, else latch the boundary
    /// for a later successful replication to trigger it (spec §4.8).
    pub(crate) fn begin_transfer_leadership(&mut self, latch: &Arc<Latch<ReplicatorState>>, log_index: LogIndex) -> bool {
        if self.state == State::Destroyed {
            return false;
        }
        if self.has_succeeded && self.next_index > log_index {
            self.dispatch_timeout_now(latch.clone());
        } else {
            self.timeout_now_index = log_index;
        }
        true
    }

    /// Fire-and-forget `TimeoutNow`, with no stop-after-finish (used when
    /// replication has already caught the peer up).
    pub(crate) fn dispatch_timeout_now(&mut self, latch: Arc<Latch<ReplicatorState>>) {
        if self.timeout_now_in_fly {
            return;
        }
        self.timeout_now_in_fly = true;
        let request = TimeoutNowRequest {
            term: self.term,
            group_id: self.group.clone(),
            server_id: self.server_id,
            peer_id: self.peer,
        };
        let peer = self.peer;
        let version = self.version;
        let rpc_client = self.collaborators.rpc_client.clone();
        tokio::spawn(async move {
            let result = rpc_client.timeout_now(peer, request).await;
            let Some(mut guard) = latch.lock().await else { return };
            guard.timeout_now_in_fly = false;
            if guard.version != version {
                Latch::unlock(guard);
                return;
            }
            if let Ok(response) = result {
                let _ = guard.handle_higher_term(&latch, response.term).await;
            }
            finalize(&latch, guard).await;
        });
    }

    /// `send_timeout_now_and_stop(timeout_ms)`: a short-deadline `TimeoutNow`
    /// that destroys the replicator on completion regardless of outcome
    /// (spec §4.8).
    pub(crate) fn dispatch_timeout_now_and_stop(&self, latch: &Arc<Latch<ReplicatorState>>, timeout_ms: u64) {
        let request = TimeoutNowRequest {
            term: self.term,
            group_id: self.group.clone(),
            server_id: self.server_id,
            peer_id: self.peer,
        };
        let peer = self.peer;
        let rpc_client = self.collaborators.rpc_client.clone();
        let timeout = std::time::Duration::from_millis(timeout_ms);
        let latch = latch.clone();
        tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, rpc_client.timeout_now(peer, request)).await;
            if let Some(mut guard) = latch.lock().await {
                if let Ok(Ok(response)) = &result {
                    guard.handle_higher_term(&latch, response.term).await;
                }
                guard.on_error(crate::error::ErrorCode::Stop).await;
                finalize(&latch, guard).await;
            }
        });
    }
}
