//! Replicator registry (spec §3's Ownership paragraph; SPEC_FULL §12).
//!
//! Replaces the source's "global token, re-lock by id" access pattern with an
//! opaque [`ReplicatorId`] resolving through a registry to an
//! `Arc<Latch<ReplicatorState>>`. Lookup fails once a replicator has been
//! removed, giving the same "stale handle after destruction" semantics spec
//! §3 calls for without requiring callers to re-validate a raw pointer.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::latch::Latch;
use crate::replicator::ReplicatorId;
use crate::replicator::ReplicatorState;

/// Registry of live replicators, keyed by the opaque id minted at `start()`.
///
/// Cheaply `Clone` (an `Arc`-backed handle to shared state) so a replicator
/// can hold its own handle back to the registry it was minted from, and
/// deregister itself on destruction without the caller having to remember to
/// do so (spec §3: "lookup fails after destruction").
#[derive(Clone, Default)]
pub struct ReplicatorRegistry {
    next_generation: Arc<std::sync::atomic::AtomicU64>,
    entries: Arc<Mutex<HashMap<ReplicatorId, Arc<Latch<ReplicatorState>>>>>,
}

impl ReplicatorRegistry {
    pub fn new() -> Self {
        Self {
            next_generation: Arc::new(std::sync::atomic::AtomicU64::new(1)),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Mint a fresh id and register `state` under it.
    pub fn insert(&self, state: ReplicatorState) -> (ReplicatorId, Arc<Latch<ReplicatorState>>) {
        let generation = self.next_generation.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let id = ReplicatorId(generation);
        let latch = Arc::new(Latch::new(state));
        self.entries.lock().expect("registry mutex poisoned").insert(id, latch.clone());
        (id, latch)
    }

    /// Resolve an id to its latch. Returns `None` once the replicator has
    /// been removed (stopped/destroyed), matching spec §3's "lookup fails
    /// after destruction" requirement.
    pub fn get(&self, id: ReplicatorId) -> Option<Arc<Latch<ReplicatorState>>> {
        self.entries.lock().expect("registry mutex poisoned").get(&id).cloned()
    }

    /// Remove a replicator from the registry. Called once its latch has been
    /// destroyed; does not itself destroy the latch.
    pub fn remove(&self, id: ReplicatorId) -> Option<Arc<Latch<ReplicatorState>>> {
        self.entries.lock().expect("registry mutex poisoned").remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
