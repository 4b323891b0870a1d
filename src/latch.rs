//! A reentrant per-replicator mutual-exclusion token (spec §4.1).
//!
//! The source this spec is distilled from exposes a raw `lock`/`unlock` pair and
//! relies on each call site documenting where it releases the lock, often in a
//! callee. Rust's ownership system gives us a better tool for that exact contract:
//! a guard object. [`Latch::lock`] returns `Option<LatchGuard<'_, T>>` — `None` is
//! the destruction sentinel — and the guard can be threaded through any number of
//! private helper calls before being dropped (`unlock`) or consumed
//! (`unlock_and_destroy`). This is the "explicit guard object passed between
//! functions" approach spec §9's design notes recommend in place of the source's
//! global-token-relock pattern.

use tokio::sync::Mutex;
use tokio::sync::MutexGuard;
use tokio::sync::Notify;

/// Reentrant mutual-exclusion token guarding a replicator's mutable state.
///
/// "Reentrant" here means: the lock is acquired once per logical path and the
/// resulting guard is passed to as many private helpers as necessary before being
/// released — never that the same task may call `lock` twice without releasing
/// first (that would deadlock, as for any `tokio::sync::Mutex`).
pub struct Latch<T> {
    inner: Mutex<Option<T>>,
    destroyed: Notify,
}

impl<T> Latch<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Some(value)),
            destroyed: Notify::new(),
        }
    }

    /// Acquire the latch. Returns `None` if the replicator has already been
    /// destroyed (the sentinel of spec §4.1).
    pub async fn lock(&self) -> Option<LatchGuard<'_, T>> {
        let guard = self.inner.lock().await;
        if guard.is_some() {
            Some(LatchGuard { guard })
        } else {
            None
        }
    }

    /// Release the latch without destroying the replicator. Equivalent to simply
    /// dropping the guard; provided as a named operation to mirror spec §4.1's
    /// `unlock`.
    pub fn unlock(_guard: LatchGuard<'_, T>) {
        // Dropping `_guard` releases the mutex.
    }

    /// One-way: take the value out, release the mutex, and wake any `join` waiters.
    /// After this, every subsequent `lock` observes the sentinel.
    pub fn unlock_and_destroy(mut guard: LatchGuard<'_, T>) -> T {
        let taken = guard.guard.take().expect("guard observed Some on construction");
        drop(guard);
        taken
    }

    /// Notify any `join()` waiters that destruction has occurred. Must be called
    /// exactly once, after the value has been taken via `unlock_and_destroy`.
    pub fn notify_destroyed(&self) {
        self.destroyed.notify_waiters();
    }

    /// Wait until the replicator has been destroyed. Returns immediately if it
    /// already has been.
    pub async fn join(&self) {
        loop {
            {
                let guard = self.inner.lock().await;
                if guard.is_none() {
                    return;
                }
            }
            self.destroyed.notified().await;
        }
    }

    /// `true` if the latch has not yet been destroyed. Racy by nature (the state
    /// may change the instant after this returns); intended for best-effort checks,
    /// not for correctness-critical decisions.
    pub async fn is_live(&self) -> bool {
        self.inner.lock().await.is_some()
    }
}

/// An acquired [`Latch`]. Derefs to `&T`/`&mut T`. Dropping it releases the latch
/// (spec §4.1's `unlock`).
pub struct LatchGuard<'a, T> {
    guard: MutexGuard<'a, Option<T>>,
}

impl<'a, T> std::ops::Deref for LatchGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.guard.as_ref().expect("guard observed Some on construction")
    }
}

impl<'a, T> std::ops::DerefMut for LatchGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_mut().expect("guard observed Some on construction")
    }
}
