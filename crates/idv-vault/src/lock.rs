//! FIFO mutual exclusion for vault read-modify-write sequences.
//!
//! `tokio::sync::Mutex` queues waiters in arrival order, which gives the
//! ordering guarantee writers rely on: concurrent mutations apply in call
//! order. Dropping the guard releases the lock on every exit path, errors
//! included.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct MutationLock {
    inner: Mutex<()>,
    waiting: AtomicUsize,
}

/// Proof of exclusive access; releases (and hands off) on drop.
#[derive(Debug)]
pub struct MutationGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl MutationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend until this caller is the sole holder.
    pub async fn acquire(&self) -> MutationGuard<'_> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        // decrements on wake-up and on cancellation alike
        let queued = Queued(&self.waiting);
        let guard = self.inner.lock().await;
        drop(queued);
        MutationGuard { _guard: guard }
    }

    /// Number of callers queued behind the current holder.
    pub fn waiters(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

struct Queued<'a>(&'a AtomicUsize);

impl Drop for Queued<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
