//! Bounded concurrency gate used by [`crate::workflow::Workflow`] to cap how
//! many tasks run at once.
//!
//! Thin wrapper around `tokio::sync::Semaphore` that additionally tracks the
//! number of currently-held permits so a workflow snapshot can report
//! `active`/`max` without threading a counter through every call site.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Semaphore as TokioSemaphore, SemaphorePermit};

/// A counting semaphore with a live `active` count.
pub struct Semaphore {
    inner: TokioSemaphore,
    active: AtomicUsize,
    max: usize,
}

/// RAII guard returned by [`Semaphore::acquire`]. Releasing happens on drop,
/// decrementing `active` and returning the permit to the inner semaphore.
pub struct Permit<'a> {
    _permit: SemaphorePermit<'a>,
    active: &'a AtomicUsize,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Semaphore {
    /// A semaphore allowing up to `max` concurrent holders. `max == 0` means
    /// unbounded (`spec.md` §6's `maxConcurrent: 0` case): modeled as an
    /// effectively unlimited permit count rather than a special-cased path,
    /// so `acquire` still composes the same way.
    pub fn new(max: usize) -> Self {
        let capacity = if max == 0 { TokioSemaphore::MAX_PERMITS } else { max };
        Self {
            inner: TokioSemaphore::new(capacity),
            active: AtomicUsize::new(0),
            max,
        }
    }

    /// Acquire a permit, waiting if none are free. Cancel-safe: dropping the
    /// returned future before it resolves releases no permit (none was
    /// taken).
    pub async fn acquire(&self) -> Permit<'_> {
        let permit = self
            .inner
            .acquire()
            .await
            .expect("semaphore is never closed");
        self.active.fetch_add(1, Ordering::SeqCst);
        Permit {
            _permit: permit,
            active: &self.active,
        }
    }

    /// Try to acquire without waiting.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let permit = self.inner.try_acquire().ok()?;
        self.active.fetch_add(1, Ordering::SeqCst);
        Some(Permit {
            _permit: permit,
            active: &self.active,
        })
    }

    /// Permits currently held.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Configured maximum (`0` meaning unbounded, per [`Semaphore::new`]).
    pub fn max(&self) -> usize {
        self.max
    }

    /// `true` iff every permit is currently held (always `false` when
    /// unbounded).
    pub fn locked(&self) -> bool {
        self.max != 0 && self.active() >= self.max
    }
}

/// Shared handle convenience alias; workflows hold the semaphore behind an
/// `Arc` so task futures can each capture a clone.
pub type SharedSemaphore = Arc<Semaphore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_release_tracks_active() {
        let sem = Semaphore::new(2);
        let p1 = sem.acquire().await;
        assert_eq!(sem.active(), 1);
        let p2 = sem.acquire().await;
        assert_eq!(sem.active(), 2);
        assert!(sem.locked());
        drop(p1);
        assert_eq!(sem.active(), 1);
        assert!(!sem.locked());
        drop(p2);
        assert_eq!(sem.active(), 0);
    }

    #[tokio::test]
    async fn try_acquire_fails_when_full() {
        let sem = Semaphore::new(1);
        let _p = sem.acquire().await;
        assert!(sem.try_acquire().is_none());
    }

    #[tokio::test]
    async fn unbounded_never_locks() {
        let sem = Semaphore::new(0);
        let permits: Vec<_> = futures::future::join_all((0..64).map(|_| sem.acquire())).await;
        assert_eq!(sem.active(), 64);
        assert!(!sem.locked());
        drop(permits);
    }
}
