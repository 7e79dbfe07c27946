//! At most one in-flight computation per key.
//!
//! The first caller for a key spawns the work as a tokio task and stores a
//! [`Shared`] handle to its result; later callers clone that handle. The
//! entry is removed by a guard owned by the task itself, so it disappears
//! when the work settles (value, panic or runtime shutdown) and never
//! because a waiter stopped listening.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use thiserror::Error;
use tokio::task::JoinError;

/// The shared work died before producing a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoalesceError {
    #[error("coalesced task panicked: {0}")]
    Panicked(String),
    #[error("coalesced task was cancelled")]
    Cancelled,
}

impl From<JoinError> for CoalesceError {
    fn from(e: JoinError) -> Self {
        if !e.is_panic() {
            return Self::Cancelled;
        }
        let payload = e.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::Panicked(message)
    }
}

/// Handle every waiter on a key polls.
pub type SharedResult<T> = Shared<BoxFuture<'static, Result<T, CoalesceError>>>;

type PendingMap<T> = Arc<Mutex<HashMap<String, SharedResult<T>>>>;

pub struct Coalescer<T: Clone + Send + Sync + 'static> {
    pending: PendingMap<T>,
}

impl<T: Clone + Send + Sync + 'static> Default for Coalescer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Coalescer<T> {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Join the in-flight work for `key`, or start it with `make`.
    ///
    /// Returns the shared result and whether an existing computation was
    /// joined. `make` is only called when nothing is pending. Must be called
    /// from within a tokio runtime.
    pub fn run<F, Fut>(&self, key: &str, make: F) -> (SharedResult<T>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = pending.get(key) {
            return (existing.clone(), true);
        }

        let work = make();
        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            key: key.to_string(),
        };
        // The guard cannot remove the entry before it is inserted below: its
        // drop waits on the lock held here.
        let handle = tokio::spawn(async move {
            let _guard = guard;
            work.await
        });
        let shared = async move { handle.await.map_err(CoalesceError::from) }
            .boxed()
            .shared();
        pending.insert(key.to_string(), shared.clone());
        (shared, false)
    }

    /// Number of keys with work in flight.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending
            .lock()
            .map(|p| p.contains_key(key))
            .unwrap_or(false)
    }
}

struct PendingGuard<T: Clone + Send + Sync + 'static> {
    pending: PendingMap<T>,
    key: String,
}

impl<T: Clone + Send + Sync + 'static> Drop for PendingGuard<T> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let coalescer = Coalescer::<Arc<String>>::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<()>();

        let s = starts.clone();
        let (first, joined_first) = coalescer.run("k", move || async move {
            s.fetch_add(1, Ordering::SeqCst);
            let _ = rx.await;
            Arc::new("value".to_string())
        });
        let (second, joined_second) =
            coalescer.run("k", || async { Arc::new("other".to_string()) });
        assert!(!joined_first);
        assert!(joined_second);
        assert_eq!(coalescer.in_flight(), 1);

        tx.send(()).unwrap();
        let (a, b) = tokio::join!(first, second);
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entry_removed_after_completion() {
        let coalescer = Coalescer::<u32>::new();
        let (shared, _) = coalescer.run("k", || async { 7 });
        assert_eq!(shared.await, Ok(7));
        assert_eq!(coalescer.in_flight(), 0);

        let (again, joined) = coalescer.run("k", || async { 8 });
        assert!(!joined);
        assert_eq!(again.await, Ok(8));
    }

    #[tokio::test]
    async fn different_keys_do_not_coalesce() {
        let coalescer = Coalescer::<u32>::new();
        let (a, joined_a) = coalescer.run("a", || async { 1 });
        let (b, joined_b) = coalescer.run("b", || async { 2 });
        assert!(!joined_a && !joined_b);
        assert_eq!((a.await, b.await), (Ok(1), Ok(2)));
    }

    async fn explode() -> u32 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        panic!("boom")
    }

    #[tokio::test]
    async fn panic_reaches_every_waiter_and_clears_entry() {
        let coalescer = Coalescer::<u32>::new();
        let (first, _) = coalescer.run("k", explode);
        let (second, joined) = coalescer.run("k", || async { 0 });
        assert!(joined);

        let expected = Err(CoalesceError::Panicked("boom".into()));
        assert_eq!(first.await, expected);
        assert_eq!(second.await, expected);
        assert!(!coalescer.is_pending("k"));
    }

    #[tokio::test]
    async fn dropped_waiter_does_not_cancel_work() {
        let coalescer = Coalescer::<u32>::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<()>();

        let f = finished.clone();
        let (shared, _) = coalescer.run("k", move || async move {
            let _ = rx.await;
            f.fetch_add(1, Ordering::SeqCst);
            5
        });
        let waiter = tokio::spawn(shared);
        waiter.abort();
        let _ = waiter.await;
        assert!(coalescer.is_pending("k"));

        tx.send(()).unwrap();
        for _ in 0..100 {
            if !coalescer.is_pending("k") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!coalescer.is_pending("k"));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
