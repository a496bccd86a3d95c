//! Per-key coalescing of in-flight work.
//!
//! The first caller for a key spawns the work as a tokio task; every caller
//! that arrives before it finishes awaits the same shared result. The task
//! runs to completion even if all callers go away, unless cancelled.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::domain::errors::{CacheError, CacheResult};

type Flight<T> = Shared<BoxFuture<'static, CacheResult<T>>>;

struct Entry<T> {
    id: u64,
    future: Flight<T>,
    abort: AbortHandle,
}

type FlightMap<K, T> = Arc<Mutex<HashMap<K, Entry<T>>>>;

/// Map from key to the in-progress computation for that key.
pub struct SingleFlight<K, T> {
    inflight: FlightMap<K, T>,
    next_id: AtomicU64,
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Display + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Awaits the flight for `key`, starting it with `make` if none is running.
    ///
    /// `make` is only called when this caller starts the flight.
    ///
    /// # Errors
    /// Returns the flight's error, [`CacheError::Cancelled`] if it was
    /// cancelled, or [`CacheError::Internal`] if it panicked.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> CacheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        let flight = self.join_or_start(key, make);
        flight.await
    }

    fn join_or_start<F, Fut>(&self, key: K, make: F) -> Flight<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        // Held until the entry is inserted, so the task cannot remove its
        // entry before it exists.
        let mut inflight = self.inflight.lock();

        if let Some(entry) = inflight.get(&key) {
            trace!(key = %key, "Joining in-flight request");
            return entry.future.clone();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let work = make();

        let task = tokio::spawn({
            let map = Arc::clone(&self.inflight);
            let key = key.clone();
            async move {
                let out = work.await;
                remove_flight(&map, &key, id);
                out
            }
        });
        let abort = task.abort_handle();

        let future = {
            let map = Arc::clone(&self.inflight);
            let key = key.clone();
            async move {
                let out = match task.await {
                    Ok(out) => out,
                    Err(e) if e.is_cancelled() => Err(CacheError::Cancelled),
                    Err(e) => Err(CacheError::internal(format!("request task panicked: {e}"))),
                };
                remove_flight(&map, &key, id);
                out
            }
        }
        .boxed()
        .shared();

        trace!(key = %key, id, "Starting new request");
        inflight.insert(
            key,
            Entry {
                id,
                future: future.clone(),
                abort,
            },
        );
        future
    }

    /// Aborts the flight for `key`.
    ///
    /// Callers already waiting receive [`CacheError::Cancelled`]; the next
    /// call starts a fresh flight. Returns false if nothing was in flight.
    pub fn cancel(&self, key: &K) -> bool {
        let Some(entry) = self.inflight.lock().remove(key) else {
            return false;
        };
        entry.abort.abort();
        trace!(key = %key, "Cancelled in-flight request");
        true
    }

    /// Aborts every flight and returns how many were running.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.inflight.lock().drain().collect();
        for (_, entry) in &drained {
            entry.abort.abort();
        }
        drained.len()
    }

    /// Returns true if a flight for `key` is running.
    pub fn contains(&self, key: &K) -> bool {
        self.inflight.lock().contains_key(key)
    }

    /// Returns the number of running flights.
    pub fn len(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Returns true if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Display + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the entry for `key` only if it still belongs to flight `id`.
fn remove_flight<K: Eq + Hash, T>(map: &Mutex<HashMap<K, Entry<T>>>, key: &K, id: u64) {
    let mut inflight = map.lock();
    if inflight.get(key).is_some_and(|entry| entry.id == id) {
        inflight.remove(key);
    }
}
