//! Single-flight cache of conditioning states keyed by voice identity.
//!
//! Concurrent requests for the same key share one in-flight computation.
//! Failures are handed to every caller waiting on that flight and then
//! dropped, so the next request retries instead of replaying the error.
//! Flights still running are never evicted; only finished states count
//! against the LRU bound.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use tracing::debug;

use crate::engine::ConditioningState;
use crate::error::TtsError;

pub type SharedResult<V> = Result<Arc<V>, Arc<TtsError>>;

type Flight<V> = Shared<BoxFuture<'static, SharedResult<V>>>;

struct Slot<V> {
    id: u64,
    flight: Flight<V>,
}

struct Slots<V> {
    ready: LruCache<String, Arc<V>>,
    pending: HashMap<String, Slot<V>>,
}

pub struct StateCache<V> {
    slots: Mutex<Slots<V>>,
    next_id: AtomicU64,
}

pub type ConditioningStateCache = StateCache<ConditioningState>;

impl<V: Send + Sync + 'static> StateCache<V> {
    /// Keep every state for the life of the process.
    pub fn unbounded() -> Self {
        Self::with_lru(LruCache::unbounded())
    }

    /// Keep at most `capacity` finished states, evicting the least recently used.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self::with_lru(LruCache::new(capacity))
    }

    fn with_lru(ready: LruCache<String, Arc<V>>) -> Self {
        Self {
            slots: Mutex::new(Slots {
                ready,
                pending: HashMap::new(),
            }),
            next_id: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<V>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the cached state for `key`, or run `compute` once for all
    /// concurrent callers of the same key.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> SharedResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, TtsError>> + Send + 'static,
    {
        let (id, flight) = {
            let mut slots = self.lock();
            if let Some(state) = slots.ready.get(key) {
                debug!(key, "Conditioning cache hit");
                return Ok(state.clone());
            }
            match slots.pending.get(key) {
                Some(slot) => {
                    debug!(key, "Joining in-flight conditioning");
                    (slot.id, slot.flight.clone())
                }
                None => {
                    debug!(key, "Conditioning cache miss");
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let pending = compute();
                    let flight = async move { pending.await.map(Arc::new).map_err(Arc::new) }
                        .boxed()
                        .shared();
                    slots.pending.insert(
                        key.to_string(),
                        Slot {
                            id,
                            flight: flight.clone(),
                        },
                    );
                    (id, flight)
                }
            }
        };

        let result = flight.await;
        let mut slots = self.lock();
        // The first waiter back settles the slot; a retry may already own the key.
        if slots.pending.get(key).is_some_and(|slot| slot.id == id) {
            slots.pending.remove(key);
            if let Ok(state) = &result {
                if let Some((evicted, _)) = slots.ready.push(key.to_string(), state.clone()) {
                    if evicted != key {
                        debug!(key = %evicted, "Evicted conditioning state");
                    }
                }
            }
        }
        result
    }

    /// Whether a finished state for `key` is cached.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().ready.contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
