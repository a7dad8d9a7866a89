//! Expiring keyed cache with single-flight construction.
//!
//! [`ExpiringCache`] memoizes expensive constructions (token fetches,
//! endpoint resolutions) under a TTL. Concurrent acquires for the same key
//! block on a per-key gate so at most one constructor runs per key at any
//! instant; every waiter observes the installed value. Handles are
//! refcounted and RAII: dropping a handle releases the entry, and an entry
//! whose last handle was [`poisoned`](CacheHandle::poison) is removed so the
//! next acquire reconstructs it.
//!
//! Expiry is lazy: it is checked on acquire, never on a timer. A live
//! handle pins the entry regardless of TTL.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Keyed cache with TTL and at-most-one concurrent constructor per key.
pub struct ExpiringCache<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> Clone for ExpiringCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

struct Shared<K, V> {
    ttl: Duration,
    slots: Mutex<HashMap<K, Arc<Slot<V>>>>,
}

struct Slot<V> {
    /// Per-key single-flight gate. Held for the duration of a construction.
    gate: tokio::sync::Mutex<()>,
    state: Mutex<SlotState<V>>,
}

struct SlotState<V> {
    value: Option<Arc<V>>,
    expires_at: Instant,
    refcount: u32,
    poisoned: bool,
    /// Tasks currently inside `acquire` for this slot. Keeps the slot (and
    /// its gate) stable in the map while anyone is interested in it.
    users: u32,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            gate: tokio::sync::Mutex::new(()),
            state: Mutex::new(SlotState {
                value: None,
                expires_at: Instant::now(),
                refcount: 0,
                poisoned: false,
                users: 0,
            }),
        }
    }
}

impl<K: Eq + Hash + Clone, V> ExpiringCache<K, V> {
    /// Create a cache whose entries live for `ttl` after construction.
    pub fn new(ttl: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                ttl,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Return a handle to a cached, unexpired value for `key`, or run `ctor`
    /// to install one. The constructor is polled only on a miss, and only
    /// while holding the per-key gate: concurrent acquires for the same key
    /// wait on the same construction. A `None` from `ctor` is not cached;
    /// the next acquire retries.
    pub async fn acquire<Fut>(&self, key: K, ctor: Fut) -> Option<CacheHandle<K, V>>
    where
        Fut: Future<Output = Option<V>>,
    {
        let slot = {
            let mut slots = self.shared.slots.lock();
            let slot = slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Slot::new()))
                .clone();
            slot.state.lock().users += 1;
            slot
        };
        // Balances the users increment on every exit path, including
        // cancellation while awaiting the gate or the constructor.
        let _use = UseGuard {
            shared: self.shared.clone(),
            key: key.clone(),
            slot: slot.clone(),
        };

        if let Some(handle) = self.try_hit(&key, &slot) {
            return Some(handle);
        }

        let _gate = slot.gate.lock().await;
        // Another waiter may have finished constructing while we queued.
        if let Some(handle) = self.try_hit(&key, &slot) {
            return Some(handle);
        }

        let value = Arc::new(ctor.await?);
        let mut st = slot.state.lock();
        st.value = Some(value.clone());
        st.expires_at = Instant::now() + self.shared.ttl;
        st.poisoned = false;
        st.refcount += 1;
        drop(st);
        drop(_gate);

        Some(CacheHandle {
            shared: self.shared.clone(),
            key,
            slot,
            value,
            poisoned: false,
        })
    }

    fn try_hit(&self, key: &K, slot: &Arc<Slot<V>>) -> Option<CacheHandle<K, V>> {
        let mut st = slot.state.lock();
        let value = st.value.as_ref()?.clone();
        if st.expires_at <= Instant::now() {
            return None;
        }
        st.refcount += 1;
        Some(CacheHandle {
            shared: self.shared.clone(),
            key: key.clone(),
            slot: slot.clone(),
            value,
            poisoned: false,
        })
    }

    /// Number of keys currently holding a cached value.
    pub fn len(&self) -> usize {
        self.shared
            .slots
            .lock()
            .values()
            .filter(|slot| slot.state.lock().value.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Refcounted handle to a cached value. Dropping it releases the entry;
/// [`poison`](Self::poison) marks the entry for removal at last release.
pub struct CacheHandle<K: Eq + Hash, V> {
    shared: Arc<Shared<K, V>>,
    key: K,
    slot: Arc<Slot<V>>,
    value: Arc<V>,
    poisoned: bool,
}

impl<K: Eq + Hash, V> CacheHandle<K, V> {
    /// Release the handle and mark the entry stale. Once the refcount
    /// reaches zero the entry is removed and the next acquire runs a fresh
    /// constructor.
    pub fn poison(mut self) {
        self.poisoned = true;
    }
}

impl<K: Eq + Hash, V> Deref for CacheHandle<K, V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.value
    }
}

impl<K: Eq + Hash, V> Drop for CacheHandle<K, V> {
    fn drop(&mut self) {
        let mut slots = self.shared.slots.lock();
        let mut st = self.slot.state.lock();
        st.refcount -= 1;
        if self.poisoned {
            st.poisoned = true;
        }
        if st.refcount == 0 && (st.poisoned || st.expires_at <= Instant::now()) {
            st.value = None;
            st.poisoned = false;
        }
        maybe_remove(&mut slots, &self.key, &self.slot, &st);
    }
}

struct UseGuard<K: Eq + Hash, V> {
    shared: Arc<Shared<K, V>>,
    key: K,
    slot: Arc<Slot<V>>,
}

impl<K: Eq + Hash, V> Drop for UseGuard<K, V> {
    fn drop(&mut self) {
        let mut slots = self.shared.slots.lock();
        let mut st = self.slot.state.lock();
        st.users -= 1;
        maybe_remove(&mut slots, &self.key, &self.slot, &st);
    }
}

/// Drop the map entry once nothing useful remains: no handles, no acquirers
/// in flight, and no live value worth serving.
fn maybe_remove<K: Eq + Hash, V>(
    slots: &mut HashMap<K, Arc<Slot<V>>>,
    key: &K,
    slot: &Arc<Slot<V>>,
    st: &SlotState<V>,
) {
    let dead = st.users == 0
        && st.refcount == 0
        && (st.value.is_none() || st.poisoned || st.expires_at <= Instant::now());
    if dead {
        if let Some(current) = slots.get(key) {
            if Arc::ptr_eq(current, slot) {
                slots.remove(key);
            }
        }
    }
}
