//! Concurrent, byte-budgeted caches for hashes and computed values.
//!
//! The engine keeps two process-level caches: one mapping hash-cache keys to
//! 128-bit fingerprints, and one mapping fingerprints to computed values.
//! Both are instances of [`ShardedCache`]: the key space is split across a
//! fixed number of shards, each an LRU list behind its own mutex, so many
//! threads can read and write simultaneously.
//!
//! Entries are immutable once stored. Nothing ever invalidates them in
//! place; graph edits change future keys so stale entries simply become
//! unreachable and age out under the byte budget.
//!
//! # Request de-duplication
//!
//! Under [`CachePolicy::TaskCollaboration`] concurrent requests for one key
//! collapse onto a single execution: the first thread claims the key in an
//! in-flight table and computes, the rest block on a condvar and receive the
//! one result (or the one error — failed keys are never stored, so the next
//! request retries). A thread that finds the in-flight entry is owned by
//! itself computes directly instead of deadlocking; `TaskIsolation` never
//! consults the in-flight table at all.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::ThreadId;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::trace;

use crate::error::Result;
use crate::graph::CachePolicy;
use crate::hash::ContentHash;

/// Per-entry bookkeeping overhead added to every cost measurement.
const ENTRY_OVERHEAD: usize = 64;

/// Number of independently locked shards.
const SHARD_COUNT: usize = 16;

/// Types that can report their approximate storage cost in bytes.
pub trait CacheCost {
    /// Approximate size in bytes, including heap payloads.
    fn cost(&self) -> usize;
}

impl CacheCost for ContentHash {
    fn cost(&self) -> usize {
        std::mem::size_of::<ContentHash>()
    }
}

/// State of one in-flight collaborative computation.
enum FlightState<V> {
    /// The owner is still computing.
    Pending,
    /// The owner finished; waiters take a copy.
    Done(Result<V>),
    /// The owner unwound without publishing; waiters re-claim the key.
    Abandoned,
}

struct Flight<V> {
    owner: ThreadId,
    state: Mutex<FlightState<V>>,
    cond: Condvar,
}

impl<V> Flight<V> {
    fn new() -> Self {
        Self {
            owner: std::thread::current().id(),
            state: Mutex::new(FlightState::Pending),
            cond: Condvar::new(),
        }
    }
}

struct Shard<K: Hash + Eq, V> {
    entries: LruCache<K, (V, usize)>,
    bytes: usize,
}

impl<K: Hash + Eq, V> Shard<K, V> {
    fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            bytes: 0,
        }
    }

    fn evict_to(&mut self, budget: usize) {
        while self.bytes > budget {
            match self.entries.pop_lru() {
                Some((_, (_, cost))) => self.bytes -= cost,
                None => break,
            }
        }
    }
}

/// A sharded LRU cache with a global memory budget in bytes.
pub struct ShardedCache<K: Hash + Eq, V> {
    shards: Vec<Mutex<Shard<K, V>>>,
    limit: AtomicUsize,
    inflight: DashMap<K, Arc<Flight<V>>>,
}

impl<K, V> ShardedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone + CacheCost,
{
    /// Creates a cache with the given total budget in bytes.
    pub fn new(limit_bytes: usize) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(Shard::new())).collect(),
            limit: AtomicUsize::new(limit_bytes),
            inflight: DashMap::new(),
        }
    }

    fn shard_for(&self, key: &K) -> &Mutex<Shard<K, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    fn shard_budget(&self) -> usize {
        self.limit.load(Ordering::Relaxed) / SHARD_COUNT
    }

    /// Looks up a key, promoting it to most-recently-used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut shard = self.shard_for(key).lock();
        shard.entries.get(key).map(|(v, _)| v.clone())
    }

    /// Stores a value, evicting least-recently-used entries if the shard
    /// exceeds its share of the budget.
    pub fn insert(&self, key: K, value: V) {
        let cost = value.cost() + ENTRY_OVERHEAD;
        let budget = self.shard_budget();
        let mut shard = self.shard_for(&key).lock();
        // push returns the displaced entry when the key already existed
        if let Some((_, (_, old_cost))) = shard.entries.push(key, (value, cost)) {
            shard.bytes -= old_cost;
        }
        shard.bytes += cost;
        if shard.bytes > budget {
            trace!(bytes = shard.bytes, budget, "evicting cache entries");
            shard.evict_to(budget);
        }
    }

    /// Resolves a key through the cache, computing on miss.
    ///
    /// `Uncached` never touches the cache. `Standard` and `TaskIsolation`
    /// tolerate redundant concurrent computation of the same key.
    /// `TaskCollaboration` de-duplicates concurrent requests as described in
    /// the module docs. Errors are propagated and never cached.
    pub fn get_or_compute<F>(&self, key: K, policy: CachePolicy, f: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        match policy {
            CachePolicy::Uncached => f(),
            CachePolicy::Standard | CachePolicy::TaskIsolation => {
                if let Some(v) = self.get(&key) {
                    return Ok(v);
                }
                let v = f()?;
                self.insert(key, v.clone());
                Ok(v)
            }
            CachePolicy::TaskCollaboration => self.collaborate(key, f),
        }
    }

    fn collaborate<F>(&self, key: K, f: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        loop {
            if let Some(v) = self.get(&key) {
                return Ok(v);
            }

            let existing = match self.inflight.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    let flight = Arc::new(Flight::new());
                    slot.insert(flight.clone());
                    None
                }
                dashmap::mapref::entry::Entry::Occupied(slot) => Some(slot.get().clone()),
            };

            match existing {
                None => {
                    let guard = FlightGuard {
                        cache: self,
                        key: &key,
                    };
                    // An owner may have stored the value and dropped its
                    // claim between our miss above and the claim we just
                    // won. Claiming the vacant entry happens after that
                    // removal, and the removal after the store, so a
                    // re-check is guaranteed to observe it.
                    if let Some(v) = self.get(&key) {
                        guard.publish(Ok(v.clone()));
                        return Ok(v);
                    }
                    // We own the key; compute and publish.
                    let result = f();
                    if let Ok(v) = &result {
                        self.insert(key.clone(), v.clone());
                    }
                    guard.publish(result.clone());
                    return result;
                }
                Some(flight) => {
                    if flight.owner == std::thread::current().id() {
                        // Recursive request for a key this thread is already
                        // computing. Waiting would deadlock on ourselves, so
                        // compute directly.
                        return f();
                    }
                    let mut state = flight.state.lock();
                    loop {
                        match &*state {
                            FlightState::Pending => {}
                            FlightState::Done(result) => return result.clone(),
                            FlightState::Abandoned => break,
                        }
                        flight.cond.wait(&mut state);
                    }
                    // Owner unwound; retry from the top.
                }
            }
        }
    }

    /// Drops every entry. In-flight computations are unaffected.
    pub fn clear(&self) {
        for shard in &self.shards {
            let mut shard = shard.lock();
            shard.entries.clear();
            shard.bytes = 0;
        }
    }

    /// Current approximate memory usage in bytes.
    pub fn memory_usage(&self) -> usize {
        self.shards.iter().map(|s| s.lock().bytes).sum()
    }

    /// The configured memory budget in bytes.
    pub fn memory_limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// Reconfigures the memory budget, evicting down to it immediately.
    pub fn set_memory_limit(&self, bytes: usize) {
        self.limit.store(bytes, Ordering::Relaxed);
        let budget = self.shard_budget();
        for shard in &self.shards {
            shard.lock().evict_to(budget);
        }
    }
}

/// Removes the in-flight entry when the owner finishes or unwinds.
///
/// If the owner never published a result (a panic unwound through the
/// computation), waiters are released with `Abandoned` so they can re-claim
/// the key rather than block forever.
struct FlightGuard<'a, K: Hash + Eq + Clone, V> {
    cache: &'a ShardedCache<K, V>,
    key: &'a K,
}

impl<K: Hash + Eq + Clone, V> FlightGuard<'_, K, V> {
    fn publish(self, result: Result<V>) {
        if let Some((_, flight)) = self.cache.inflight.remove(self.key) {
            *flight.state.lock() = FlightState::Done(result);
            flight.cond.notify_all();
        }
        std::mem::forget(self);
    }
}

impl<K: Hash + Eq + Clone, V> Drop for FlightGuard<'_, K, V> {
    fn drop(&mut self) {
        if let Some((_, flight)) = self.cache.inflight.remove(self.key) {
            *flight.state.lock() = FlightState::Abandoned;
            flight.cond.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl CacheCost for String {
        fn cost(&self) -> usize {
            self.capacity()
        }
    }

    #[test]
    fn get_returns_inserted_values() {
        let cache: ShardedCache<u64, String> = ShardedCache::new(1 << 20);
        cache.insert(1, "one".to_owned());
        assert_eq!(cache.get(&1).as_deref(), Some("one"));
        assert_eq!(cache.get(&2), None);
    }

    #[test]
    fn standard_policy_computes_once_per_key() {
        let cache: ShardedCache<u64, String> = ShardedCache::new(1 << 20);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let v = cache
                .get_or_compute(9, CachePolicy::Standard, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("computed".to_owned())
                })
                .unwrap();
            assert_eq!(v, "computed");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn uncached_policy_always_computes() {
        let cache: ShardedCache<u64, String> = ShardedCache::new(1 << 20);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            cache
                .get_or_compute(9, CachePolicy::Uncached, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("v".to_owned())
                })
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.get(&9), None);
    }

    #[test]
    fn errors_are_not_cached() {
        use crate::error::ComputeError;
        use crate::graph::PlugId;

        let cache: ShardedCache<u64, String> = ShardedCache::new(1 << 20);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let result = cache.get_or_compute(4, CachePolicy::Standard, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ComputeError::new(PlugId::from_raw(1), "boom").into())
            });
            assert!(result.is_err());
        }
        // Each attempt recomputed; the failure was never stored.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get(&4), None);
    }

    #[test]
    fn eviction_respects_byte_budget() {
        // A budget small enough that a few large strings overflow a shard.
        let cache: ShardedCache<u64, String> = ShardedCache::new(SHARD_COUNT * 256);
        for i in 0..64 {
            cache.insert(i, "x".repeat(128));
        }
        assert!(cache.memory_usage() <= SHARD_COUNT * 256);
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache: ShardedCache<u64, String> = ShardedCache::new(1 << 20);
        cache.insert(1, "one".to_owned());
        cache.clear();
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.memory_usage(), 0);
    }

    #[test]
    fn collaboration_deduplicates_concurrent_requests() {
        let cache: ShardedCache<u64, String> = ShardedCache::new(1 << 20);
        let calls = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let v = cache
                        .get_or_compute(7, CachePolicy::TaskCollaboration, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            // Hold the claim long enough for others to queue.
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok("shared".to_owned())
                        })
                        .unwrap();
                    assert_eq!(v, "shared");
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn collaboration_never_recomputes_a_published_value() {
        // Races requesters against owners that finish immediately, so a
        // requester regularly misses the cache just as the owner publishes
        // and drops its claim. Whoever then wins the vacant claim must find
        // the published value rather than compute a second time.
        let cache: ShardedCache<u64, String> = ShardedCache::new(1 << 20);
        for round in 0..200u64 {
            let calls = AtomicUsize::new(0);
            std::thread::scope(|scope| {
                for _ in 0..4 {
                    scope.spawn(|| {
                        let v = cache
                            .get_or_compute(round, CachePolicy::TaskCollaboration, || {
                                calls.fetch_add(1, Ordering::SeqCst);
                                Ok(round.to_string())
                            })
                            .unwrap();
                        assert_eq!(v, round.to_string());
                    });
                }
            });
            assert_eq!(calls.load(Ordering::SeqCst), 1, "round {round}");
        }
    }

    #[test]
    fn collaboration_same_thread_recursion_computes_directly() {
        let cache: ShardedCache<u64, String> = ShardedCache::new(1 << 20);

        let v = cache
            .get_or_compute(1, CachePolicy::TaskCollaboration, || {
                // A recursive request for the same key from the owning
                // thread must not block on itself.
                cache.get_or_compute(1, CachePolicy::TaskCollaboration, || Ok("inner".to_owned()))
            })
            .unwrap();
        assert_eq!(v, "inner");
    }

    #[test]
    fn isolation_never_joins_the_inflight_table() {
        let cache: ShardedCache<u64, String> = ShardedCache::new(1 << 20);

        // An isolated computation nested inside a collaborative one for the
        // same key must not wait on the outer claim.
        let v = cache
            .get_or_compute(3, CachePolicy::TaskCollaboration, || {
                cache.get_or_compute(3, CachePolicy::TaskIsolation, || Ok("nested".to_owned()))
            })
            .unwrap();
        assert_eq!(v, "nested");
        assert_eq!(cache.get(&3).as_deref(), Some("nested"));
    }

    #[test]
    fn shrinking_the_limit_evicts() {
        let cache: ShardedCache<u64, String> = ShardedCache::new(1 << 20);
        for i in 0..128 {
            cache.insert(i, "x".repeat(64));
        }
        assert!(cache.memory_usage() > 0);
        cache.set_memory_limit(0);
        assert_eq!(cache.memory_usage(), 0);
    }
}
