//! Concurrent map whose values are built at most once per key
//!
//! Finished values live in one `DashMap`; a second `DashMap` holds a
//! per-key build lock. A value is built while holding only its own key's
//! build lock, so lookups of other keys never wait for a construction in
//! progress, even when they hash to the same shard.
//!
//! ## Insert Sequence
//!
//! ```text
//! 1. values.get(key)            - hit: return
//! 2. building.entry(key)        - shard lock held only to clone the key's lock
//! 3. lock key                   - concurrent builders of this key queue here
//! 4. values.get(key)            - hit: another builder won, return its value
//! 5. build()                    - no map lock held
//!      Err -> return, nothing inserted (build lock kept for the retry)
//! 6. values.insert(key, value)
//! 7. building.remove(key), unlock
//! ```

use dashmap::DashMap;
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::Arc;

/// Map building each value at most once
pub struct OnceMap<K, V> {
    values: DashMap<K, V>,
    building: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> OnceMap<K, V> {
    /// Empty map
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
            building: DashMap::new(),
        }
    }

    /// Value for `key`, if built
    pub fn get(&self, key: &K) -> Option<V> {
        self.values.get(key).map(|v| v.value().clone())
    }

    /// Value for `key`, built with `build` if missing
    ///
    /// Concurrent callers for the same key observe the same value and
    /// `build` runs once. A failed build inserts nothing.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: K,
        build: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(existing) = self.get(&key) {
            return Ok(existing);
        }

        let lock = Arc::clone(self.building.entry(key.clone()).or_default().value());
        let _building = lock.lock();

        if let Some(existing) = self.get(&key) {
            return Ok(existing);
        }

        let value = build()?;
        self.values.insert(key.clone(), value.clone());
        self.building.remove(&key);
        Ok(value)
    }

    /// Whether a value is built for `key`
    pub fn contains_key(&self, key: &K) -> bool {
        self.values.contains_key(key)
    }

    /// Remove the value of `key`
    pub fn remove(&self, key: &K) -> Option<V> {
        self.values.remove(key).map(|(_, v)| v)
    }

    /// Keys with a built value
    pub fn keys(&self) -> Vec<K> {
        self.values.iter().map(|e| e.key().clone()).collect()
    }

    /// Remove every value
    pub fn clear(&self) {
        self.values.clear();
    }

    /// Number of built values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if no value is built
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for OnceMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_builds_once_and_serves_cached() {
        let map: OnceMap<&str, Arc<String>> = OnceMap::new();
        let builds = AtomicUsize::new(0);
        let build = || {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(Arc::new("v".to_string()))
        };
        let a = map.get_or_try_insert_with("k", build).unwrap();
        let b = map.get_or_try_insert_with("k", build).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(map.keys(), vec!["k"]);
    }

    #[test]
    fn test_failed_build_inserts_nothing() {
        let map: OnceMap<u32, u32> = OnceMap::new();
        assert_eq!(map.get_or_try_insert_with(1, || Err("boom")), Err("boom"));
        assert!(map.is_empty());
        assert!(!map.contains_key(&1));
        assert_eq!(map.get_or_try_insert_with(1, || Ok::<_, &str>(7)), Ok(7));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_concurrent_builders_share_one_value() {
        const THREADS: usize = 8;
        let map: Arc<OnceMap<u32, Arc<u32>>> = Arc::new(OnceMap::new());
        let builds = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let map = Arc::clone(&map);
                let builds = Arc::clone(&builds);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    map.get_or_try_insert_with(1, || {
                        builds.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        Ok::<_, ()>(Arc::new(1))
                    })
                    .unwrap()
                })
            })
            .collect();
        let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for v in &values[1..] {
            assert!(Arc::ptr_eq(&values[0], v));
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lookups_do_not_wait_for_a_build() {
        let map: Arc<OnceMap<u32, u32>> = Arc::new(OnceMap::new());
        for k in 0..512 {
            map.get_or_try_insert_with(k, || Ok::<_, ()>(k)).unwrap();
        }

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let builder = {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                map.get_or_try_insert_with(10_000, || {
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok::<_, ()>(0)
                })
            })
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                let all = (0..512).all(|k| map.get_or_try_insert_with(k, || Err(())) == Ok(k));
                let _ = done_tx.send(all);
            });
        }
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(true));

        release_tx.send(()).unwrap();
        assert_eq!(builder.join().unwrap(), Ok(0));
    }
}
