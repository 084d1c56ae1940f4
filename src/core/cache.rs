//! Content-addressed cache of parsed scans.
//!
//! Keys are the SHA-256 of the artifact bytes plus the decoding options, so a
//! renamed or re-uploaded copy of the same scan hits the same entry. The lock
//! is held only for lookup and insert; two concurrent misses on one key both
//! parse and the later insert wins.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use log::debug;
use sha2::{Digest, Sha256};

use super::loaders::{PointSet, ScanFormat};
use crate::config::OpacityEncoding;

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Arc<PointSet>>,
    order: VecDeque<String>,
}

/// Bounded FIFO cache of parsed point sets.
pub struct ScanCache {
    max_entries: usize,
    state: Mutex<CacheState>,
}

impl ScanCache {
    /// A cache holding at most `max_entries` scans; 0 disables caching.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Cache key for `bytes` decoded with the given options.
    pub fn key(bytes: &[u8], format: ScanFormat, encoding: OpacityEncoding) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{}:{:?}:{:?}", hex::encode(hasher.finalize()), format, encoding)
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached set for `key`, or run `load` and remember its result.
    ///
    /// Errors from `load` are returned and never cached.
    pub fn get_or_load<E, F>(&self, key: &str, load: F) -> Result<Arc<PointSet>, E>
    where
        F: FnOnce() -> Result<PointSet, E>,
    {
        if self.max_entries == 0 {
            return load().map(Arc::new);
        }

        if let Ok(state) = self.state.lock() {
            if let Some(hit) = state.entries.get(key) {
                debug!("Scan cache hit for {}", &key[..key.len().min(12)]);
                return Ok(Arc::clone(hit));
            }
        }

        let loaded = Arc::new(load()?);

        if let Ok(mut state) = self.state.lock() {
            if !state.entries.contains_key(key) {
                while state.order.len() >= self.max_entries {
                    match state.order.pop_front() {
                        Some(evicted) => {
                            state.entries.remove(&evicted);
                        }
                        None => break,
                    }
                }
                state.order.push_back(key.to_string());
            }
            state.entries.insert(key.to_string(), Arc::clone(&loaded));
        }

        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::Splat;
    use std::convert::Infallible;

    fn one_point(x: f32) -> PointSet {
        vec![Splat::new([x, 0.0, 0.0], 1.0)].into_iter().collect()
    }

    #[test]
    fn test_hit_returns_same_allocation() {
        let cache = ScanCache::new(4);
        let a = cache
            .get_or_load::<Infallible, _>("k", || Ok(one_point(1.0)))
            .unwrap();
        let b = cache
            .get_or_load::<Infallible, _>("k", || panic!("should not reload"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fifo_eviction() {
        let cache = ScanCache::new(2);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            cache
                .get_or_load::<Infallible, _>(key, || Ok(one_point(i as f32)))
                .unwrap();
        }
        assert_eq!(cache.len(), 2);

        let mut reloaded = false;
        cache
            .get_or_load::<Infallible, _>("a", || {
                reloaded = true;
                Ok(one_point(0.0))
            })
            .unwrap();
        assert!(reloaded);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache = ScanCache::new(2);
        let result = cache.get_or_load("bad", || Err::<PointSet, _>("broken"));
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disabled_cache_always_loads() {
        let cache = ScanCache::new(0);
        let a = cache.get_or_load::<Infallible, _>("k", || Ok(one_point(1.0))).unwrap();
        let b = cache.get_or_load::<Infallible, _>("k", || Ok(one_point(1.0))).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_depends_on_content_and_options() {
        let a = ScanCache::key(b"ply\n", ScanFormat::Ply, OpacityEncoding::Auto);
        let b = ScanCache::key(b"ply\n", ScanFormat::Ply, OpacityEncoding::Auto);
        let c = ScanCache::key(b"ply\n", ScanFormat::Ply, OpacityEncoding::Linear);
        let d = ScanCache::key(b"ply\r\n", ScanFormat::Ply, OpacityEncoding::Auto);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }
}
