//! Two-tier storage engine
//!
//! Write-through LRU cache in front of a durable [`BlinkStore`], with an
//! asynchronous write-behind path: accepted SETs go into a bounded queue
//! drained by a dedicated writer thread. Deletes are synchronous against
//! the durable map and purge queued writes for the key first, so the map
//! always observes per-key program order.

use blinkstore::{BlinkStore, Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, warn};

use crate::lru::LruCache;
use crate::stats::CacheStats;

/// Default bound on the write-behind queue
const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// A (key, value) pair waiting for the background writer
struct WriteRequest {
    key: Vec<u8>,
    value: Vec<u8>,
}

struct WriterState {
    queue: VecDeque<WriteRequest>,
    in_flight: Option<WriteRequest>,
    stopping: bool,
}

struct WriterShared {
    state: Mutex<WriterState>,
    /// Signalled on enqueue and on shutdown
    work: Condvar,
    /// Signalled after each drained request
    done: Condvar,
}

/// Cached storage engine combining the LRU cache with a BlinkStore backend
///
/// Owns the cache, the durable map, the write queue, and the writer thread
/// for its whole lifetime. Safe for concurrent callers.
pub struct BlinkCache {
    store: Arc<BlinkStore>,
    cache: Mutex<LruCache<Vec<u8>, Vec<u8>>>,
    shared: Arc<WriterShared>,
    writer: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<CacheStats>,
    capacity: usize,
    queue_depth: usize,
}

impl BlinkCache {
    /// Open an engine over the given storage directory
    ///
    /// # Arguments
    /// * `path` - Storage directory for the durable map
    /// * `capacity` - Maximum number of cached entries
    pub fn new<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        Self::with_options(path, capacity, DEFAULT_QUEUE_DEPTH, false)
    }

    /// Open an engine with an explicit write-behind queue bound
    pub fn with_queue_depth<P: AsRef<Path>>(
        path: P,
        capacity: usize,
        queue_depth: usize,
    ) -> Result<Self> {
        Self::with_options(path, capacity, queue_depth, false)
    }

    /// Open an engine with every knob exposed
    pub fn with_options<P: AsRef<Path>>(
        path: P,
        capacity: usize,
        queue_depth: usize,
        fsync: bool,
    ) -> Result<Self> {
        let store = Arc::new(BlinkStore::open_with(path, fsync)?);
        let shared = Arc::new(WriterShared {
            state: Mutex::new(WriterState {
                queue: VecDeque::new(),
                in_flight: None,
                stopping: false,
            }),
            work: Condvar::new(),
            done: Condvar::new(),
        });
        let stats = Arc::new(CacheStats::new());

        let writer = {
            let shared = Arc::clone(&shared);
            let store = Arc::clone(&store);
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name("blink-writer".into())
                .spawn(move || write_worker(shared, store, stats))?
        };

        Ok(BlinkCache {
            store,
            cache: Mutex::new(LruCache::new(capacity)),
            shared,
            writer: Mutex::new(Some(writer)),
            stats,
            capacity,
            queue_depth,
        })
    }

    /// Write-through set
    ///
    /// The cache is updated synchronously; the durable write is queued for
    /// the background writer. When the queue is full the write degrades to
    /// a synchronous durable put, after discarding any queued write for the
    /// same key so the newer value cannot be overwritten by an older one.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        blinkstore::validate_key(key)?;
        blinkstore::validate_value(value)?;

        {
            let mut cache = self.cache.lock();
            if cache.put(key.to_vec(), value.to_vec()).is_some() {
                self.stats.record_eviction();
            }
        }

        let mut state = self.shared.state.lock();
        if state.stopping {
            return Err(Error::Closed);
        }
        if state.queue.len() < self.queue_depth {
            state.queue.push_back(WriteRequest {
                key: key.to_vec(),
                value: value.to_vec(),
            });
            drop(state);
            self.shared.work.notify_one();
            self.stats.record_queued_write();
            return Ok(());
        }

        state.queue.retain(|req| req.key != key);
        while state
            .in_flight
            .as_ref()
            .is_some_and(|req| req.key == key)
        {
            self.shared.done.wait(&mut state);
        }
        drop(state);
        self.stats.record_direct_write();
        self.store.put(key, value)
    }

    /// Cache lookup with durable fallback
    ///
    /// A miss that finds the key in the pending queue or the durable map is
    /// promoted into the cache. The cache lock is never held while the
    /// other tiers are consulted.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        {
            let mut cache = self.cache.lock();
            if let Some(value) = cache.get(key) {
                self.stats.record_hit();
                return Some(value.clone());
            }
        }
        self.stats.record_miss();

        // A queued write that has not drained yet still wins over the
        // durable map; the newest entry for the key takes precedence.
        let pending = {
            let state = self.shared.state.lock();
            state
                .queue
                .iter()
                .rev()
                .find(|req| req.key == key)
                .or(state.in_flight.as_ref().filter(|req| req.key == key))
                .map(|req| req.value.clone())
        };

        let value = pending.or_else(|| self.store.get(key))?;

        let mut cache = self.cache.lock();
        if cache.put(key.to_vec(), value.clone()).is_some() {
            self.stats.record_eviction();
        }
        Some(value)
    }

    /// Synchronous delete across both tiers
    ///
    /// Queued writes for the key are discarded and an in-flight write for
    /// it is waited out before the durable remove, so a SET accepted before
    /// the delete can never resurrect the key afterwards. Returns true when
    /// any tier held the key.
    pub fn del(&self, key: &[u8]) -> Result<bool> {
        let cached = self.cache.lock().remove(key).is_some();

        let pending = {
            let mut state = self.shared.state.lock();
            let before = state.queue.len();
            state.queue.retain(|req| req.key != key);
            let purged = before - state.queue.len();
            while state
                .in_flight
                .as_ref()
                .is_some_and(|req| req.key == key)
            {
                self.shared.done.wait(&mut state);
            }
            purged > 0
        };

        let stored = self.store.remove(key)?;
        Ok(cached || pending || stored)
    }

    /// Drop everything
    ///
    /// Pending writes are discarded, the cache is emptied, and the durable
    /// file is truncated, so no pre-clear value can be observed afterwards.
    pub fn clear(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            state.queue.clear();
            while state.in_flight.is_some() {
                self.shared.done.wait(&mut state);
            }
        }
        self.cache.lock().clear();
        self.store.clear()?;
        self.stats.reset();
        Ok(())
    }

    /// Block until the write queue is fully drained
    pub fn flush(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        while !state.queue.is_empty() || state.in_flight.is_some() {
            self.shared.done.wait(&mut state);
        }
        Ok(())
    }

    /// Stop accepting writes, drain the queue, join the writer, close the
    /// store; idempotent
    pub fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            state.stopping = true;
        }
        self.shared.work.notify_all();

        if let Some(handle) = self.writer.lock().take() {
            if handle.join().is_err() {
                error!("background writer panicked during shutdown");
            }
        }

        self.store.close()
    }

    /// Number of records in the durable map
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// True when the durable map holds no records
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Current number of cached entries
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Cache capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Writes queued but not yet applied to the durable map
    pub fn pending_writes(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Engine statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl Drop for BlinkCache {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "error closing engine");
        }
    }
}

fn write_worker(shared: Arc<WriterShared>, store: Arc<BlinkStore>, stats: Arc<CacheStats>) {
    loop {
        let (key, value) = {
            let mut state = shared.state.lock();
            loop {
                if let Some(req) = state.queue.pop_front() {
                    let pair = (req.key.clone(), req.value.clone());
                    state.in_flight = Some(req);
                    break pair;
                }
                if state.stopping {
                    shared.done.notify_all();
                    return;
                }
                shared.work.wait(&mut state);
            }
        };

        if let Err(e) = store.put(&key, &value) {
            warn!(error = %e, "background write failed, dropping request");
            stats.record_failed_write();
        }

        let mut state = shared.state.lock();
        state.in_flight = None;
        drop(state);
        shared.done.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_and_get() {
        let dir = TempDir::new().unwrap();
        let engine = BlinkCache::new(dir.path(), 10).unwrap();

        engine.set(b"hello", b"world").unwrap();
        assert_eq!(engine.get(b"hello"), Some(b"world".to_vec()));
        assert_eq!(engine.stats().hits(), 1);
        assert_eq!(engine.get(b"missing"), None);
        assert_eq!(engine.stats().misses(), 1);
    }

    #[test]
    fn test_flush_matches_durable_map() {
        let dir = TempDir::new().unwrap();
        let engine = BlinkCache::new(dir.path(), 10).unwrap();

        engine.set(b"a", b"1").unwrap();
        engine.set(b"b", b"2").unwrap();
        engine.flush().unwrap();

        let store = BlinkStore::open(dir.path()).unwrap();
        assert_eq!(engine.get(b"a"), store.get(b"a"));
        assert_eq!(engine.get(b"b"), store.get(b"b"));
        assert_eq!(store.get(b"a"), Some(b"1".to_vec()));
    }

    #[test]
    fn test_eviction_reads_back_from_durable() {
        let dir = TempDir::new().unwrap();
        let engine = BlinkCache::new(dir.path(), 2).unwrap();

        engine.set(b"a", b"va").unwrap();
        engine.set(b"b", b"vb").unwrap();
        engine.set(b"c", b"vc").unwrap();
        assert_eq!(engine.cache_len(), 2);

        engine.flush().unwrap();

        // a was evicted from the cache but is durably stored; the read
        // promotes it back in.
        assert_eq!(engine.get(b"a"), Some(b"va".to_vec()));
        assert!(engine.stats().misses() >= 1);
        assert_eq!(engine.get(b"a"), Some(b"va".to_vec()));
    }

    #[test]
    fn test_pending_write_visible_after_eviction() {
        let dir = TempDir::new().unwrap();
        let engine = BlinkCache::new(dir.path(), 1).unwrap();

        engine.set(b"k1", b"v1").unwrap();
        engine.set(b"k2", b"v2").unwrap();
        assert_eq!(engine.cache_len(), 1);

        // k1 is out of the cache; whether its write has drained or not,
        // the engine must still serve it.
        assert_eq!(engine.get(b"k1"), Some(b"v1".to_vec()));
    }

    #[test]
    fn test_last_writer_wins() {
        let dir = TempDir::new().unwrap();

        {
            let engine = BlinkCache::new(dir.path(), 10).unwrap();
            engine.set(b"k", b"v1").unwrap();
            engine.set(b"k", b"v2").unwrap();
            engine.flush().unwrap();
            engine.shutdown().unwrap();
        }

        let store = BlinkStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"k"), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_del_returns_presence() {
        let dir = TempDir::new().unwrap();
        let engine = BlinkCache::new(dir.path(), 10).unwrap();

        engine.set(b"k", b"v").unwrap();
        assert!(engine.del(b"k").unwrap());
        assert!(!engine.del(b"k").unwrap());
        assert_eq!(engine.get(b"k"), None);
    }

    #[test]
    fn test_del_beats_queued_set() {
        let dir = TempDir::new().unwrap();

        {
            let engine = BlinkCache::new(dir.path(), 10).unwrap();
            engine.set(b"k", b"v1").unwrap();
            engine.set(b"k", b"v2").unwrap();
            assert!(engine.del(b"k").unwrap());
            engine.flush().unwrap();

            assert_eq!(engine.get(b"k"), None);
            engine.shutdown().unwrap();
        }

        // No queued SET may have resurrected the key.
        let store = BlinkStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"k"), None);
    }

    #[test]
    fn test_restart_persistence() {
        let dir = TempDir::new().unwrap();

        {
            let engine = BlinkCache::new(dir.path(), 10).unwrap();
            engine.set(b"hello", b"world").unwrap();
            engine.flush().unwrap();
            engine.shutdown().unwrap();
        }

        {
            let engine = BlinkCache::new(dir.path(), 10).unwrap();
            assert_eq!(engine.get(b"hello"), Some(b"world".to_vec()));
        }
    }

    #[test]
    fn test_clear_discards_pending() {
        let dir = TempDir::new().unwrap();

        {
            let engine = BlinkCache::new(dir.path(), 10).unwrap();
            engine.set(b"a", b"1").unwrap();
            engine.set(b"b", b"2").unwrap();
            engine.clear().unwrap();

            assert_eq!(engine.get(b"a"), None);
            assert_eq!(engine.get(b"b"), None);
            assert_eq!(engine.pending_writes(), 0);
            engine.shutdown().unwrap();
        }

        let store = BlinkStore::open(dir.path()).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_zero_depth_queue_degrades_to_sync() {
        let dir = TempDir::new().unwrap();
        let engine = BlinkCache::with_queue_depth(dir.path(), 10, 0).unwrap();

        engine.set(b"k", b"v1").unwrap();
        engine.set(b"k", b"v2").unwrap();

        assert_eq!(engine.stats().direct_writes(), 2);
        assert_eq!(engine.pending_writes(), 0);

        let store = BlinkStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"k"), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_set_after_shutdown() {
        let dir = TempDir::new().unwrap();
        let engine = BlinkCache::new(dir.path(), 10).unwrap();

        engine.shutdown().unwrap();
        assert!(matches!(engine.set(b"k", b"v"), Err(Error::Closed)));
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let dir = TempDir::new().unwrap();

        {
            let engine = BlinkCache::new(dir.path(), 100).unwrap();
            for i in 0..50u32 {
                let key = format!("key{}", i);
                engine.set(key.as_bytes(), b"value").unwrap();
            }
            engine.shutdown().unwrap();
        }

        let store = BlinkStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 50);
    }

    #[test]
    fn test_validation_rejected_before_cache() {
        let dir = TempDir::new().unwrap();
        let engine = BlinkCache::new(dir.path(), 10).unwrap();

        let long_key = vec![b'k'; blinkstore::MAX_KEY_LEN + 1];
        assert!(matches!(
            engine.set(&long_key, b"v"),
            Err(Error::KeyTooLarge(_))
        ));
        assert!(matches!(engine.set(b"k", b""), Err(Error::EmptyValue)));
        assert_eq!(engine.cache_len(), 0);
    }

    #[test]
    fn test_capacity_one_cache() {
        let dir = TempDir::new().unwrap();
        let engine = BlinkCache::new(dir.path(), 1).unwrap();

        engine.set(b"a", b"1").unwrap();
        engine.set(b"b", b"2").unwrap();
        assert_eq!(engine.cache_len(), 1);

        engine.flush().unwrap();
        assert_eq!(engine.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(engine.get(b"b"), Some(b"2".to_vec()));
    }

    #[test]
    fn test_concurrent_disjoint_keys() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(BlinkCache::new(dir.path(), 100).unwrap());

        let handles: Vec<_> = (0..4u32)
            .map(|worker| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for i in 0..50u32 {
                        let key = format!("w{}k{}", worker, i);
                        let value = format!("v{}", i);
                        engine.set(key.as_bytes(), value.as_bytes()).unwrap();
                        assert_eq!(
                            engine.get(key.as_bytes()),
                            Some(value.into_bytes()),
                        );
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        engine.flush().unwrap();
        assert_eq!(engine.len(), 200);
    }
}
