use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use mailctx_core::errors::InferenceError;
use mailctx_core::provider::SignalExtractor;
use mailctx_core::signal::AnalysisSignal;
use mailctx_settings::CacheSettings;

/// Time source for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    last_access: u64,
}

struct Slots<K, V> {
    entries: HashMap<K, Entry<V>>,
    tick: u64,
}

/// Capacity-bounded map with per-entry TTL. When full, expired entries go
/// first, then the least recently used one.
pub struct BoundedCache<K, V> {
    capacity: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    slots: Mutex<Slots<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::with_clock(capacity, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            clock,
            slots: Mutex::new(Slots {
                entries: HashMap::new(),
                tick: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut slots = self.slots.lock();
        slots.tick += 1;
        let tick = slots.tick;

        let expired = match slots.entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.inserted_at) < self.ttl => {
                entry.last_access = tick;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            slots.entries.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: K, value: V) {
        let now = self.clock.now();
        let mut slots = self.slots.lock();
        slots.tick += 1;
        let tick = slots.tick;

        if !slots.entries.contains_key(&key) && slots.entries.len() >= self.capacity {
            self.make_room(&mut slots, now);
        }
        slots.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                last_access: tick,
            },
        );
    }

    fn make_room(&self, slots: &mut Slots<K, V>, now: Instant) {
        let before = slots.entries.len();
        slots
            .entries
            .retain(|_, e| now.duration_since(e.inserted_at) < self.ttl);
        let expired = (before - slots.entries.len()) as u64;
        if expired > 0 {
            self.expirations.fetch_add(expired, Ordering::Relaxed);
            return;
        }

        let oldest = slots
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            slots.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.slots.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

/// Hex SHA-256 of the email body, used as the cache key.
pub fn content_key(content: &str) -> String {
    Sha256::digest(content.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Memoizes successful extractions by content hash. Failures are never
/// cached.
pub struct CachedExtractor {
    inner: Arc<dyn SignalExtractor>,
    cache: BoundedCache<String, AnalysisSignal>,
}

impl CachedExtractor {
    pub fn new(inner: Arc<dyn SignalExtractor>, cache: BoundedCache<String, AnalysisSignal>) -> Self {
        Self { inner, cache }
    }

    pub fn from_settings(inner: Arc<dyn SignalExtractor>, settings: &CacheSettings) -> Self {
        Self::new(
            inner,
            BoundedCache::new(settings.max_entries, Duration::from_secs(settings.ttl_secs)),
        )
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[async_trait]
impl SignalExtractor for CachedExtractor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn infer(&self, text: &str) -> Result<AnalysisSignal, InferenceError> {
        let key = content_key(text);
        if let Some(hit) = self.cache.get(&key) {
            debug!(key = %&key[..12], "signal cache hit");
            return Ok(hit);
        }
        let signal = self.inner.infer(text).await?;
        self.cache.insert(key, signal.clone());
        Ok(signal)
    }
}
