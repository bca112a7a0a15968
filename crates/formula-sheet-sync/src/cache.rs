use crate::config::RangeCacheConfig;
use crate::range::{tab_prefix, RangeKey};
use lru::LruCache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Rows of cell values, in remote order.
pub type Rows = Vec<Vec<String>>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RangeCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    /// Entries removed by tab invalidation.
    pub invalidated: u64,
    /// Entries removed by the age sweep.
    pub swept: u64,
    /// Entries removed by the hard cap.
    pub evicted: u64,
    /// Inserts skipped because the tab was invalidated while the fetch ran.
    pub stale_inserts_skipped: u64,
}

#[derive(Debug)]
struct CacheEntry {
    value: Arc<Rows>,
    inserted_at: Instant,
}

struct Inner {
    entries: LruCache<RangeKey, CacheEntry>,
    epochs: HashMap<String, u64>,
    /// Bumped by `clear`; part of every tab's epoch.
    clears: u64,
    stats: RangeCacheStats,
}

impl Inner {
    fn epoch(&self, tab: &str) -> u64 {
        let tab_epoch = self.epochs.get(tab).copied().unwrap_or(0);
        self.clears.wrapping_add(tab_epoch)
    }
}

/// Process-wide cache of fetched windows keyed by [`RangeKey`].
///
/// Entries are never mutated once stored: `set` replaces them and
/// `invalidate_prefix` removes them. Reads honour a TTL; the cache bounds
/// itself on insert by sweeping aged entries once it grows past
/// `sweep_threshold`, and by evicting least recently used entries beyond
/// `max_entries`.
///
/// Every tab carries an invalidation epoch. A fetch that records the epoch
/// before reading upstream and stores through [`RangeCache::set_if_current`]
/// cannot resurrect data that predates a committed write.
#[derive(Clone)]
pub struct RangeCache {
    config: RangeCacheConfig,
    inner: Arc<Mutex<Inner>>,
}

impl RangeCache {
    pub fn new(mut config: RangeCacheConfig) -> Self {
        config.sweep_threshold = config.sweep_threshold.max(1);
        config.max_entries = config.max_entries.max(1);
        let inner = Inner {
            entries: LruCache::unbounded(),
            epochs: HashMap::new(),
            clears: 0,
            stats: RangeCacheStats::default(),
        };
        Self {
            config,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn config(&self) -> &RangeCacheConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("range cache mutex poisoned")
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats_snapshot(&self) -> RangeCacheStats {
        self.inner.lock().expect("range cache mutex poisoned").stats
    }

    /// Drop every entry. Epochs are bumped so in-flight fetches do not repopulate.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("range cache mutex poisoned");
        inner.entries.clear();
        inner.clears = inner.clears.wrapping_add(1);
    }

    /// Look up `key` using the configured TTL.
    pub fn get(&self, key: &RangeKey) -> Option<Arc<Rows>> {
        self.get_with_ttl(key, self.config.ttl)
    }

    /// Look up `key`, treating entries at least `ttl` old as missing.
    pub fn get_with_ttl(&self, key: &RangeKey, ttl: Duration) -> Option<Arc<Rows>> {
        self.get_at(key, ttl, Instant::now())
    }

    pub(crate) fn get_at(&self, key: &RangeKey, ttl: Duration, now: Instant) -> Option<Arc<Rows>> {
        let mut inner = self.inner.lock().expect("range cache mutex poisoned");
        let fresh = inner
            .entries
            .get(key)
            .filter(|entry| now.saturating_duration_since(entry.inserted_at) < ttl)
            .map(|entry| Arc::clone(&entry.value));
        match fresh {
            Some(value) => {
                inner.stats.hits = inner.stats.hits.saturating_add(1);
                log::debug!("range cache hit: {key}");
                Some(value)
            }
            None => {
                inner.stats.misses = inner.stats.misses.saturating_add(1);
                log::debug!("range cache miss: {key}");
                None
            }
        }
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set(&self, key: RangeKey, value: Rows) {
        self.set_at(key, value, Instant::now());
    }

    pub(crate) fn set_at(&self, key: RangeKey, value: Rows, now: Instant) {
        let mut inner = self.inner.lock().expect("range cache mutex poisoned");
        self.insert_locked(&mut inner, key, value, now);
    }

    /// Current invalidation epoch of `tab`.
    pub fn epoch(&self, tab: &str) -> u64 {
        self.inner.lock().expect("range cache mutex poisoned").epoch(tab)
    }

    /// Store `value` only if `key`'s tab has not been invalidated since
    /// `epoch` was read. Returns whether the value was stored.
    pub fn set_if_current(&self, key: RangeKey, value: Rows, epoch: u64) -> bool {
        let mut inner = self.inner.lock().expect("range cache mutex poisoned");
        if inner.epoch(key.tab()) != epoch {
            inner.stats.stale_inserts_skipped = inner.stats.stale_inserts_skipped.saturating_add(1);
            log::debug!("skipping cache insert for {key}: tab invalidated during fetch");
            return false;
        }
        self.insert_locked(&mut inner, key, value, Instant::now());
        true
    }

    /// Remove every entry whose key starts with `"<tab>!"`. Returns the
    /// number of entries removed.
    pub fn invalidate_prefix(&self, tab: &str) -> usize {
        let prefix = tab_prefix(tab);
        let mut inner = self.inner.lock().expect("range cache mutex poisoned");

        let epoch = inner.epochs.entry(tab.to_string()).or_insert(0);
        *epoch = epoch.wrapping_add(1);

        let doomed: Vec<RangeKey> = inner
            .entries
            .iter()
            .filter(|(key, _)| key.as_str().starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            inner.entries.pop(key);
        }
        inner.stats.invalidated = inner.stats.invalidated.saturating_add(doomed.len() as u64);
        log::debug!("invalidated {} cached range(s) for tab {tab:?}", doomed.len());
        doomed.len()
    }

    fn insert_locked(&self, inner: &mut Inner, key: RangeKey, value: Rows, now: Instant) {
        inner.entries.put(
            key,
            CacheEntry {
                value: Arc::new(value),
                inserted_at: now,
            },
        );
        inner.stats.inserts = inner.stats.inserts.saturating_add(1);

        if inner.entries.len() > self.config.sweep_threshold {
            self.sweep_locked(inner, now);
        }

        while inner.entries.len() > self.config.max_entries {
            if inner.entries.pop_lru().is_none() {
                break;
            }
            inner.stats.evicted = inner.stats.evicted.saturating_add(1);
        }
    }

    fn sweep_locked(&self, inner: &mut Inner, now: Instant) {
        let sweep_age = self.config.sweep_age;
        let aged: Vec<RangeKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.inserted_at) > sweep_age)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &aged {
            inner.entries.pop(key);
        }
        inner.stats.swept = inner.stats.swept.saturating_add(aged.len() as u64);
        if !aged.is_empty() {
            log::debug!("range cache sweep removed {} aged entries", aged.len());
        }
    }
}
