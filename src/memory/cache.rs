//! Cache layer: the first stop for every memory operation.
//!
//! Entries start here with an access count of zero and become promotion
//! candidates once retrieved `promotion_threshold` times. The cache is bounded:
//! inserting into a full cache evicts the least recently accessed entry first,
//! ties broken by insertion order.
//!
//! All structural mutation happens under a single write lock over the whole
//! table; analysis and peeks take the read lock. The promotion hook is called
//! after the lock is released.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::stats::{HotEntry, PatternAnalysis};
use super::types::CacheEntry;
use crate::config::CacheConfig;
use crate::error::{Error, Result};

/// Called once per threshold crossing with a snapshot of the promoted entry.
pub type PromotionHook = Arc<dyn Fn(&CacheEntry) + Send + Sync>;

/// Called with the key of every entry LRU eviction drops.
pub type EvictionHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Eviction policy. Only LRU is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    Lru,
}

impl std::str::FromStr for EvictionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            other => Err(Error::Config(format!(
                "unsupported eviction policy: {other}. Supported: lru"
            ))),
        }
    }
}

/// Cumulative cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
    pub promotions: u64,
}

/// Serializable image of the cache, written when `persist_cache` is on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub saved_at: DateTime<Utc>,
    /// Oldest access first.
    pub entries: Vec<CacheEntry>,
    #[serde(default)]
    pub promotion_candidates: BTreeSet<String>,
}

// ── Internal state ───────────────────────────────────────────────────────────

struct Slot {
    entry: CacheEntry,
    /// Insertion order, used to break `last_access` ties.
    seq: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Slot>,
    /// (last_access, seq) → key. The first element is the LRU victim.
    recency: BTreeMap<(DateTime<Utc>, u64), String>,
    candidates: BTreeSet<String>,
    next_seq: u64,
    stats: CacheStats,
}

impl CacheState {
    fn insert(&mut self, entry: CacheEntry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.recency.insert((entry.last_access, seq), entry.key.clone());
        self.entries.insert(entry.key.clone(), Slot { entry, seq });
    }

    /// Move `key` to the most-recent end. `last_access` never goes backwards.
    fn touch(&mut self, key: &str, now: DateTime<Utc>) -> Option<&mut CacheEntry> {
        let slot = self.entries.get_mut(key)?;
        self.recency.remove(&(slot.entry.last_access, slot.seq));
        let at = now.max(slot.entry.last_access);
        slot.entry.last_access = at;
        self.recency.insert((at, slot.seq), key.to_string());
        Some(&mut slot.entry)
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&(slot.entry.last_access, slot.seq));
        self.candidates.remove(key);
        Some(slot.entry)
    }

    fn evict_lru(&mut self) -> Option<CacheEntry> {
        let (_, key) = self.recency.pop_first()?;
        let slot = self.entries.remove(&key)?;
        self.candidates.remove(&key);
        self.stats.evictions += 1;
        tracing::debug!(key = %key, content_type = %slot.entry.content_type, "evicted LRU entry");
        Some(slot.entry)
    }
}

// ── Cache layer ──────────────────────────────────────────────────────────────

pub struct CacheLayer {
    state: RwLock<CacheState>,
    max_size: usize,
    promotion_threshold: u64,
    eviction_policy: EvictionPolicy,
    hot_entries: usize,
    hook: RwLock<Option<PromotionHook>>,
    eviction_hook: RwLock<Option<EvictionHook>>,
}

impl CacheLayer {
    /// Create an LRU cache. `max_size` and `promotion_threshold` must be at least 1.
    pub fn new(max_size: usize, promotion_threshold: u64) -> Result<Self> {
        if max_size == 0 {
            return Err(Error::Config("cache max_size must be at least 1".into()));
        }
        if promotion_threshold == 0 {
            return Err(Error::Config(
                "cache promotion_threshold must be at least 1".into(),
            ));
        }
        Ok(Self {
            state: RwLock::new(CacheState::default()),
            max_size,
            promotion_threshold,
            eviction_policy: EvictionPolicy::Lru,
            hot_entries: 10,
            hook: RwLock::new(None),
            eviction_hook: RwLock::new(None),
        })
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let mut cache = Self::new(config.max_size, config.promotion_threshold)?;
        cache.eviction_policy = config.eviction_policy.parse()?;
        cache.hot_entries = config.hot_entries;
        Ok(cache)
    }

    pub fn set_promotion_hook(&self, hook: PromotionHook) {
        *self.hook.write() = Some(hook);
    }

    /// Install the eviction hook. It runs after the cache lock is released.
    pub fn set_eviction_hook(&self, hook: EvictionHook) {
        *self.eviction_hook.write() = Some(hook);
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn promotion_threshold(&self) -> u64 {
        self.promotion_threshold
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.eviction_policy
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.read().entries.contains_key(key)
    }

    /// Content-addressed key: first 16 hex chars of SHA-256 over `type:json`.
    pub fn generate_key(content: &Value, content_type: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content_type.as_bytes());
        hasher.update(b":");
        hasher.update(content.to_string().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }

    /// Store content and return its key.
    ///
    /// Identical content of the same type maps to the same key; storing it again
    /// records the CI and refreshes recency without counting an access.
    pub fn store(
        &self,
        content: Value,
        content_type: &str,
        metadata: HashMap<String, Value>,
        ci_id: &str,
    ) -> String {
        let key = Self::generate_key(&content, content_type);
        self.put(key, content, content_type, metadata, ci_id)
    }

    /// Store content under an explicit key (cache warming after a backend recall).
    pub fn store_with_key(
        &self,
        key: &str,
        content: Value,
        content_type: &str,
        metadata: HashMap<String, Value>,
        ci_id: &str,
    ) -> String {
        self.put(key.to_string(), content, content_type, metadata, ci_id)
    }

    fn put(
        &self,
        key: String,
        content: Value,
        content_type: &str,
        metadata: HashMap<String, Value>,
        ci_id: &str,
    ) -> String {
        let now = Utc::now();
        let mut evicted = Vec::new();
        {
            let mut state = self.state.write();

            if let Some(entry) = state.touch(&key, now) {
                if !ci_id.is_empty() {
                    entry.ci_sources.insert(ci_id.to_string());
                }
                return key;
            }

            // Capacity is enforced before the insert so the table never exceeds max_size.
            while state.entries.len() >= self.max_size {
                match state.evict_lru() {
                    Some(victim) => evicted.push(victim.key),
                    None => break,
                }
            }

            let size_bytes = content.to_string().len();
            let mut ci_sources = BTreeSet::new();
            if !ci_id.is_empty() {
                ci_sources.insert(ci_id.to_string());
            }
            state.insert(CacheEntry {
                key: key.clone(),
                content,
                content_type: content_type.to_string(),
                metadata,
                ci_sources,
                access_count: 0,
                created_at: now,
                last_access: now,
                size_bytes,
            });
            state.stats.stores += 1;
            tracing::debug!(key = %key, content_type, size_bytes, "stored cache entry");
        }

        if !evicted.is_empty() {
            let hook = self.eviction_hook.read().clone();
            if let Some(hook) = hook {
                for victim in &evicted {
                    hook(victim);
                }
            }
        }
        key
    }

    /// Retrieve content, counting the access. `None` on miss.
    pub fn retrieve(&self, key: &str, ci_id: &str) -> Option<Value> {
        self.retrieve_entry(key, ci_id).map(|entry| entry.content)
    }

    /// Retrieve a snapshot of the entry, counting the access.
    ///
    /// When the access count reaches the promotion threshold the key becomes a
    /// promotion candidate and the hook fires. Further accesses don't re-fire.
    pub fn retrieve_entry(&self, key: &str, ci_id: &str) -> Option<CacheEntry> {
        let (snapshot, crossed) = {
            let mut state = self.state.write();
            let Some(entry) = state.touch(key, Utc::now()) else {
                state.stats.misses += 1;
                return None;
            };
            entry.access_count += 1;
            if !ci_id.is_empty() {
                entry.ci_sources.insert(ci_id.to_string());
            }
            let crossed = entry.access_count == self.promotion_threshold;
            let snapshot = entry.clone();

            state.stats.hits += 1;
            if crossed {
                state.candidates.insert(key.to_string());
                state.stats.promotions += 1;
            }
            (snapshot, crossed)
        };

        if crossed {
            tracing::info!(
                key = %key,
                accesses = snapshot.access_count,
                "entry marked for promotion"
            );
            let hook = self.hook.read().clone();
            if let Some(hook) = hook {
                hook(&snapshot);
            }
        }

        Some(snapshot)
    }

    /// Read an entry without counting an access or touching recency.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.state
            .read()
            .entries
            .get(key)
            .map(|slot| slot.entry.clone())
    }

    /// Snapshot every resident entry matching `predicate`, most recent first.
    pub fn entries_where(&self, predicate: impl Fn(&CacheEntry) -> bool) -> Vec<CacheEntry> {
        let state = self.state.read();
        state
            .recency
            .values()
            .rev()
            .filter_map(|key| state.entries.get(key))
            .map(|slot| &slot.entry)
            .filter(|entry| predicate(entry))
            .cloned()
            .collect()
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.state.write().remove(key)
    }

    /// Remove every entry last accessed strictly before `cutoff`. Returns the removed keys.
    pub fn forget_before(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut state = self.state.write();
        let stale: Vec<String> = state
            .recency
            .range(..(cutoff, 0))
            .map(|(_, key)| key.clone())
            .collect();
        for key in &stale {
            state.remove(key);
        }
        stale
    }

    // ── Promotion candidates ─────────────────────────────────────────────────

    pub fn promotion_candidates(&self) -> BTreeSet<String> {
        self.state.read().candidates.clone()
    }

    /// Take every candidate, returning snapshots of the resident entries.
    pub fn drain_promotion_candidates(&self) -> Vec<CacheEntry> {
        let mut state = self.state.write();
        let keys = std::mem::take(&mut state.candidates);
        keys.iter()
            .filter_map(|key| state.entries.get(key))
            .map(|slot| slot.entry.clone())
            .collect()
    }

    pub fn clear_promoted(&self, keys: &[String]) {
        let mut state = self.state.write();
        for key in keys {
            state.candidates.remove(key);
        }
    }

    /// Re-queue a resident key for promotion. Returns `false` if it's gone.
    pub fn mark_for_promotion(&self, key: &str) -> bool {
        let mut state = self.state.write();
        if !state.entries.contains_key(key) {
            return false;
        }
        state.candidates.insert(key.to_string());
        true
    }

    // ── Analysis ─────────────────────────────────────────────────────────────

    pub fn stats(&self) -> CacheStats {
        self.state.read().stats.clone()
    }

    /// Summarize access patterns. Read-only.
    pub fn analyze_patterns(&self) -> PatternAnalysis {
        let state = self.state.read();

        let mut total_accesses = 0;
        let mut unique_cis: HashSet<&str> = HashSet::new();
        let mut type_distribution = BTreeMap::new();
        for slot in state.entries.values() {
            let entry = &slot.entry;
            total_accesses += entry.access_count;
            unique_cis.extend(entry.ci_sources.iter().map(String::as_str));
            *type_distribution
                .entry(entry.content_type.clone())
                .or_insert(0) += 1;
        }

        let mut hot: Vec<&CacheEntry> = state
            .entries
            .values()
            .map(|slot| &slot.entry)
            .filter(|entry| entry.access_count > 0)
            .collect();
        hot.sort_by(|a, b| {
            b.access_velocity()
                .total_cmp(&a.access_velocity())
                .then(b.access_count.cmp(&a.access_count))
                .then(a.key.cmp(&b.key))
        });
        let hot_entries = hot
            .into_iter()
            .take(self.hot_entries)
            .map(|entry| HotEntry {
                key: entry.key.clone(),
                content_type: entry.content_type.clone(),
                accesses: entry.access_count,
                velocity: entry.access_velocity(),
            })
            .collect();

        PatternAnalysis {
            total_entries: state.entries.len(),
            total_accesses,
            unique_cis: unique_cis.len(),
            promotion_pending: state.candidates.len(),
            type_distribution,
            hot_entries,
            cache_stats: state.stats.clone(),
        }
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> CacheSnapshot {
        let state = self.state.read();
        CacheSnapshot {
            saved_at: Utc::now(),
            entries: state
                .recency
                .values()
                .filter_map(|key| state.entries.get(key))
                .map(|slot| slot.entry.clone())
                .collect(),
            promotion_candidates: state.candidates.clone(),
        }
    }

    /// Load a snapshot on top of the current contents.
    ///
    /// Entries are replayed oldest access first, so when the snapshot is larger
    /// than `max_size` the most recently touched entries survive. Returns the
    /// number of resident entries afterwards.
    pub fn restore(&self, snapshot: CacheSnapshot) -> usize {
        let mut entries = snapshot.entries;
        entries.sort_by_key(|entry| entry.last_access);

        let mut state = self.state.write();
        for mut entry in entries {
            state.remove(&entry.key);
            while state.entries.len() >= self.max_size {
                if state.evict_lru().is_none() {
                    break;
                }
            }
            if entry.size_bytes == 0 {
                entry.size_bytes = entry.content.to_string().len();
            }
            state.insert(entry);
        }
        for key in snapshot.promotion_candidates {
            if state.entries.contains_key(&key) {
                state.candidates.insert(key);
            }
        }
        state.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache(max_size: usize, threshold: u64) -> CacheLayer {
        CacheLayer::new(max_size, threshold).unwrap()
    }

    fn put(cache: &CacheLayer, text: &str) -> String {
        cache.store(json!(text), "thought", HashMap::new(), "tester")
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(CacheLayer::new(0, 2).is_err());
        assert!(CacheLayer::new(10, 0).is_err());
    }

    #[test]
    fn rejects_unknown_eviction_policy() {
        let config = CacheConfig {
            eviction_policy: "lfu".into(),
            ..CacheConfig::default()
        };
        let err = CacheLayer::from_config(&config).err().unwrap();
        assert!(err.to_string().contains("unsupported eviction policy"));
    }

    #[test]
    fn store_starts_with_zero_accesses() {
        let cache = cache(10, 2);
        let key = put(&cache, "hello");
        let entry = cache.peek(&key).unwrap();
        assert_eq!(entry.access_count, 0);
        assert!(entry.ci_sources.contains("tester"));
        assert_eq!(key.len(), 16);
    }

    #[test]
    fn identical_content_reuses_key() {
        let cache = cache(10, 2);
        let a = cache.store(json!("same"), "fact", HashMap::new(), "ci-a");
        let b = cache.store(json!("same"), "fact", HashMap::new(), "ci-b");
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        let entry = cache.peek(&a).unwrap();
        assert_eq!(entry.access_count, 0);
        assert_eq!(entry.ci_sources.len(), 2);

        let other = cache.store(json!("same"), "opinion", HashMap::new(), "ci-a");
        assert_ne!(a, other);
    }

    #[test]
    fn miss_is_none_and_counted() {
        let cache = cache(10, 2);
        assert!(cache.retrieve("missing", "tester").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn promotion_hook_fires_once_per_crossing() {
        let cache = cache(10, 2);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        cache.set_promotion_hook(Arc::new(move |_entry: &CacheEntry| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let key = put(&cache, "hot");
        cache.retrieve(&key, "a");
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        cache.retrieve(&key, "a");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        cache.retrieve(&key, "a");
        cache.retrieve(&key, "b");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(cache.promotion_candidates().contains(&key));
    }

    #[test]
    fn eviction_hook_reports_victims() {
        let cache = cache(2, 5);
        let evicted = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&evicted);
        cache.set_eviction_hook(Arc::new(move |key: &str| {
            sink.lock().push(key.to_string());
        }));

        let a = put(&cache, "a");
        put(&cache, "b");
        put(&cache, "b");
        assert!(evicted.lock().is_empty());
        put(&cache, "c");
        assert_eq!(*evicted.lock(), vec![a]);
    }

    #[test]
    fn retrieve_refreshes_recency() {
        let cache = cache(3, 5);
        let a = put(&cache, "a");
        let b = put(&cache, "b");
        let c = put(&cache, "c");
        cache.retrieve(&a, "tester");
        put(&cache, "d");

        assert!(cache.contains(&a));
        assert!(!cache.contains(&b), "b is the least recently used");
        assert!(cache.contains(&c));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn eviction_drops_promotion_candidacy() {
        let cache = cache(2, 1);
        let a = put(&cache, "a");
        cache.retrieve(&a, "tester");
        assert!(cache.promotion_candidates().contains(&a));

        put(&cache, "b");
        put(&cache, "c");
        assert!(!cache.contains(&a));
        assert!(cache.promotion_candidates().is_empty());
    }

    #[test]
    fn forget_before_is_strict() {
        let cache = cache(10, 2);
        let key = put(&cache, "x");
        let at = cache.peek(&key).unwrap().last_access;
        assert!(cache.forget_before(at).is_empty());
        let removed = cache.forget_before(at + chrono::Duration::milliseconds(1));
        assert_eq!(removed, vec![key]);
        assert!(cache.is_empty());
    }

    #[test]
    fn drain_returns_resident_candidates() {
        let cache = cache(10, 1);
        let key = put(&cache, "x");
        cache.retrieve(&key, "tester");
        let drained = cache.drain_promotion_candidates();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].key, key);
        assert!(cache.promotion_candidates().is_empty());
        assert!(cache.mark_for_promotion(&key));
        assert!(!cache.mark_for_promotion("gone"));
    }

    #[test]
    fn analyze_patterns_is_read_only() {
        let cache = cache(10, 5);
        let a = cache.store(json!("a"), "fact", HashMap::new(), "ci-1");
        cache.store(json!("b"), "opinion", HashMap::new(), "ci-2");
        cache.retrieve(&a, "ci-3");
        cache.retrieve(&a, "ci-3");

        let before = cache.stats();
        let analysis = cache.analyze_patterns();
        assert_eq!(analysis.total_entries, 2);
        assert_eq!(analysis.total_accesses, 2);
        assert_eq!(analysis.unique_cis, 3);
        assert_eq!(analysis.type_distribution.get("fact"), Some(&1));
        assert_eq!(analysis.hot_entries.len(), 1);
        assert_eq!(analysis.hot_entries[0].key, a);
        assert_eq!(cache.stats(), before);
        assert_eq!(cache.peek(&a).unwrap().access_count, 2);
    }

    #[test]
    fn restore_keeps_most_recent_when_oversized() {
        let source = cache(10, 2);
        let keys: Vec<String> = (0..5).map(|i| put(&source, &format!("item {i}"))).collect();
        let snapshot = source.snapshot();

        let target = cache(3, 2);
        assert_eq!(target.restore(snapshot), 3);
        assert!(!target.contains(&keys[0]));
        assert!(!target.contains(&keys[1]));
        assert!(target.contains(&keys[4]));
    }
}
