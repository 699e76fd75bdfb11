//! The assembled memory system.
//!
//! [`EsrMemorySystem`] owns one cache, one association graph, one backend
//! fan-out and one metabolism scheduler. Construct it once and share it by
//! `Arc`; every method takes `&self`.

use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::fanout::{BackendFanout, BackendHealth};
use crate::backend::{create_backends, BackendAdapter};
use crate::config::EsrConfig;
use crate::error::Result;
use crate::memory::cache::CacheLayer;
use crate::memory::cognitive::{Cognition, ContextBundle, Recall};
use crate::memory::graph::AssociationGraph;
use crate::memory::metabolism::{MetabolismScheduler, MetabolismStats, SweepReport};
use crate::memory::stats::{MemoryStats, PatternAnalysis};
use crate::memory::types::{CacheEntry, Thought, ThoughtInput};
use crate::memory::{content_text, keyword_score, persist};

/// Source label for search hits served from the cache.
pub const CACHE_SOURCE: &str = "cache";

/// One search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub key: Option<String>,
    pub content: Value,
    pub score: f64,
    /// `"cache"` or the backend name.
    pub source: String,
}

pub struct EsrMemorySystem {
    config: EsrConfig,
    cache: Arc<CacheLayer>,
    fanout: Arc<BackendFanout>,
    cognition: Arc<Cognition>,
    metabolism: MetabolismScheduler,
    promotions: Arc<AtomicU64>,
}

impl EsrMemorySystem {
    /// Build a system over explicit backend adapters.
    ///
    /// With `persist_cache` on, the cache snapshot is loaded (if present) and
    /// the association graph rebuilt from it. An unreadable snapshot is logged
    /// and the cache starts empty.
    pub async fn new(config: EsrConfig, backends: Vec<Arc<dyn BackendAdapter>>) -> Result<Self> {
        let cache = Arc::new(CacheLayer::from_config(&config.cache)?);
        let fanout = Arc::new(BackendFanout::new(backends, &config.fanout)?);
        let cognition = Arc::new(Cognition::new(
            Arc::clone(&cache),
            Arc::new(AssociationGraph::new()),
            Arc::clone(&fanout),
            config.recall.clone(),
        ));

        if config.cache.persist_cache {
            let path = config.resolved_cache_file();
            match persist::load_snapshot(&path).await {
                Ok(Some(snapshot)) => {
                    let restored = cache.restore(snapshot);
                    let linked = cognition.rebuild_associations();
                    info!(path = %path.display(), restored, linked, "restored cache snapshot");
                }
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "ignoring unreadable cache snapshot"),
            }
        }

        let promotions = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&promotions);
        cache.set_promotion_hook(Arc::new(move |entry: &CacheEntry| {
            let total = counter.fetch_add(1, Ordering::Relaxed) + 1;
            info!(
                key = %entry.key,
                content_type = %entry.content_type,
                accesses = entry.access_count,
                total,
                "promotion candidate"
            );
        }));

        let metabolism = MetabolismScheduler::new(
            Arc::clone(&cache),
            Arc::clone(&fanout),
            Arc::clone(&cognition),
            config.metabolism.interval(),
            config.metabolism.forget_after(),
        )?;

        info!(
            backends = fanout.len(),
            max_size = cache.max_size(),
            promotion_threshold = cache.promotion_threshold(),
            "memory system ready"
        );

        Ok(Self {
            config,
            cache,
            fanout,
            cognition,
            metabolism,
            promotions,
        })
    }

    /// Build a system with backends created from `config.backends`.
    pub async fn from_config(config: EsrConfig) -> Result<Self> {
        let backends = create_backends(&config.backends)?;
        Self::new(config, backends).await
    }

    pub fn config(&self) -> &EsrConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn fanout(&self) -> &BackendFanout {
        &self.fanout
    }

    // ── Plain memory ─────────────────────────────────────────────────────────

    /// Store arbitrary content in the cache. Returns its content-addressed key.
    pub fn store(
        &self,
        content: Value,
        content_type: &str,
        metadata: HashMap<String, Value>,
        ci_id: &str,
    ) -> String {
        self.cache.store(content, content_type, metadata, ci_id)
    }

    /// Cache first; on miss, recall from every backend, synthesize, and warm
    /// the cache. `None` when nothing anywhere knows the key.
    pub async fn recall(&self, key: &str, ci_id: &str) -> Option<Recall> {
        self.cognition.recall_content(key, ci_id).await
    }

    /// Keyword search over the cache, then every backend. Results are
    /// deduplicated by key (or content when a backend reports no key) and
    /// truncated to `limit`. Cache hits are not counted as accesses.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        if limit == 0 {
            return Vec::new();
        }
        let threshold = self.config.recall.keyword_threshold;

        let mut hits: Vec<SearchHit> = self
            .cache
            .entries_where(|_| true)
            .into_iter()
            .filter_map(|entry| {
                let score = keyword_score(query, &content_text(&entry.content));
                (score >= threshold).then(|| SearchHit {
                    key: Some(entry.key),
                    content: entry.content,
                    score,
                    source: CACHE_SOURCE.to_string(),
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));

        if hits.len() < limit {
            let mut backend_hits: Vec<SearchHit> = self
                .fanout
                .search_everywhere(query)
                .await
                .into_iter()
                .map(|response| SearchHit {
                    key: response.key().map(str::to_string),
                    score: response.confidence,
                    source: response.source_backend,
                    content: response.content,
                })
                .collect();
            backend_hits.sort_by(|a, b| b.score.total_cmp(&a.score));
            hits.extend(backend_hits);
        }

        let mut seen_keys = HashSet::new();
        let mut seen_contents = HashSet::new();
        hits.retain(|hit| match &hit.key {
            Some(key) => seen_keys.insert(key.clone()),
            None => seen_contents.insert(hit.content.to_string()),
        });
        hits.truncate(limit);
        hits
    }

    // ── Cognitive operations ─────────────────────────────────────────────────

    pub fn store_thought(&self, input: ThoughtInput, ci_id: &str) -> Result<String> {
        self.cognition.store_thought(input, ci_id)
    }

    pub async fn recall_thought(&self, key: &str, ci_id: &str) -> Option<Thought> {
        self.cognition.recall_thought(key, ci_id).await
    }

    pub async fn recall_similar(&self, key: &str, limit: usize, ci_id: &str) -> Vec<Thought> {
        self.cognition.recall_similar(key, limit, ci_id).await
    }

    pub fn strengthen_memory(&self, key: &str, ci_id: &str) -> bool {
        self.cognition.strengthen_memory(key, ci_id)
    }

    pub async fn build_context(&self, topic: &str, depth: usize, ci_id: &str) -> ContextBundle {
        self.cognition.build_context(topic, depth, ci_id).await
    }

    pub fn forget_naturally(&self, older_than: chrono::Duration) -> usize {
        self.cognition.forget_naturally(older_than)
    }

    pub fn associations(&self, key: &str) -> std::collections::BTreeSet<String> {
        self.cognition.graph().neighbors(key)
    }

    // ── Stats ────────────────────────────────────────────────────────────────

    pub fn analyze_patterns(&self) -> PatternAnalysis {
        self.cache.analyze_patterns()
    }

    pub fn memory_stats(&self) -> MemoryStats {
        let graph = self.cognition.graph();
        MemoryStats {
            cache_size: self.cache.len(),
            thought_chains: graph.thought_chains(),
            total_associations: graph.total_associations(),
            metabolism_running: self.metabolism.is_running(),
        }
    }

    pub fn backend_health(&self) -> Vec<BackendHealth> {
        self.fanout.health()
    }

    pub fn metabolism_stats(&self) -> MetabolismStats {
        self.metabolism.stats()
    }

    /// Promotion candidates observed by the hook since construction.
    pub fn promotions_observed(&self) -> u64 {
        self.promotions.load(Ordering::Relaxed)
    }

    // ── Metabolism ───────────────────────────────────────────────────────────

    /// Start the background sweep. No-op (returns `false`) when metabolism is
    /// disabled in config or already running.
    pub async fn start_metabolism(&self) -> bool {
        if !self.config.metabolism.enabled {
            info!("metabolism disabled in config, not starting");
            return false;
        }
        self.metabolism.start().await
    }

    pub async fn stop_metabolism(&self) -> bool {
        self.metabolism.stop().await
    }

    pub fn is_metabolism_running(&self) -> bool {
        self.metabolism.is_running()
    }

    pub async fn run_metabolism_once(&self) -> SweepReport {
        self.metabolism.run_once().await
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Write the cache snapshot to the configured file.
    pub async fn save_snapshot(&self) -> Result<()> {
        let path = self.config.resolved_cache_file();
        persist::save_snapshot(&path, &self.cache.snapshot()).await
    }

    /// Stop metabolism and, with `persist_cache` on, persist the cache.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_metabolism().await;
        if self.config.cache.persist_cache {
            self.save_snapshot().await?;
            info!(entries = self.cache.len(), "cache snapshot saved");
        }
        Ok(())
    }
}
