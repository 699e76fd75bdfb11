//! Cognitive operations over the cache, the association graph, and the
//! backend fan-out.
//!
//! Thoughts enter the cache with an access count of zero and become durable
//! only through repeated use (see `metabolism`). Recall strengthens: every
//! direct recall is a counted cache access. Traversal (`recall_similar`,
//! `build_context`) reads neighbours without strengthening them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::cache::CacheLayer;
use super::graph::AssociationGraph;
use super::types::{
    CacheEntry, Thought, ThoughtInput, ThoughtRecord, ThoughtType, RECALLED_CONTENT_TYPE,
};
use super::{content_text, keyword_score};
use crate::backend::fanout::BackendFanout;
use crate::backend::synthesizer::{self, Contradiction, SynthesizedMemory};
use crate::config::RecallConfig;
use crate::error::Result;

/// Active contexts older than this are stale.
const CONTEXT_TTL_MINUTES: i64 = 30;

/// Bundle confidence multiplier when backends disagree.
const CONTRADICTION_PENALTY: f64 = 0.8;

// ── Recall results ───────────────────────────────────────────────────────────

/// Where a recalled value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallSource {
    Cache,
    Backends,
}

/// A recalled value. `synthesis` is present when it came from the backends.
#[derive(Debug, Clone, Serialize)]
pub struct Recall {
    pub key: String,
    pub content: Value,
    pub source: RecallSource,
    pub synthesis: Option<SynthesizedMemory>,
}

// ── Active context ───────────────────────────────────────────────────────────

/// Snapshot of the context a caller last built. Owned by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveContext {
    pub id: Uuid,
    pub topic: String,
    pub depth: usize,
    pub thought_count: usize,
    pub built_at: DateTime<Utc>,
}

impl ActiveContext {
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now - self.built_at > chrono::Duration::minutes(CONTEXT_TTL_MINUTES)
    }

    /// Map form recorded on thoughts stored in this context.
    pub fn as_map(&self) -> HashMap<String, Value> {
        HashMap::from([
            ("context_id".to_string(), json!(self.id.to_string())),
            ("topic".to_string(), json!(self.topic)),
            ("depth".to_string(), json!(self.depth)),
            ("built_at".to_string(), json!(self.built_at.to_rfc3339())),
        ])
    }
}

/// Thoughts gathered around a topic.
#[derive(Debug, Clone, Serialize)]
pub struct ContextBundle {
    pub topic: String,
    pub depth: usize,
    /// Seed thoughts that matched the topic directly.
    pub primary: Vec<Thought>,
    pub facts: Vec<Thought>,
    pub opinions: Vec<Thought>,
    pub questions: Vec<Thought>,
    /// Reached by traversal and not a fact, opinion, or question.
    pub associated: Vec<Thought>,
    pub contradictions: Vec<Contradiction>,
    pub confidence: f64,
    pub active: ActiveContext,
}

impl ContextBundle {
    pub fn thought_count(&self) -> usize {
        self.primary.len() + self.associated.len() + self.traversed_buckets()
    }

    fn traversed_buckets(&self) -> usize {
        let primary: HashSet<&str> = self.primary.iter().map(|t| t.key.as_str()).collect();
        self.facts
            .iter()
            .chain(&self.opinions)
            .chain(&self.questions)
            .filter(|t| !primary.contains(t.key.as_str()))
            .count()
    }

    fn push_bucketed(&mut self, thought: Thought) {
        match thought.thought_type {
            ThoughtType::Fact => self.facts.push(thought),
            ThoughtType::Opinion => self.opinions.push(thought),
            ThoughtType::Question => self.questions.push(thought),
            _ => self.associated.push(thought),
        }
    }
}

// ── Cognition ────────────────────────────────────────────────────────────────

pub struct Cognition {
    cache: Arc<CacheLayer>,
    graph: Arc<AssociationGraph>,
    fanout: Arc<BackendFanout>,
    recall: RecallConfig,
}

impl Cognition {
    pub fn new(
        cache: Arc<CacheLayer>,
        graph: Arc<AssociationGraph>,
        fanout: Arc<BackendFanout>,
        recall: RecallConfig,
    ) -> Self {
        // Evicted thoughts leave the graph; a later backend recall relinks them.
        let edges = Arc::clone(&graph);
        cache.set_eviction_hook(Arc::new(move |key: &str| {
            edges.remove(key);
        }));
        Self {
            cache,
            graph,
            fanout,
            recall,
        }
    }

    pub fn graph(&self) -> &AssociationGraph {
        &self.graph
    }

    /// Store a thought in the cache and link its associations both ways.
    pub fn store_thought(&self, input: ThoughtInput, ci_id: &str) -> Result<String> {
        input.validate()?;

        let record = ThoughtRecord {
            content: input.content,
            thought_type: input.thought_type,
            confidence: input.confidence,
            associations: input.associations.iter().cloned().collect(),
            source_ci: ci_id.to_string(),
            context: input.context,
            timestamp: Utc::now(),
        };
        let metadata = HashMap::from([
            ("confidence".to_string(), json!(input.confidence)),
            ("ci".to_string(), json!(ci_id)),
        ]);

        let value = serde_json::to_value(&record)?;
        let key = self
            .cache
            .store(value, input.thought_type.as_str(), metadata, ci_id);
        let linked = self.graph.link_all(&key, &input.associations);

        info!(
            key = %key,
            thought_type = %input.thought_type,
            confidence = input.confidence,
            associations = linked,
            "stored thought"
        );
        Ok(key)
    }

    /// Recall a value by key: cache first (strengthening), then the backends.
    ///
    /// A backend hit is synthesized and warmed back into the cache under the
    /// requested key.
    pub async fn recall_content(&self, key: &str, ci_id: &str) -> Option<Recall> {
        if let Some(entry) = self.cache.retrieve_entry(key, ci_id) {
            return Some(Recall {
                key: key.to_string(),
                content: entry.content,
                source: RecallSource::Cache,
                synthesis: None,
            });
        }

        let responses = self.fanout.recall_from_everywhere(key).await;
        let memory = synthesizer::synthesize(&responses, key).into_memory()?;

        let metadata = HashMap::from([
            ("agreement".to_string(), json!(memory.agreement)),
            ("sources".to_string(), json!(memory.sources)),
            ("confidence".to_string(), json!(memory.confidence)),
        ]);
        self.cache.store_with_key(
            key,
            memory.primary.clone(),
            RECALLED_CONTENT_TYPE,
            metadata,
            ci_id,
        );
        if let Some(record) = ThoughtRecord::decode(&memory.primary) {
            self.graph.link_all(key, &record.associations);
        }
        debug!(key, backends = memory.backend_count, "warmed cache from backends");

        Some(Recall {
            key: key.to_string(),
            content: memory.primary.clone(),
            source: RecallSource::Backends,
            synthesis: Some(memory),
        })
    }

    /// Recall a thought by key. `None` if absent everywhere or not a thought.
    pub async fn recall_thought(&self, key: &str, ci_id: &str) -> Option<Thought> {
        let recall = self.recall_content(key, ci_id).await?;
        self.decode(key, &recall.content)
    }

    /// Thoughts related to `key`: graph neighbours by hop distance first, then
    /// cached thoughts by keyword overlap with `key`'s content.
    ///
    /// Only the anchor is strengthened; results are read without counting. An
    /// anchor missing from the cache is recalled from the backends first.
    pub async fn recall_similar(&self, key: &str, limit: usize, ci_id: &str) -> Vec<Thought> {
        if limit == 0 {
            return Vec::new();
        }
        let anchor = self.recall_content(key, ci_id).await;

        let mut results: Vec<Thought> = self
            .graph
            .bfs(key, self.recall.similar_max_depth)
            .into_iter()
            .filter_map(|(neighbor, _hops)| {
                let entry = self.cache.peek(&neighbor)?;
                self.decode(&neighbor, &entry.content)
            })
            .take(limit)
            .collect();

        if results.len() < limit {
            if let Some(anchor) = anchor {
                let reference = content_text(&anchor.content);
                let mut seen: HashSet<String> = results.iter().map(|t| t.key.clone()).collect();
                seen.insert(key.to_string());

                let mut scored: Vec<(f64, Thought)> = self
                    .cached_thoughts()
                    .into_iter()
                    .filter(|t| !seen.contains(&t.key))
                    .filter_map(|t| {
                        let score = keyword_score(&reference, &t.text())
                            .max(keyword_score(&t.text(), &reference));
                        (score >= self.recall.keyword_threshold).then_some((score, t))
                    })
                    .collect();
                scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.key.cmp(&b.1.key)));
                results.extend(scored.into_iter().map(|(_, t)| t));
            }
        }

        results.truncate(limit);
        results
    }

    /// Record `ci_id`'s interest in `key`. Returns whether the key was resident.
    pub fn strengthen_memory(&self, key: &str, ci_id: &str) -> bool {
        let resident = self.cache.retrieve_entry(key, ci_id).is_some();
        if resident {
            debug!(key, ci = ci_id, "strengthened memory");
        }
        resident
    }

    /// Gather thoughts around `topic`.
    ///
    /// Seeds are cached thoughts matching the topic plus thoughts the backends
    /// return for it. Seeds are then expanded through the association graph
    /// up to `depth` hops, and everything found is bucketed by thought type.
    pub async fn build_context(&self, topic: &str, depth: usize, ci_id: &str) -> ContextBundle {
        let mut bundle = ContextBundle {
            topic: topic.to_string(),
            depth,
            primary: Vec::new(),
            facts: Vec::new(),
            opinions: Vec::new(),
            questions: Vec::new(),
            associated: Vec::new(),
            contradictions: Vec::new(),
            confidence: 1.0,
            active: ActiveContext {
                id: Uuid::now_v7(),
                topic: topic.to_string(),
                depth,
                thought_count: 0,
                built_at: Utc::now(),
            },
        };

        // 1. Cache seeds by keyword match
        let mut scored: Vec<(f64, String)> = self
            .cached_thoughts()
            .into_iter()
            .filter_map(|t| {
                let score = keyword_score(topic, &t.text());
                (score >= self.recall.keyword_threshold).then_some((score, t.key))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        let mut seeds: Vec<String> = scored
            .into_iter()
            .map(|(_, key)| key)
            .take(self.recall.context_max_seeds)
            .collect();

        // 2. Backend seeds; disagreement lowers confidence
        let responses = self.fanout.search_everywhere(topic).await;
        if let Some(memory) = synthesizer::synthesize(&responses, topic).into_memory() {
            if !memory.contradictions.is_empty() {
                bundle.confidence *= CONTRADICTION_PENALTY;
                bundle.contradictions = memory.contradictions;
            }
        }
        for key in responses.iter().filter_map(|r| r.key()) {
            if seeds.len() >= self.recall.context_max_seeds {
                break;
            }
            if !seeds.iter().any(|s| s == key) {
                seeds.push(key.to_string());
            }
        }

        // 3. Recall seeds
        let mut visited: HashSet<String> = HashSet::new();
        for key in &seeds {
            if !visited.insert(key.clone()) {
                continue;
            }
            if let Some(thought) = self.recall_thought(key, ci_id).await {
                if matches!(
                    thought.thought_type,
                    ThoughtType::Fact | ThoughtType::Opinion | ThoughtType::Question
                ) {
                    bundle.push_bucketed(thought.clone());
                }
                bundle.primary.push(thought);
            }
        }

        // 4. Traverse associations
        let primary_keys: Vec<String> = bundle.primary.iter().map(|t| t.key.clone()).collect();
        for seed in &primary_keys {
            for (key, _hops) in self.graph.bfs(seed, depth) {
                if !visited.insert(key.clone()) {
                    continue;
                }
                if let Some(thought) = self.read_thought(&key, ci_id).await {
                    bundle.push_bucketed(thought);
                }
            }
        }

        bundle.active.thought_count = bundle.thought_count();
        info!(
            topic,
            depth,
            thoughts = bundle.active.thought_count,
            confidence = bundle.confidence,
            "built context"
        );
        bundle
    }

    /// Drop every entry last accessed more than `older_than` ago, along with
    /// its associations and promotion candidacy. Returns the number forgotten.
    pub fn forget_naturally(&self, older_than: chrono::Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        let forgotten = self.cache.forget_before(cutoff);
        let edges = self.graph.remove_all(&forgotten);
        if !forgotten.is_empty() {
            info!(forgotten = forgotten.len(), edges, "naturally forgot old thoughts");
        }
        forgotten.len()
    }

    /// Rebuild the graph from the association lists recorded in cached thoughts.
    pub fn rebuild_associations(&self) -> usize {
        let mut linked = 0;
        for entry in self.cache.entries_where(|_| true) {
            if let Some(record) = ThoughtRecord::decode(&entry.content) {
                linked += self.graph.link_all(&entry.key, &record.associations);
            }
        }
        debug!(linked, "rebuilt associations");
        linked
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    /// Read a thought without strengthening it. Non-resident keys fall back
    /// to the backends, which warms the cache at zero accesses.
    async fn read_thought(&self, key: &str, ci_id: &str) -> Option<Thought> {
        match self.cache.peek(key) {
            Some(entry) => self.decode(key, &entry.content),
            None => self.recall_thought(key, ci_id).await,
        }
    }

    fn decode(&self, key: &str, content: &Value) -> Option<Thought> {
        let record = ThoughtRecord::decode(content)?;
        let mut thought = Thought::from_record(key, record);
        thought.associations = self.graph.neighbors(key);
        Some(thought)
    }

    /// Every resident entry that decodes as a thought, most recent first.
    fn cached_thoughts(&self) -> Vec<Thought> {
        self.cache
            .entries_where(|_| true)
            .into_iter()
            .filter_map(|entry: CacheEntry| self.decode(&entry.key, &entry.content))
            .collect()
    }
}
