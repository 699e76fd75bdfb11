#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use esr::backend::in_memory::InMemoryBackend;
use esr::backend::{BackendAdapter, BackendKind, MemoryResponse};
use esr::config::EsrConfig;
use esr::memory::cache::{CacheLayer, CacheSnapshot};
use esr::{EsrMemorySystem, ThoughtInput, ThoughtType};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How a scripted backend behaves.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    Healthy,
    /// Every call returns an error.
    Failing,
    /// Every call sleeps first, then behaves normally.
    Sleeping(Duration),
    /// Every call panics.
    Panicking,
}

/// Backend adapter with scripted failure modes and optional fixed answers.
pub struct ScriptedBackend {
    name: String,
    script: Script,
    inner: InMemoryBackend,
    fixed: HashMap<String, (Value, f64)>,
    store_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(name: &str, script: Script) -> Self {
        Self {
            name: name.to_string(),
            script,
            inner: InMemoryBackend::new(name, BackendKind::KeyValue),
            fixed: HashMap::new(),
            store_calls: AtomicUsize::new(0),
        }
    }

    pub fn healthy(name: &str) -> Arc<Self> {
        Arc::new(Self::new(name, Script::Healthy))
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self::new(name, Script::Failing))
    }

    pub fn sleeping(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self::new(name, Script::Sleeping(delay)))
    }

    pub fn panicking(name: &str) -> Arc<Self> {
        Arc::new(Self::new(name, Script::Panicking))
    }

    /// Answer `key` (and matching searches) with `content` at `confidence`.
    pub fn with_entry(mut self, key: &str, content: Value, confidence: f64) -> Self {
        self.fixed.insert(key.to_string(), (content, confidence));
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains(key) || self.fixed.contains_key(key)
    }

    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }

    async fn before_call(&self) -> esr::Result<()> {
        match self.script {
            Script::Failing => Err(esr::Error::backend(&self.name, "scripted failure")),
            Script::Sleeping(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Script::Panicking => panic!("scripted panic in {}", self.name),
            Script::Healthy => Ok(()),
        }
    }
}

#[async_trait]
impl BackendAdapter for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    async fn store(
        &self,
        key: &str,
        value: &Value,
        opts: &HashMap<String, Value>,
    ) -> esr::Result<bool> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        self.inner.store(key, value, opts).await
    }

    async fn retrieve(&self, key: &str) -> esr::Result<Option<MemoryResponse>> {
        self.before_call().await?;
        if let Some((content, confidence)) = self.fixed.get(key) {
            return Ok(Some(
                MemoryResponse::new(content.clone(), *confidence).with_metadata("key", key),
            ));
        }
        self.inner.retrieve(key).await
    }

    async fn search(&self, query: &str) -> esr::Result<Vec<MemoryResponse>> {
        self.before_call().await?;
        let mut hits: Vec<MemoryResponse> = self
            .fixed
            .iter()
            .filter(|(_, (content, _))| {
                esr::memory::keyword_score(query, &esr::memory::content_text(content)) > 0.0
            })
            .map(|(key, (content, confidence))| {
                MemoryResponse::new(content.clone(), *confidence).with_metadata("key", key.as_str())
            })
            .collect();
        hits.extend(self.inner.search(query).await?);
        Ok(hits)
    }
}

/// Erase the concrete type for handing backends to the system.
pub fn adapters(backends: &[Arc<ScriptedBackend>]) -> Vec<Arc<dyn BackendAdapter>> {
    backends
        .iter()
        .map(|b| Arc::clone(b) as Arc<dyn BackendAdapter>)
        .collect()
}

/// Small, fast config: no persistence, short timeouts.
pub fn test_config() -> EsrConfig {
    let mut config = EsrConfig::default();
    config.cache.max_size = 1_000;
    config.cache.persist_cache = false;
    config.fanout.recall_timeout_ms = 1_000;
    config.fanout.store_timeout_ms = 1_000;
    config
}

/// Config that persists the cache snapshot under `dir`.
pub fn persistent_config(dir: &Path) -> EsrConfig {
    let mut config = test_config();
    config.cache.persist_cache = true;
    config.cache.cache_file = dir.join("cache.json").to_string_lossy().into_owned();
    config
}

pub async fn test_system(backends: &[Arc<ScriptedBackend>]) -> EsrMemorySystem {
    EsrMemorySystem::new(test_config(), adapters(backends))
        .await
        .unwrap()
}

/// Store a thought as CI "tester". Returns its key.
pub fn think(
    system: &EsrMemorySystem,
    content: &str,
    thought_type: ThoughtType,
    associations: &[&str],
) -> String {
    let input = ThoughtInput::new(content, thought_type)
        .unwrap()
        .associations(associations.iter().copied());
    system.store_thought(input, "tester").unwrap()
}

/// Pretend `key` was last accessed `age` ago.
pub fn backdate(cache: &CacheLayer, key: &str, age: chrono::Duration) {
    let mut entry = cache.peek(key).expect("entry to backdate must be resident");
    let at = Utc::now() - age;
    entry.last_access = at;
    entry.created_at = entry.created_at.min(at);
    cache.restore(CacheSnapshot {
        saved_at: Utc::now(),
        entries: vec![entry],
        promotion_candidates: cache.promotion_candidates(),
    });
}
