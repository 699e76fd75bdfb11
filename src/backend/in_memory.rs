//! In-process backend adapter.
//!
//! Stores values in a map and answers searches by keyword overlap. It can
//! impersonate any backend family, which keeps the engine usable end to end
//! without external services.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

use super::{BackendAdapter, BackendKind, MemoryResponse};
use crate::error::Result;
use crate::memory::{content_text, keyword_score};

/// Minimum keyword score for a search hit.
const SEARCH_THRESHOLD: f64 = 0.1;

struct StoredValue {
    value: Value,
    opts: HashMap<String, Value>,
}

pub struct InMemoryBackend {
    name: String,
    kind: BackendKind,
    values: RwLock<HashMap<String, StoredValue>>,
}

impl InMemoryBackend {
    pub fn new(name: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            kind,
            values: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }
}

#[async_trait]
impl BackendAdapter for InMemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn store(&self, key: &str, value: &Value, opts: &HashMap<String, Value>) -> Result<bool> {
        self.values.write().insert(
            key.to_string(),
            StoredValue {
                value: value.clone(),
                opts: opts.clone(),
            },
        );
        Ok(true)
    }

    async fn retrieve(&self, key: &str) -> Result<Option<MemoryResponse>> {
        let values = self.values.read();
        Ok(values.get(key).map(|stored| {
            let mut response = MemoryResponse::new(stored.value.clone(), 1.0)
                .with_metadata("key", key);
            response.metadata.extend(stored.opts.clone());
            response
        }))
    }

    async fn search(&self, query: &str) -> Result<Vec<MemoryResponse>> {
        let values = self.values.read();
        let mut hits: Vec<(String, f64, Value)> = values
            .iter()
            .filter_map(|(key, stored)| {
                let score = keyword_score(query, &content_text(&stored.value));
                (score >= SEARCH_THRESHOLD).then(|| (key.clone(), score, stored.value.clone()))
            })
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Ok(hits
            .into_iter()
            .map(|(key, score, value)| MemoryResponse::new(value, score).with_metadata("key", key))
            .collect())
    }
}
