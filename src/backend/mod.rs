//! Durable storage backends.
//!
//! Provides the [`BackendAdapter`] trait that every backend family implements,
//! the [`fanout::BackendFanout`] that writes to and reads from all of them
//! concurrently, and the [`synthesizer`] that reconciles their answers.
//! Adapters are created via [`create_backend`] from configuration.

pub mod fanout;
pub mod in_memory;
pub mod synthesizer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::BackendConfig;
use crate::error::{Error, Result};

/// Backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Relational,
    Document,
    KeyValue,
    Cache,
    Vector,
    Graph,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::Document => "document",
            Self::KeyValue => "key_value",
            Self::Cache => "cache",
            Self::Vector => "vector",
            Self::Graph => "graph",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One backend's answer to a retrieve or search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryResponse {
    pub content: Value,
    /// Stamped by the fan-out with the adapter's name.
    pub source_backend: String,
    /// Stamped by the fan-out with the measured call duration.
    pub retrieval_time: Duration,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl MemoryResponse {
    pub fn new(content: Value, confidence: f64) -> Self {
        Self {
            content,
            source_backend: String::new(),
            retrieval_time: Duration::ZERO,
            confidence,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Memory key this response was stored under, when the adapter reports it.
    pub fn key(&self) -> Option<&str> {
        self.metadata.get("key").and_then(Value::as_str)
    }
}

/// Capability contract for a durable backend.
///
/// Failures are returned as errors; the fan-out isolates them per backend, so
/// an adapter never needs to swallow its own errors.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Unique name within a system instance.
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Persist `value` under `key`. `Ok(false)` means the backend declined.
    async fn store(&self, key: &str, value: &Value, opts: &HashMap<String, Value>)
        -> Result<bool>;

    /// Fetch the value stored under `key`, if any.
    async fn retrieve(&self, key: &str) -> Result<Option<MemoryResponse>>;

    /// Free-text search. Results carry their key in `metadata["key"]`.
    async fn search(&self, query: &str) -> Result<Vec<MemoryResponse>>;
}

/// Create a backend adapter from config.
///
/// Currently only `"memory"` is supported (in-process store for any family).
pub fn create_backend(config: &BackendConfig) -> Result<Arc<dyn BackendAdapter>> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(in_memory::InMemoryBackend::new(
            config.name.clone(),
            config.kind,
        ))),
        other => Err(Error::Config(format!(
            "unknown backend provider for '{}': {other}. Supported: memory",
            config.name
        ))),
    }
}

/// Create every configured backend, failing on the first bad entry.
pub fn create_backends(configs: &[BackendConfig]) -> Result<Vec<Arc<dyn BackendAdapter>>> {
    configs.iter().map(create_backend).collect()
}
