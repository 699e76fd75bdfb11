//! Concurrent fan-out across every configured backend.
//!
//! Each operation issues one call per backend, bounds each call with its own
//! timeout, and joins them. A backend error, including a panic or a timeout,
//! only removes that backend's contribution: stores report `false`, reads drop
//! the response.

use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::{BackendAdapter, BackendKind, MemoryResponse};
use crate::config::FanoutConfig;
use crate::error::{Error, Result};

/// Per-backend outcome of a `store_everywhere`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreReport {
    pub key: String,
    pub results: BTreeMap<String, bool>,
}

impl StoreReport {
    /// At least one backend accepted the write.
    pub fn is_durable(&self) -> bool {
        self.results.values().any(|ok| *ok)
    }

    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|ok| **ok).count()
    }
}

#[derive(Default)]
struct HealthCounters {
    stores: AtomicU64,
    store_failures: AtomicU64,
    recalls: AtomicU64,
    recall_errors: AtomicU64,
    recall_timeouts: AtomicU64,
}

/// Health snapshot for one backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendHealth {
    pub name: String,
    pub kind: BackendKind,
    pub stores: u64,
    pub store_failures: u64,
    pub recalls: u64,
    pub recall_errors: u64,
    pub recall_timeouts: u64,
    /// Fraction of stores that succeeded; 1.0 before the first store.
    pub store_success_rate: f64,
}

/// How a single bounded call ended.
enum Outcome<T> {
    Done(T),
    Failed(Error),
    Panicked(String),
    TimedOut,
}

/// Run one adapter call under `limit`, catching a panic inside the adapter.
async fn bounded<T>(
    limit: Duration,
    call: impl std::future::Future<Output = Result<T>>,
) -> Outcome<T> {
    match timeout(limit, AssertUnwindSafe(call).catch_unwind()).await {
        Ok(Ok(Ok(value))) => Outcome::Done(value),
        Ok(Ok(Err(e))) => Outcome::Failed(e),
        Ok(Err(payload)) => Outcome::Panicked(panic_message(payload.as_ref())),
        Err(_) => Outcome::TimedOut,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct BackendFanout {
    backends: Vec<Arc<dyn BackendAdapter>>,
    health: HashMap<String, HealthCounters>,
    recall_timeout: Duration,
    store_timeout: Duration,
    namespace: String,
}

impl BackendFanout {
    /// Backend names must be unique; results are keyed by name.
    pub fn new(backends: Vec<Arc<dyn BackendAdapter>>, config: &FanoutConfig) -> Result<Self> {
        let mut seen = HashSet::new();
        for backend in &backends {
            if !seen.insert(backend.name().to_string()) {
                return Err(Error::Config(format!(
                    "duplicate backend name: {}",
                    backend.name()
                )));
            }
        }
        let health = backends
            .iter()
            .map(|b| (b.name().to_string(), HealthCounters::default()))
            .collect();

        Ok(Self {
            backends,
            health,
            recall_timeout: config.recall_timeout(),
            store_timeout: config.store_timeout(),
            namespace: config.namespace.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn recall_timeout(&self) -> Duration {
        self.recall_timeout
    }

    fn counters(&self, name: &str) -> Option<&HealthCounters> {
        self.health.get(name)
    }

    /// Write to every backend concurrently. Never fails; each backend's
    /// outcome is recorded in the report.
    pub async fn store_everywhere(
        &self,
        key: &str,
        content: &Value,
        metadata: &HashMap<String, Value>,
    ) -> StoreReport {
        let mut opts = metadata.clone();
        opts.insert("namespace".into(), Value::String(self.namespace.clone()));
        opts.insert("key".into(), Value::String(key.to_string()));
        let opts = &opts;

        let calls = self.backends.iter().map(|backend| async move {
            let name = backend.name().to_string();
            let ok = match bounded(self.store_timeout, backend.store(key, content, opts)).await {
                Outcome::Done(true) => true,
                Outcome::Done(false) => {
                    warn!(backend = %name, key, "backend declined store");
                    false
                }
                Outcome::Failed(e) => {
                    warn!(backend = %name, key, error = %e, "backend store failed");
                    false
                }
                Outcome::Panicked(message) => {
                    error!(backend = %name, key, panic = %message, "backend store panicked");
                    false
                }
                Outcome::TimedOut => {
                    warn!(
                        backend = %name,
                        key,
                        timeout_ms = self.store_timeout.as_millis() as u64,
                        "backend store timed out"
                    );
                    false
                }
            };
            if let Some(counters) = self.counters(&name) {
                counters.stores.fetch_add(1, Ordering::Relaxed);
                if !ok {
                    counters.store_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
            (name, ok)
        });

        let results: BTreeMap<String, bool> = join_all(calls).await.into_iter().collect();
        let report = StoreReport {
            key: key.to_string(),
            results,
        };
        debug!(
            key,
            succeeded = report.succeeded(),
            backends = report.results.len(),
            "store fan-out complete"
        );
        report
    }

    /// Read `key` from every backend concurrently, each bounded by the recall
    /// timeout. Backends that miss, fail, or time out contribute nothing.
    pub async fn recall_from_everywhere(&self, key: &str) -> Vec<MemoryResponse> {
        let calls = self.backends.iter().map(|backend| async move {
            let name = backend.name();
            let counters = self.counters(name);
            if let Some(counters) = counters {
                counters.recalls.fetch_add(1, Ordering::Relaxed);
            }

            let started = Instant::now();
            match bounded(self.recall_timeout, backend.retrieve(key)).await {
                Outcome::Done(Some(mut response)) => {
                    response.source_backend = name.to_string();
                    response.retrieval_time = started.elapsed();
                    Some(response)
                }
                Outcome::Done(None) => None,
                Outcome::Failed(e) => {
                    warn!(backend = %name, key, error = %e, "backend recall failed");
                    if let Some(counters) = counters {
                        counters.recall_errors.fetch_add(1, Ordering::Relaxed);
                    }
                    None
                }
                Outcome::Panicked(message) => {
                    error!(backend = %name, key, panic = %message, "backend recall panicked");
                    if let Some(counters) = counters {
                        counters.recall_errors.fetch_add(1, Ordering::Relaxed);
                    }
                    None
                }
                Outcome::TimedOut => {
                    warn!(backend = %name, key, "backend recall timed out");
                    if let Some(counters) = counters {
                        counters.recall_timeouts.fetch_add(1, Ordering::Relaxed);
                    }
                    None
                }
            }
        });

        let responses: Vec<MemoryResponse> = join_all(calls).await.into_iter().flatten().collect();
        debug!(key, responses = responses.len(), "recall fan-out complete");
        responses
    }

    /// Search every backend concurrently with the same timeout semantics as recall.
    pub async fn search_everywhere(&self, query: &str) -> Vec<MemoryResponse> {
        let calls = self.backends.iter().map(|backend| async move {
            let name = backend.name();
            let started = Instant::now();
            match bounded(self.recall_timeout, backend.search(query)).await {
                Outcome::Done(mut hits) => {
                    let elapsed = started.elapsed();
                    for hit in &mut hits {
                        hit.source_backend = name.to_string();
                        hit.retrieval_time = elapsed;
                    }
                    hits
                }
                Outcome::Failed(e) => {
                    warn!(backend = %name, error = %e, "backend search failed");
                    Vec::new()
                }
                Outcome::Panicked(message) => {
                    error!(backend = %name, panic = %message, "backend search panicked");
                    Vec::new()
                }
                Outcome::TimedOut => {
                    warn!(backend = %name, "backend search timed out");
                    Vec::new()
                }
            }
        });

        join_all(calls).await.into_iter().flatten().collect()
    }

    /// Health counters for every backend, in configuration order.
    pub fn health(&self) -> Vec<BackendHealth> {
        self.backends
            .iter()
            .filter_map(|backend| {
                let counters = self.counters(backend.name())?;
                let stores = counters.stores.load(Ordering::Relaxed);
                let store_failures = counters.store_failures.load(Ordering::Relaxed);
                let store_success_rate = if stores == 0 {
                    1.0
                } else {
                    (stores - store_failures) as f64 / stores as f64
                };
                Some(BackendHealth {
                    name: backend.name().to_string(),
                    kind: backend.kind(),
                    stores,
                    store_failures,
                    recalls: counters.recalls.load(Ordering::Relaxed),
                    recall_errors: counters.recall_errors.load(Ordering::Relaxed),
                    recall_timeouts: counters.recall_timeouts.load(Ordering::Relaxed),
                    store_success_rate,
                })
            })
            .collect()
    }
}
