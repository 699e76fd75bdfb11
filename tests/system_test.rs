mod helpers;

use esr::memory::cognitive::RecallSource;
use esr::system::CACHE_SOURCE;
use esr::{EsrConfig, EsrMemorySystem, ThoughtType};
use helpers::{test_config, test_system, think, Script, ScriptedBackend};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::test]
async fn recall_prefers_cache() {
    let system = test_system(&[ScriptedBackend::healthy("kv")]).await;
    let key = system.store(json!({"note": "cached"}), "note", HashMap::new(), "apollo");

    let recall = system.recall(&key, "athena").await.unwrap();
    assert_eq!(recall.source, RecallSource::Cache);
    assert!(recall.synthesis.is_none());
    let entry = system.cache().peek(&key).unwrap();
    assert!(entry.ci_sources.contains("apollo") && entry.ci_sources.contains("athena"));
}

#[tokio::test]
async fn recall_miss_everywhere_is_none() {
    let system = test_system(&[ScriptedBackend::healthy("kv")]).await;
    assert!(system.recall("unknown", "tester").await.is_none());
}

#[tokio::test]
async fn recall_synthesizes_backend_answers_and_warms_cache() {
    let backends = [
        Arc::new(ScriptedBackend::new("a", Script::Healthy).with_entry("k", json!("blue"), 0.6)),
        Arc::new(ScriptedBackend::new("b", Script::Healthy).with_entry("k", json!("blue"), 0.6)),
        Arc::new(ScriptedBackend::new("c", Script::Healthy).with_entry("k", json!("green"), 0.9)),
        ScriptedBackend::failing("d"),
    ];
    let system = test_system(&backends).await;

    let recall = system.recall("k", "tester").await.unwrap();
    assert_eq!(recall.source, RecallSource::Backends);
    assert_eq!(recall.content, json!("blue"));
    let synthesis = recall.synthesis.unwrap();
    assert_eq!(synthesis.response_count, 3);
    assert!(synthesis.summary.contains("2 of 3 backends agree"));

    assert_eq!(system.cache().peek("k").unwrap().content, json!("blue"));
    let again = system.recall("k", "tester").await.unwrap();
    assert_eq!(again.source, RecallSource::Cache);
}

#[tokio::test]
async fn search_merges_cache_and_backends() {
    let backends = [Arc::new(
        ScriptedBackend::new("docs", Script::Healthy)
            .with_entry("remote", json!("tokio runtime internals"), 0.7),
    )];
    let system = test_system(&backends).await;
    let local = system.store(json!("tokio runtime"), "note", HashMap::new(), "tester");

    let hits = system.search("tokio runtime", 10).await;
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].key.as_deref(), Some(local.as_str()));
    assert_eq!(hits[0].source, CACHE_SOURCE);
    assert_eq!(hits[0].score, 1.0);
    assert_eq!(hits[1].key.as_deref(), Some("remote"));
    assert_eq!(hits[1].source, "docs");

    // Searching is not an access.
    assert_eq!(system.cache().peek(&local).unwrap().access_count, 0);
}

#[tokio::test]
async fn search_deduplicates_promoted_keys() {
    let backends = [ScriptedBackend::healthy("kv")];
    let system = test_system(&backends).await;
    let key = system.store(json!("shared knowledge"), "note", HashMap::new(), "tester");
    system
        .fanout()
        .store_everywhere(&key, &json!("shared knowledge"), &HashMap::new())
        .await;

    let hits = system.search("shared", 10).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source, CACHE_SOURCE);
}

#[tokio::test]
async fn promotion_flows_end_to_end() {
    let backends = [ScriptedBackend::healthy("kv"), ScriptedBackend::failing("flaky")];
    let system = test_system(&backends).await;
    let key = think(&system, "use it or lose it", ThoughtType::Idea, &[]);

    system.recall(&key, "tester").await;
    system.recall(&key, "tester").await;
    assert_eq!(system.promotions_observed(), 1);
    assert_eq!(system.analyze_patterns().promotion_pending, 1);

    let report = system.run_metabolism_once().await;
    assert_eq!(report.promoted, 1);
    assert!(backends[0].contains(&key));

    let health = system.backend_health();
    let flaky = health.iter().find(|h| h.name == "flaky").unwrap();
    assert_eq!(flaky.store_failures, 1);
}

#[tokio::test]
async fn construction_rejects_bad_config() {
    let mut config = EsrConfig::default();
    config.cache.eviction_policy = "fifo".into();
    assert!(EsrMemorySystem::from_config(config).await.is_err());

    let mut config = EsrConfig::default();
    config.backends[0].provider = "cassandra".into();
    let err = EsrMemorySystem::from_config(config).await.err().unwrap();
    assert!(err.to_string().contains("cassandra"));

    let config = test_config();
    let duplicate = [ScriptedBackend::healthy("same"), ScriptedBackend::healthy("same")];
    assert!(EsrMemorySystem::new(config, helpers::adapters(&duplicate)).await.is_err());
}
