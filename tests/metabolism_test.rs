mod helpers;

use esr::backend::fanout::BackendFanout;
use esr::config::{FanoutConfig, RecallConfig};
use esr::memory::cache::CacheLayer;
use esr::memory::cognitive::Cognition;
use esr::memory::graph::AssociationGraph;
use esr::memory::metabolism::MetabolismScheduler;
use esr::{EsrMemorySystem, ThoughtType};
use helpers::{adapters, backdate, test_config, test_system, think, ScriptedBackend};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A scheduler wired directly to `backends`, ticking every `interval`.
fn scheduler(
    backends: &[Arc<ScriptedBackend>],
    interval: Duration,
) -> (MetabolismScheduler, Arc<CacheLayer>) {
    let cache = Arc::new(CacheLayer::new(100, 2).unwrap());
    let fanout = Arc::new(BackendFanout::new(adapters(backends), &FanoutConfig::default()).unwrap());
    let cognition = Arc::new(Cognition::new(
        Arc::clone(&cache),
        Arc::new(AssociationGraph::new()),
        Arc::clone(&fanout),
        RecallConfig::default(),
    ));
    let scheduler = MetabolismScheduler::new(
        Arc::clone(&cache),
        fanout,
        cognition,
        interval,
        chrono::Duration::days(30),
    )
    .unwrap();
    (scheduler, cache)
}

fn hot_entry(cache: &CacheLayer, text: &str) -> String {
    let key = cache.store(json!(text), "idea", HashMap::new(), "ci");
    cache.retrieve(&key, "ci");
    cache.retrieve(&key, "ci");
    key
}

#[tokio::test]
async fn start_stop_is_idempotent() {
    let system = test_system(&[]).await;
    assert!(!system.is_metabolism_running());

    assert!(system.start_metabolism().await);
    assert!(!system.start_metabolism().await);
    assert!(system.memory_stats().metabolism_running);

    assert!(system.stop_metabolism().await);
    assert!(!system.stop_metabolism().await);
    assert!(!system.is_metabolism_running());

    // Restart after stop.
    assert!(system.start_metabolism().await);
    system.shutdown().await.unwrap();
    assert!(!system.is_metabolism_running());
}

#[tokio::test]
async fn sweep_promotes_to_every_backend() {
    let backends = [ScriptedBackend::healthy("a"), ScriptedBackend::healthy("b")];
    let system = test_system(&backends).await;
    let key = think(&system, "worth keeping", ThoughtType::Fact, &[]);
    system.strengthen_memory(&key, "tester");
    system.strengthen_memory(&key, "tester");

    let report = system.run_metabolism_once().await;
    assert_eq!(report.promoted, 1);
    assert!(backends.iter().all(|b| b.contains(&key)));
    assert!(system.cache().promotion_candidates().is_empty());
    assert_eq!(system.metabolism_stats().processed, 1);

    // Promoted entries stay cached.
    assert!(system.cache().contains(&key));
}

#[tokio::test]
async fn undelivered_candidates_are_requeued() {
    let backends = [ScriptedBackend::failing("down")];
    let (scheduler, cache) = scheduler(&backends, Duration::from_secs(60));
    let key = hot_entry(&cache, "nowhere to go");

    let report = scheduler.run_once().await;
    assert_eq!(report.promoted, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.requeued, 1);
    assert!(cache.promotion_candidates().contains(&key));
}

#[tokio::test]
async fn sweep_forgets_stale_entries() {
    let system = test_system(&[]).await;
    let stale = think(&system, "forgotten", ThoughtType::Feeling, &[]);
    let fresh = think(&system, "fresh", ThoughtType::Feeling, &[&stale]);
    backdate(system.cache(), &stale, chrono::Duration::days(31));

    let report = system.run_metabolism_once().await;
    assert_eq!(report.forgotten, 1);
    assert!(system.cache().contains(&fresh));
    assert!(system.associations(&fresh).is_empty());
    assert_eq!(system.metabolism_stats().forgotten, 1);
}

#[tokio::test]
async fn background_task_promotes_on_tick() {
    let backends = [ScriptedBackend::healthy("kv")];
    let (scheduler, cache) = scheduler(&backends, Duration::from_millis(25));
    let key = hot_entry(&cache, "ticked");

    assert!(scheduler.start().await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(scheduler.stop().await);

    assert!(backends[0].contains(&key));
    let stats = scheduler.stats();
    assert!(stats.ticks >= 1);
    assert_eq!(stats.failed_ticks, 0);
    assert_eq!(stats.processed, 1);
}

#[tokio::test]
async fn panicking_backend_does_not_lose_the_batch() {
    let backends = [ScriptedBackend::healthy("kv"), ScriptedBackend::panicking("volatile")];
    let (scheduler, cache) = scheduler(&backends, Duration::from_secs(60));
    let keys: Vec<String> = ["one", "two", "three"]
        .into_iter()
        .map(|text| hot_entry(&cache, text))
        .collect();

    let report = scheduler.run_once().await;
    assert_eq!(report.promoted, 3);
    assert_eq!(report.failed, 0);
    assert!(keys.iter().all(|key| backends[0].contains(key)));
    assert!(cache.promotion_candidates().is_empty());
    assert_eq!(backends[1].store_calls(), 3);
}

#[tokio::test]
async fn panicking_backend_keeps_the_loop_alive() {
    let backends = [ScriptedBackend::panicking("volatile")];
    let (scheduler, cache) = scheduler(&backends, Duration::from_millis(25));
    let key = hot_entry(&cache, "explosive");

    assert!(scheduler.start().await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(scheduler.is_running());
    let stats = scheduler.stats();
    assert!(stats.ticks >= 2);
    assert_eq!(stats.failed_ticks, 0);
    // Undelivered, so re-queued and retried every tick.
    assert!(backends[0].store_calls() >= 2);

    assert!(scheduler.stop().await);
    assert!(!scheduler.is_running());
    assert!(cache.promotion_candidates().contains(&key));
}

#[test]
fn zero_interval_is_rejected() {
    let cache = Arc::new(CacheLayer::new(10, 2).unwrap());
    let fanout = Arc::new(BackendFanout::new(Vec::new(), &FanoutConfig::default()).unwrap());
    let cognition = Arc::new(Cognition::new(
        Arc::clone(&cache),
        Arc::new(AssociationGraph::new()),
        Arc::clone(&fanout),
        RecallConfig::default(),
    ));
    let err = MetabolismScheduler::new(cache, fanout, cognition, Duration::ZERO, chrono::Duration::days(1))
        .err()
        .unwrap();
    assert!(err.to_string().contains("interval"));
}

#[tokio::test]
async fn system_rejects_zero_metabolism_interval() {
    let mut config = test_config();
    config.metabolism.interval_secs = 0;
    assert!(EsrMemorySystem::new(config, adapters(&[])).await.is_err());
}
