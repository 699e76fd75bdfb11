pub mod context;
pub mod forget;
pub mod inspect;
pub mod metabolize;
pub mod stats;
pub mod think;

use anyhow::{Context, Result};
use esr::config::EsrConfig;
use esr::EsrMemorySystem;

/// Open the system over the persisted cache snapshot.
///
/// Each CLI invocation is a separate process, so the snapshot is always
/// loaded and saved regardless of `cache.persist_cache`.
pub async fn open_system(mut config: EsrConfig) -> Result<EsrMemorySystem> {
    config.cache.persist_cache = true;
    EsrMemorySystem::from_config(config)
        .await
        .context("failed to initialize memory system")
}

/// Shut down and write the snapshot back.
pub async fn close_system(system: &EsrMemorySystem) -> Result<()> {
    system.shutdown().await.with_context(|| {
        format!(
            "failed to save cache snapshot to {}",
            system.config().resolved_cache_file().display()
        )
    })
}
