use anyhow::Result;
use esr::config::EsrConfig;

/// Display cache, graph, and backend statistics in the terminal.
pub async fn stats(config: EsrConfig) -> Result<()> {
    let system = super::open_system(config).await?;
    let memory = system.memory_stats();
    let patterns = system.analyze_patterns();

    println!("Memory Statistics");
    println!("{}", "=".repeat(40));
    println!("  Cache size:          {}", memory.cache_size);
    println!("  Total accesses:      {}", patterns.total_accesses);
    println!("  Unique CIs:          {}", patterns.unique_cis);
    println!("  Promotion pending:   {}", patterns.promotion_pending);
    println!("  Thought chains:      {}", memory.thought_chains);
    println!("  Associations:        {}", memory.total_associations);
    println!();

    println!("By Type:");
    for (content_type, count) in &patterns.type_distribution {
        println!("  {:<16} {}", content_type, count);
    }
    println!();

    if !patterns.hot_entries.is_empty() {
        println!("Hot Entries:");
        for hot in &patterns.hot_entries {
            println!(
                "  {} [{}] {} accesses ({:.1}/h)",
                hot.key, hot.content_type, hot.accesses, hot.velocity
            );
        }
        println!();
    }

    println!("Backends:");
    for health in system.backend_health() {
        println!(
            "  {:<12} {:<12} stores {} (failed {}), recalls {} (timeouts {})",
            health.name,
            health.kind,
            health.stores,
            health.store_failures,
            health.recalls,
            health.recall_timeouts
        );
    }

    Ok(())
}
