use anyhow::Result;
use esr::config::EsrConfig;

/// Run one metabolism sweep (promote, then forget) and report the outcome.
pub async fn metabolize(config: EsrConfig) -> Result<()> {
    let system = super::open_system(config).await?;
    let report = system.run_metabolism_once().await;
    super::close_system(&system).await?;

    println!("Metabolism sweep");
    println!("{}", "=".repeat(40));
    println!("  Promoted:    {}", report.promoted);
    println!("  Failed:      {}", report.failed);
    println!("  Re-queued:   {}", report.requeued);
    println!("  Forgotten:   {}", report.forgotten);
    Ok(())
}
