use anyhow::Result;
use esr::config::EsrConfig;

/// Forget entries not accessed within the given number of days.
pub async fn forget(config: EsrConfig, older_than_days: Option<u64>) -> Result<()> {
    let days = older_than_days.unwrap_or(config.metabolism.forget_after_days);
    let system = super::open_system(config).await?;

    let before = system.cache().len();
    let forgotten = system.forget_naturally(chrono::Duration::days(days as i64));
    super::close_system(&system).await?;

    println!("Forgot {forgotten} of {before} entries (older than {days} days).");
    Ok(())
}
