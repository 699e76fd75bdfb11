use anyhow::{Context, Result};
use esr::config::EsrConfig;
use esr::ThoughtInput;

/// Store a thought and print its key.
pub async fn think(
    config: EsrConfig,
    ci: &str,
    content: &str,
    thought_type: &str,
    confidence: f64,
    associations: Vec<String>,
) -> Result<()> {
    let input = ThoughtInput::new(content, thought_type)
        .context("invalid thought")?
        .confidence(confidence)
        .associations(associations);

    let system = super::open_system(config).await?;
    let key = system.store_thought(input, ci).context("failed to store thought")?;
    super::close_system(&system).await?;

    println!("{key}");
    Ok(())
}
