//! CLI `inspect` command: display full details for a single cache entry.

use anyhow::Result;
use esr::config::EsrConfig;
use esr::memory::truncate;

/// Inspect a single entry by key without counting an access.
pub async fn inspect(config: EsrConfig, key: &str) -> Result<()> {
    let system = super::open_system(config).await?;

    let Some(entry) = system.cache().peek(key) else {
        anyhow::bail!("no cache entry with key {key}");
    };

    println!("Entry: {}", entry.key);
    println!("{}", "=".repeat(50));
    println!("  Type:           {}", entry.content_type);
    println!("  Access count:   {}", entry.access_count);
    println!("  Created:        {}", entry.created_at.to_rfc3339());
    println!("  Last accessed:  {}", entry.last_access.to_rfc3339());
    println!("  Size:           {} bytes", entry.size_bytes);
    let cis: Vec<&str> = entry.ci_sources.iter().map(String::as_str).collect();
    println!("  CIs:            {}", cis.join(", "));
    if system.cache().promotion_candidates().contains(key) {
        println!("  Promotion:      pending");
    }
    if !entry.metadata.is_empty() {
        println!("  Metadata:       {}", serde_json::to_string_pretty(&entry.metadata)?);
    }
    println!();
    println!("Content:");
    println!("  {}", serde_json::to_string_pretty(&entry.content)?);

    let associations = system.associations(key);
    if !associations.is_empty() {
        println!();
        println!("Associations:");
        for assoc in &associations {
            let preview = system
                .cache()
                .peek(assoc)
                .map(|e| truncate(&esr::memory::content_text(&e.content), 60))
                .unwrap_or_else(|| "(not resident)".into());
            println!("  --> {assoc} ({preview})");
        }
    }

    Ok(())
}
