use anyhow::Result;
use esr::config::EsrConfig;
use esr::memory::truncate;
use esr::Thought;

/// Build a context bundle for a topic and print it grouped by bucket.
pub async fn context(config: EsrConfig, ci: &str, topic: &str, depth: usize) -> Result<()> {
    let system = super::open_system(config).await?;
    let bundle = system.build_context(topic, depth, ci).await;
    // Building context strengthens what it touches.
    super::close_system(&system).await?;

    println!("Context: {}", bundle.topic);
    println!("{}", "=".repeat(40));
    println!("  Thoughts:    {}", bundle.active.thought_count);
    println!("  Confidence:  {:.2}", bundle.confidence);
    println!("  Context id:  {}", bundle.active.id);

    print_bucket("Primary", &bundle.primary);
    print_bucket("Facts", &bundle.facts);
    print_bucket("Opinions", &bundle.opinions);
    print_bucket("Questions", &bundle.questions);
    print_bucket("Associated", &bundle.associated);

    if !bundle.contradictions.is_empty() {
        println!();
        println!("Contradictions:");
        for c in &bundle.contradictions {
            println!("  {} <> {}", c.first, c.second);
        }
    }

    Ok(())
}

fn print_bucket(label: &str, thoughts: &[Thought]) {
    if thoughts.is_empty() {
        return;
    }
    println!();
    println!("{label}:");
    for t in thoughts {
        println!(
            "  {} [{}] ({:.2}) {}",
            t.key,
            t.thought_type,
            t.confidence,
            truncate(&t.text(), 80)
        );
    }
}
