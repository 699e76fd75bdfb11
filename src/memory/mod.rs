pub mod cache;
pub mod cognitive;
pub mod graph;
pub mod metabolism;
pub mod persist;
pub mod stats;
pub mod types;

use serde_json::Value;
use std::collections::HashSet;

/// Plain-text rendering of an opaque payload.
///
/// Strings render as themselves; thought records render as their inner
/// content; anything else renders as compact JSON.
pub fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("content") {
            Some(inner) => content_text(inner),
            None => content.to_string(),
        },
        other => other.to_string(),
    }
}

/// Lowercased alphanumeric tokens.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Keyword relevance of `content` to `query` in `[0.0, 1.0]`.
///
/// Exact match scores 1.0, substring containment 0.8, otherwise the fraction
/// of query tokens present in the content scaled to at most 0.6.
pub fn keyword_score(query: &str, content: &str) -> f64 {
    let query = query.trim().to_lowercase();
    let content = content.trim().to_lowercase();
    if query.is_empty() || content.is_empty() {
        return 0.0;
    }
    if query == content {
        return 1.0;
    }
    if content.contains(&query) {
        return 0.8;
    }

    let query_tokens = tokenize(&query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let content_tokens = tokenize(&content);
    let overlap = query_tokens.intersection(&content_tokens).count();
    (overlap as f64 / query_tokens.len() as f64).min(1.0) * 0.6
}

/// Truncate content to max_chars, appending "..." if truncated.
pub fn truncate(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        None => content.to_string(),
        Some((end, _)) => format!("{}...", &content[..end]),
    }
}
