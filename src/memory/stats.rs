//! Read-only statistics surfaces.

use serde::Serialize;
use std::collections::BTreeMap;

use super::cache::CacheStats;

/// A frequently accessed entry, ranked by access velocity.
#[derive(Debug, Clone, Serialize)]
pub struct HotEntry {
    pub key: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub accesses: u64,
    /// Accesses per hour of residency.
    pub velocity: f64,
}

/// Response from `CacheLayer::analyze_patterns`.
#[derive(Debug, Clone, Serialize)]
pub struct PatternAnalysis {
    pub total_entries: usize,
    pub total_accesses: u64,
    pub unique_cis: usize,
    pub promotion_pending: usize,
    pub type_distribution: BTreeMap<String, usize>,
    pub hot_entries: Vec<HotEntry>,
    pub cache_stats: CacheStats,
}

/// Response from `EsrMemorySystem::memory_stats`.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub cache_size: usize,
    /// Keys with at least one association.
    pub thought_chains: usize,
    /// Sum of adjacency set sizes; each undirected edge counts from both ends.
    pub total_associations: usize,
    pub metabolism_running: bool,
}
