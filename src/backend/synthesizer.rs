//! Reconcile per-backend responses into one answer.
//!
//! Identical contents are grouped first. Groups are ranked by the summed
//! confidence of the backends that returned them, then by fastest retrieval,
//! then by arrival order. The top group becomes the primary content; the rest
//! are classified as variations, outliers, or contradictions.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use super::MemoryResponse;
use crate::memory::{content_text, tokenize, truncate};

const NEGATIONS: [&str; 4] = ["not", "never", "no", "none"];

/// How strongly the backends agree on the primary content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Agreement {
    /// Only one response.
    Single,
    /// Every response carried the same content.
    Unanimous,
    /// More than half of the responding backends returned the primary.
    Majority,
    Divergent,
}

/// Two distinct contents where exactly one side is negated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contradiction {
    pub first: Value,
    pub second: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesizedMemory {
    pub query: String,
    pub primary: Value,
    /// Share of total response confidence backing the primary, in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Backends that returned the primary content.
    pub sources: Vec<String>,
    pub agreement: Agreement,
    pub variations: Vec<Value>,
    pub contradictions: Vec<Contradiction>,
    pub perspectives: BTreeMap<String, Vec<Value>>,
    pub consensus: Option<Value>,
    pub outliers: Vec<Value>,
    pub response_count: usize,
    pub backend_count: usize,
    pub average_retrieval_time: Duration,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Synthesis {
    /// No backend answered.
    Empty,
    Synthesized(SynthesizedMemory),
}

impl Synthesis {
    pub fn primary(&self) -> Option<&Value> {
        match self {
            Self::Empty => None,
            Self::Synthesized(memory) => Some(&memory.primary),
        }
    }

    pub fn into_memory(self) -> Option<SynthesizedMemory> {
        match self {
            Self::Empty => None,
            Self::Synthesized(memory) => Some(memory),
        }
    }
}

struct Group<'a> {
    content: &'a Value,
    confidence: f64,
    fastest: Duration,
    first_seen: usize,
    backends: BTreeSet<&'a str>,
}

/// Merge `responses` into a single answer for `query`.
pub fn synthesize(responses: &[MemoryResponse], query: &str) -> Synthesis {
    if responses.is_empty() {
        return Synthesis::Empty;
    }

    // 1. Group identical contents
    let mut groups: Vec<Group<'_>> = Vec::new();
    for (index, response) in responses.iter().enumerate() {
        match groups.iter_mut().find(|g| *g.content == response.content) {
            Some(group) => {
                group.confidence += response.confidence;
                group.fastest = group.fastest.min(response.retrieval_time);
                group.backends.insert(&response.source_backend);
            }
            None => groups.push(Group {
                content: &response.content,
                confidence: response.confidence,
                fastest: response.retrieval_time,
                first_seen: index,
                backends: BTreeSet::from([response.source_backend.as_str()]),
            }),
        }
    }

    // 2. Rank
    groups.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.fastest.cmp(&b.fastest))
            .then(a.first_seen.cmp(&b.first_seen))
    });

    let primary = &groups[0];
    let primary_text = content_text(primary.content).trim().to_lowercase();

    // 3. Classify the remaining groups
    let mut variations = Vec::new();
    let mut outliers = Vec::new();
    for group in &groups[1..] {
        let text = content_text(group.content).trim().to_lowercase();
        let similar = !text.is_empty()
            && !primary_text.is_empty()
            && (text.contains(&primary_text) || primary_text.contains(&text));
        if similar {
            variations.push(group.content.clone());
        } else if group.backends.len() == 1 {
            outliers.push(group.content.clone());
        }
    }

    let mut contradictions = Vec::new();
    for (i, a) in groups.iter().enumerate() {
        for b in &groups[i + 1..] {
            if is_negated(a.content) != is_negated(b.content) {
                contradictions.push(Contradiction {
                    first: a.content.clone(),
                    second: b.content.clone(),
                });
            }
        }
    }

    let mut perspectives: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for response in responses {
        perspectives
            .entry(response.source_backend.clone())
            .or_default()
            .push(response.content.clone());
    }
    let backend_count = perspectives.len();

    let consensus = groups
        .iter()
        .find(|g| g.backends.len() > 1)
        .map(|g| g.content.clone());

    let agreement = if responses.len() == 1 {
        Agreement::Single
    } else if groups.len() == 1 {
        Agreement::Unanimous
    } else if primary.backends.len() * 2 > backend_count {
        Agreement::Majority
    } else {
        Agreement::Divergent
    };

    let total_confidence: f64 = groups.iter().map(|g| g.confidence).sum();
    let confidence = if total_confidence > 0.0 {
        (primary.confidence / total_confidence).clamp(0.0, 1.0)
    } else {
        1.0 / groups.len() as f64
    };

    let total_time: Duration = responses.iter().map(|r| r.retrieval_time).sum();
    let average_retrieval_time = total_time / responses.len() as u32;

    let mut memory = SynthesizedMemory {
        query: query.to_string(),
        primary: primary.content.clone(),
        confidence,
        sources: primary.backends.iter().map(|s| s.to_string()).collect(),
        agreement,
        variations,
        contradictions,
        perspectives,
        consensus,
        outliers,
        response_count: responses.len(),
        backend_count,
        average_retrieval_time,
        summary: String::new(),
    };
    memory.summary = summarize(&memory);
    Synthesis::Synthesized(memory)
}

/// Negation detected on word boundaries, including `n't` contractions.
fn is_negated(content: &Value) -> bool {
    let text = content_text(content).to_lowercase();
    if text.contains("n't") {
        return true;
    }
    let tokens = tokenize(&text);
    NEGATIONS.iter().any(|word| tokens.contains(*word))
}

fn summarize(memory: &SynthesizedMemory) -> String {
    let mut parts = vec![format!(
        "primary memory: {}",
        truncate(&content_text(&memory.primary), 100)
    )];

    match memory.agreement {
        Agreement::Single => parts.push(format!("single source ({})", memory.sources.join(", "))),
        Agreement::Unanimous => parts.push(format!("all {} backends agree", memory.backend_count)),
        Agreement::Majority | Agreement::Divergent => parts.push(format!(
            "{} of {} backends agree",
            memory.sources.len(),
            memory.backend_count
        )),
    }
    if !memory.contradictions.is_empty() {
        parts.push(format!(
            "{} contradictory perspective(s)",
            memory.contradictions.len()
        ));
    }
    if !memory.outliers.is_empty() {
        parts.push(format!("{} unique perspective(s)", memory.outliers.len()));
    }
    parts.join(" | ")
}
