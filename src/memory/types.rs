//! Core memory type definitions.
//!
//! Defines [`ThoughtType`] (the cognitive category of a thought), [`Thought`]
//! (a decoded thought with its live associations), [`ThoughtInput`] (what a
//! caller hands to `store_thought`), and [`CacheEntry`] (the resident record
//! owned by the cache layer).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};

/// Content type tag used for entries warmed from a backend recall.
pub const RECALLED_CONTENT_TYPE: &str = "recalled_memory";

/// The kinds of thought a CI can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtType {
    /// A new concept or insight.
    Idea,
    /// Recalled information.
    Memory,
    /// Verifiable information.
    Fact,
    /// A subjective view.
    Opinion,
    /// Something to explore.
    Question,
    /// A response to a question.
    Answer,
    /// A future intention.
    Plan,
    /// Meta-cognition.
    Reflection,
    /// An emotional state.
    Feeling,
    /// Sensory input.
    Observation,
}

impl ThoughtType {
    pub const ALL: [ThoughtType; 10] = [
        Self::Idea,
        Self::Memory,
        Self::Fact,
        Self::Opinion,
        Self::Question,
        Self::Answer,
        Self::Plan,
        Self::Reflection,
        Self::Feeling,
        Self::Observation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idea => "idea",
            Self::Memory => "memory",
            Self::Fact => "fact",
            Self::Opinion => "opinion",
            Self::Question => "question",
            Self::Answer => "answer",
            Self::Plan => "plan",
            Self::Reflection => "reflection",
            Self::Feeling => "feeling",
            Self::Observation => "observation",
        }
    }
}

impl std::fmt::Display for ThoughtType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for ThoughtType {
    type Err = Error;

    /// Labels are matched case-insensitively after trimming. Unknown labels are
    /// rejected rather than defaulted.
    fn from_str(s: &str) -> Result<Self> {
        let label = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == label)
            .ok_or_else(|| Error::Validation(format!("unknown thought type: {s:?}")))
    }
}

/// Anything that names a thought type: the enum itself or its string label.
pub trait IntoThoughtType {
    fn into_thought_type(self) -> Result<ThoughtType>;
}

impl IntoThoughtType for ThoughtType {
    fn into_thought_type(self) -> Result<ThoughtType> {
        Ok(self)
    }
}

impl IntoThoughtType for &str {
    fn into_thought_type(self) -> Result<ThoughtType> {
        self.parse()
    }
}

impl IntoThoughtType for String {
    fn into_thought_type(self) -> Result<ThoughtType> {
        self.parse()
    }
}

/// A resident cache record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// Opaque payload. Thoughts are stored as their serialized record.
    pub content: Value,
    /// Free-form type tag (`"fact"`, `"recalled_memory"`, ...).
    pub content_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Every CI that has stored or touched this entry.
    #[serde(default)]
    pub ci_sources: BTreeSet<String>,
    /// Retrieve count since the entry became resident. Stores don't count.
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    #[serde(default)]
    pub size_bytes: usize,
}

impl CacheEntry {
    /// Accesses per hour of residency.
    pub fn access_velocity(&self) -> f64 {
        if self.access_count <= 1 {
            return 0.0;
        }
        let hours = (self.last_access - self.created_at).num_milliseconds() as f64 / 3_600_000.0;
        if hours <= 0.0 {
            return self.access_count as f64;
        }
        self.access_count as f64 / hours
    }
}

/// The serialized body of a thought as it lives in cache and backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ThoughtRecord {
    pub content: Value,
    #[serde(rename = "type")]
    pub thought_type: ThoughtType,
    pub confidence: f64,
    #[serde(default)]
    pub associations: BTreeSet<String>,
    pub source_ci: String,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl ThoughtRecord {
    /// Decode a stored payload. Entries warmed from backends may wrap the
    /// record one level deeper under `content`.
    pub fn decode(value: &Value) -> Option<Self> {
        if let Ok(record) = serde_json::from_value::<ThoughtRecord>(value.clone()) {
            return Some(record);
        }
        let inner = value.get("content")?;
        serde_json::from_value(inner.clone()).ok()
    }
}

/// A decoded thought.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thought {
    pub key: String,
    pub content: Value,
    #[serde(rename = "type")]
    pub thought_type: ThoughtType,
    /// Belief strength in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Keys of associated thoughts (live view of the association graph).
    pub associations: BTreeSet<String>,
    pub ci_id: String,
    pub context: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Thought {
    pub(crate) fn from_record(key: impl Into<String>, record: ThoughtRecord) -> Self {
        Self {
            key: key.into(),
            content: record.content,
            thought_type: record.thought_type,
            confidence: record.confidence,
            associations: record.associations,
            ci_id: record.source_ci,
            context: record.context,
            created_at: record.timestamp,
        }
    }

    /// Plain-text rendering of the content, used for keyword matching.
    pub fn text(&self) -> String {
        super::content_text(&self.content)
    }
}

/// Caller input for `store_thought`.
#[derive(Debug, Clone)]
pub struct ThoughtInput {
    pub content: Value,
    pub thought_type: ThoughtType,
    pub confidence: f64,
    pub associations: Vec<String>,
    pub context: HashMap<String, Value>,
}

impl ThoughtInput {
    pub fn new(content: impl Into<Value>, thought_type: impl IntoThoughtType) -> Result<Self> {
        Ok(Self {
            content: content.into(),
            thought_type: thought_type.into_thought_type()?,
            confidence: 1.0,
            associations: Vec::new(),
            context: HashMap::new(),
        })
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn associate(mut self, key: impl Into<String>) -> Self {
        self.associations.push(key.into());
        self
    }

    pub fn associations<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.associations.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Record the caller's active context on the thought.
    pub fn in_context(mut self, active: &super::cognitive::ActiveContext) -> Self {
        self.context = active.as_map();
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::Validation(format!(
                "confidence must be between 0.0 and 1.0, got {}",
                self.confidence
            )));
        }
        if self.content.is_null() {
            return Err(Error::Validation("thought content must not be null".into()));
        }
        Ok(())
    }
}
