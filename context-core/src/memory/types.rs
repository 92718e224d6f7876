//! Core memory types: entries, event kinds, tiers and metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a context entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub Uuid);

impl EntryId {
    /// Generate a new random entry ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from string.
    pub fn parse(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of event that produced an entry.
///
/// The set is closed: adding a kind means extending the weight table in
/// [`EventKind::base_weight`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Decision,
    Milestone,
    Error,
    Deployment,
    Meeting,
    CodeChange,
    Documentation,
    Generic,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [EventKind; 8] = [
        Self::Decision,
        Self::Milestone,
        Self::Error,
        Self::Deployment,
        Self::Meeting,
        Self::CodeChange,
        Self::Documentation,
        Self::Generic,
    ];

    /// Base significance weight for this kind.
    pub fn base_weight(&self) -> f64 {
        match self {
            Self::Decision => 0.8,
            Self::Milestone => 0.9,
            Self::Error => 0.6,
            Self::Deployment => 0.7,
            Self::Meeting => 0.4,
            Self::CodeChange => 0.3,
            Self::Documentation => 0.2,
            Self::Generic => 0.1,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Decision => "decision",
            Self::Milestone => "milestone",
            Self::Error => "error",
            Self::Deployment => "deployment",
            Self::Meeting => "meeting",
            Self::CodeChange => "code_change",
            Self::Documentation => "documentation",
            Self::Generic => "generic",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "decision" => Ok(Self::Decision),
            "milestone" => Ok(Self::Milestone),
            "error" => Ok(Self::Error),
            "deployment" => Ok(Self::Deployment),
            "meeting" => Ok(Self::Meeting),
            "code_change" | "codechange" => Ok(Self::CodeChange),
            "documentation" => Ok(Self::Documentation),
            "generic" => Ok(Self::Generic),
            _ => Err(Error::invalid_event(format!("unknown event kind '{}'", s))),
        }
    }
}

/// Retention tier.
///
/// Membership is additive: an entry may sit in several tiers at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Current session only
    Immediate,
    /// Recent days
    ShortTerm,
    /// Capacity-bounded, no age limit
    LongTerm,
    /// Cross-project knowledge, never auto-expired
    Institutional,
}

impl Tier {
    /// All tiers, in retention order.
    pub const ALL: [Tier; 4] = [
        Self::Immediate,
        Self::ShortTerm,
        Self::LongTerm,
        Self::Institutional,
    ];

    /// Tiers searched by the default text query.
    pub const QUERYABLE: [Tier; 3] = [Self::Immediate, Self::ShortTerm, Self::LongTerm];
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::ShortTerm => write!(f, "short_term"),
            Self::LongTerm => write!(f, "long_term"),
            Self::Institutional => write!(f, "institutional"),
        }
    }
}

/// Caller-supplied payload document.
///
/// Opaque to the engine beyond size and a flattened text projection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(pub Value);

impl Payload {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// An empty payload.
    pub fn empty() -> Self {
        Self(Value::Null)
    }

    /// Size in bytes used for scoring and limits.
    ///
    /// Null and empty containers count as zero.
    pub fn size_bytes(&self) -> usize {
        match &self.0 {
            Value::Null => 0,
            Value::Object(map) if map.is_empty() => 0,
            Value::Array(items) if items.is_empty() => 0,
            other => serde_json::to_vec(other).map(|v| v.len()).unwrap_or(0),
        }
    }

    /// Look up a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Flatten keys and scalar values into whitespace-separated text.
    pub fn flatten_text(&self) -> String {
        let mut out = String::new();
        flatten_into(&self.0, &mut out);
        out
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn flatten_into(value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::Bool(b) => push_word(out, if *b { "true" } else { "false" }),
        Value::Number(n) => push_word(out, &n.to_string()),
        Value::String(s) => push_word(out, s),
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                push_word(out, k);
                flatten_into(v, out);
            }
        }
    }
}

fn push_word(out: &mut String, word: &str) {
    if !out.is_empty() {
        out.push(' ');
    }
    out.push_str(word);
}

/// Indexed annotations attached by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl EntryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    fn text(&self) -> String {
        let mut out = String::new();
        for value in [&self.session_id, &self.actor_id, &self.environment]
            .into_iter()
            .flatten()
        {
            push_word(&mut out, value);
        }
        for (k, v) in &self.extra {
            push_word(&mut out, k);
            push_word(&mut out, v);
        }
        out
    }
}

/// A captured context entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub id: EntryId,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub payload: Payload,
    #[serde(default)]
    pub metadata: EntryMetadata,
    /// Importance in [0, 1], fixed at capture
    pub significance: f64,
    /// Tiers currently claiming this entry
    pub tiers: BTreeSet<Tier>,
}

impl ContextEntry {
    /// Create an entry captured now, in the Immediate tier only.
    pub fn new(kind: EventKind, payload: Payload, metadata: EntryMetadata, significance: f64) -> Self {
        let mut tiers = BTreeSet::new();
        tiers.insert(Tier::Immediate);
        Self {
            id: EntryId::new(),
            timestamp: Utc::now(),
            kind,
            payload,
            metadata,
            significance: significance.clamp(0.0, 1.0),
            tiers,
        }
    }

    /// Override the capture timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add a tier membership.
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tiers.insert(tier);
        self
    }

    pub fn in_tier(&self, tier: Tier) -> bool {
        self.tiers.contains(&tier)
    }

    /// Lower-cased text projection of kind, payload and metadata.
    pub fn text_projection(&self) -> String {
        let mut out = self.kind.to_string();
        let payload = self.payload.flatten_text();
        if !payload.is_empty() {
            push_word(&mut out, &payload);
        }
        let metadata = self.metadata.text();
        if !metadata.is_empty() {
            push_word(&mut out, &metadata);
        }
        out.to_lowercase()
    }
}
