//! Decision records: structured decision entries with follow-up tracking.
//!
//! A decision is captured like any other entry (kind `Decision`), with its
//! fields as the payload. The store keeps the structured record alongside
//! so history and overdue queries do not re-parse payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::memory::{EntryId, EntryMetadata};

/// Impact level of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Impact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Caller-supplied fields for a new decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionFields {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub selected_option: Option<String>,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub participants: BTreeSet<String>,
    pub impact: Impact,
    #[serde(default)]
    pub follow_up_required: bool,
    #[serde(default)]
    pub review_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing)]
    pub metadata: EntryMetadata,
}

impl DecisionFields {
    pub fn new(title: impl Into<String>, impact: Impact) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            options: Vec::new(),
            selected_option: None,
            rationale: String::new(),
            participants: BTreeSet::new(),
            impact,
            follow_up_required: false,
            review_date: None,
            metadata: EntryMetadata::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_selected(mut self, option: impl Into<String>) -> Self {
        self.selected_option = Some(option.into());
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn with_participant(mut self, participant: impl Into<String>) -> Self {
        self.participants.insert(participant.into());
        self
    }

    /// Require a follow-up review on the given date.
    pub fn with_follow_up(mut self, review_date: DateTime<Utc>) -> Self {
        self.follow_up_required = true;
        self.review_date = Some(review_date);
        self
    }

    pub fn with_metadata(mut self, metadata: EntryMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Check required fields. Runs before anything is written.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::validation("decision title is required"));
        }
        if self.follow_up_required && self.review_date.is_none() {
            return Err(Error::validation(
                "review_date is required when follow_up_required is set",
            ));
        }
        if let Some(ref selected) = self.selected_option {
            if !self.options.is_empty() && !self.options.contains(selected) {
                return Err(Error::validation(format!(
                    "selected option '{}' is not one of the listed options",
                    selected
                )));
            }
        }
        Ok(())
    }
}

/// A stored decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub entry_id: EntryId,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub options: Vec<String>,
    pub selected_option: Option<String>,
    pub rationale: String,
    pub participants: BTreeSet<String>,
    pub impact: Impact,
    pub follow_up_required: bool,
    pub review_date: Option<DateTime<Utc>>,
    /// Entries this decision was linked to when it was recorded
    pub linked_entries: BTreeSet<EntryId>,
}

impl DecisionRecord {
    pub fn from_fields(
        entry_id: EntryId,
        timestamp: DateTime<Utc>,
        fields: DecisionFields,
        linked_entries: BTreeSet<EntryId>,
    ) -> Self {
        Self {
            entry_id,
            timestamp,
            title: fields.title,
            description: fields.description,
            options: fields.options,
            selected_option: fields.selected_option,
            rationale: fields.rationale,
            participants: fields.participants,
            impact: fields.impact,
            follow_up_required: fields.follow_up_required,
            review_date: fields.review_date,
            linked_entries,
        }
    }

    /// Follow-up is required and the review date is strictly before `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.follow_up_required && self.review_date.is_some_and(|date| date < now)
    }
}

/// Conjunctive filter over decision history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionFilter {
    /// Decisions recorded at or after this time
    pub since: Option<DateTime<Utc>>,
    pub impact: Option<Impact>,
    pub participant: Option<String>,
}

impl DecisionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn impact(mut self, impact: Impact) -> Self {
        self.impact = Some(impact);
        self
    }

    pub fn participant(mut self, participant: impl Into<String>) -> Self {
        self.participant = Some(participant.into());
        self
    }

    /// Every set predicate must hold.
    pub fn matches(&self, record: &DecisionRecord) -> bool {
        if let Some(since) = self.since {
            if record.timestamp < since {
                return false;
            }
        }
        if let Some(impact) = self.impact {
            if record.impact != impact {
                return false;
            }
        }
        if let Some(ref participant) = self.participant {
            if !record.participants.contains(participant) {
                return false;
            }
        }
        true
    }
}
