//! Append-only facts about entities.

use super::entity::{EntityId, Visibility};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactId(Uuid);

impl FactId {
    /// Create a new unique fact ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Categories of facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCategory {
    /// Physical appearance, clothing, distinguishing features.
    Appearance,
    /// Personality traits, behavior patterns, quirks.
    Personality,
    /// Something that happened in the story.
    Event,
    /// Connection between entities.
    Relationship,
    /// History or backstory.
    Backstory,
    /// Goals, desires, or motivations.
    Motivation,
    /// Abilities, skills, or powers.
    Capability,
    /// Where something is or was.
    Location,
    /// Who owns or holds something.
    Possession,
    /// How many of something there are.
    Quantity,
    /// Current state or condition.
    Status,
    /// Secrets or hidden information.
    Secret,
}

impl FactCategory {
    /// Get the display name for this category.
    pub fn name(&self) -> &'static str {
        match self {
            FactCategory::Appearance => "Appearance",
            FactCategory::Personality => "Personality",
            FactCategory::Event => "Event",
            FactCategory::Relationship => "Relationship",
            FactCategory::Backstory => "Backstory",
            FactCategory::Motivation => "Motivation",
            FactCategory::Capability => "Capability",
            FactCategory::Location => "Location",
            FactCategory::Possession => "Possession",
            FactCategory::Quantity => "Quantity",
            FactCategory::Status => "Status",
            FactCategory::Secret => "Secret",
        }
    }

    /// Check if this category holds a single comparable value per entity.
    pub fn is_structured(&self) -> bool {
        matches!(
            self,
            FactCategory::Status
                | FactCategory::Possession
                | FactCategory::Quantity
                | FactCategory::Location
        )
    }

    /// Check if this category is typically stable (doesn't change often).
    pub fn is_stable(&self) -> bool {
        matches!(
            self,
            FactCategory::Appearance
                | FactCategory::Personality
                | FactCategory::Backstory
                | FactCategory::Capability
        )
    }
}

/// Where a fact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactSource {
    /// Produced by the text generator and accepted by the user.
    Generated,
    /// Written directly by the user.
    User,
    /// Recorded when the user resolved a conflict.
    ConflictResolution,
}

/// A fact about an entity. Facts are never mutated; newer facts supersede older ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    /// Unique identifier.
    pub id: FactId,
    /// Entity this fact is about.
    pub subject: EntityId,
    /// Category of the fact.
    pub category: FactCategory,
    /// The fact content in natural language.
    pub content: String,
    /// Who may see this fact.
    pub visibility: Visibility,
    /// Where this fact came from.
    pub source: FactSource,
    /// Store-assigned append order; higher is newer.
    pub sequence: u64,
    /// When this fact was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl Fact {
    /// Check if this fact is newer than another.
    pub fn supersedes(&self, other: &Fact) -> bool {
        self.sequence > other.sequence
    }
}

/// A fact to append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFact {
    pub subject: EntityId,
    pub category: FactCategory,
    pub content: String,
    #[serde(default)]
    pub visibility: Visibility,
    pub source: FactSource,
}

impl NewFact {
    /// Create a new public fact.
    pub fn new(
        subject: EntityId,
        category: FactCategory,
        content: impl Into<String>,
        source: FactSource,
    ) -> Self {
        Self {
            subject,
            category,
            content: content.into(),
            visibility: Visibility::Public,
            source,
        }
    }

    /// Set the visibility.
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Stamp this fact with its store position.
    pub fn into_fact(self, sequence: u64) -> Fact {
        Fact {
            id: FactId::new(),
            subject: self.subject,
            category: self.category,
            content: self.content,
            visibility: self.visibility,
            source: self.source,
            sequence,
            recorded_at: Utc::now(),
        }
    }
}

/// Pick the newest fact per (subject, category) from a set of facts.
pub fn latest_by_category<'a>(
    facts: impl IntoIterator<Item = &'a Fact>,
) -> HashMap<(EntityId, FactCategory), &'a Fact> {
    let mut latest: HashMap<(EntityId, FactCategory), &'a Fact> = HashMap::new();
    for fact in facts {
        latest
            .entry((fact.subject, fact.category))
            .and_modify(|current| {
                if fact.supersedes(current) {
                    *current = fact;
                }
            })
            .or_insert(fact);
    }
    latest
}
