//! Discovery of candidate entities in generated text.
//!
//! A review cycle flows through four stages:
//!
//! ```text
//!  narrative text ──► Scanner ──┐
//!                               ├──► Ledger (merge, dedup) ──► review ──► commit
//!  structured fields ─► extract ┘        ▲
//!                                        │ manual adds / decisions
//! ```
//!
//! Every stage keys Discoveries by the same normalized identity, so the
//! scanner, the structured extractor and the user all agree on when two
//! mentions name the same thing.

mod extract;
mod index;
mod ledger;
mod scanner;

pub use extract::{field_spec, extract_field, FieldSpec, StructuredField};
pub use index::{MatchConfig, MatchIndex, MatchIndexError, MatchOutcome};
pub use ledger::{merge, Ledger, LedgerError, LedgerEvent};
pub use scanner::{ScanConfig, ScanError, Scanner};

use crate::model::{EntityId, EntityKind, RelationshipKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Separators that introduce a trailing description after a name.
const DESCRIPTOR_SEPARATORS: [&str; 4] = [" - ", " – ", " — ", ": "];

/// Split a raw reference into its name part and any trailing description.
///
/// `"The Rusty Anchor Tavern - a dockside pub"` becomes
/// `("The Rusty Anchor Tavern", Some("a dockside pub"))`.
pub fn split_descriptor(raw: &str) -> (String, Option<String>) {
    let mut name = strip_wrapping(raw.trim());
    let mut description = None;

    let cut = DESCRIPTOR_SEPARATORS
        .iter()
        .filter_map(|sep| name.find(sep).map(|pos| (pos, sep.len())))
        .min_by_key(|(pos, _)| *pos);
    if let Some((pos, len)) = cut {
        let rest = name[pos + len..].trim();
        if !rest.is_empty() {
            description = Some(rest.to_string());
        }
        name = name[..pos].to_string();
    }

    let trimmed = name.trim_end();
    if trimmed.ends_with(')') {
        if let Some(open) = trimmed.rfind('(') {
            let note = trimmed[open + 1..trimmed.len() - 1].trim();
            if description.is_none() && !note.is_empty() {
                description = Some(note.to_string());
            }
            name = trimmed[..open].to_string();
        }
    }

    let collapsed = name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', ',', ';', ':', '!', '?'])
        .to_string();
    (strip_wrapping(&collapsed), description)
}

/// Remove surrounding brackets and quotes.
fn strip_wrapping(s: &str) -> String {
    s.trim()
        .trim_start_matches(['[', '"', '\u{201C}', '\''])
        .trim_end_matches([']', '"', '\u{201D}', '\''])
        .trim()
        .to_string()
}

/// Normalized identity of a mentioned name.
///
/// Two mentions with the same key refer to the same candidate entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiscoveryKey(String);

impl DiscoveryKey {
    /// Normalize a raw name into an identity key.
    ///
    /// Returns `None` when nothing name-like remains.
    pub fn from_name(raw: &str) -> Option<Self> {
        let (name, _) = split_descriptor(raw);
        Self::from_clean(&name)
    }

    /// Key an already-cleaned display name.
    fn from_clean(name: &str) -> Option<Self> {
        let key = name.to_lowercase();
        if key.chars().any(char::is_alphanumeric) {
            Some(Self(key))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiscoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a Discovery came from, ordered by precedence (highest last).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum DiscoverySource {
    /// Found by scanning narrative text.
    Scan,
    /// Extracted from a generated sub-object list.
    Structured { field: String },
    /// Added by the user.
    Manual,
}

/// Review state of a Discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "entity")]
pub enum DiscoveryStatus {
    /// Awaiting a decision.
    Pending,
    /// Create a stub entity on commit.
    CreateStub,
    /// Link to an existing entity on commit.
    LinkExisting(EntityId),
    /// Leave out of the commit.
    Ignore,
    /// Written by a commit; the entity it produced.
    Committed(EntityId),
}

/// A status change that the state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot move discovery from {from} to {to}")]
pub struct TransitionError {
    pub from: &'static str,
    pub to: &'static str,
}

impl DiscoveryStatus {
    pub fn label(&self) -> &'static str {
        match self {
            DiscoveryStatus::Pending => "pending",
            DiscoveryStatus::CreateStub => "create_stub",
            DiscoveryStatus::LinkExisting(_) => "link_existing",
            DiscoveryStatus::Ignore => "ignore",
            DiscoveryStatus::Committed(_) => "committed",
        }
    }

    /// Whether a decision has been made.
    pub fn is_decided(&self) -> bool {
        !matches!(self, DiscoveryStatus::Pending)
    }

    /// Precedence when two sources disagree about the same Discovery.
    fn rank(&self) -> u8 {
        match self {
            DiscoveryStatus::Pending => 0,
            DiscoveryStatus::Ignore => 1,
            DiscoveryStatus::CreateStub => 2,
            DiscoveryStatus::LinkExisting(_) => 3,
            DiscoveryStatus::Committed(_) => 4,
        }
    }

    /// Apply a review decision.
    ///
    /// Only a pending Discovery can be decided; re-applying the current
    /// decision is a no-op.
    pub fn decide(self, next: DiscoveryStatus) -> Result<DiscoveryStatus, TransitionError> {
        match (self, next) {
            (current, next) if current == next => Ok(current),
            (
                DiscoveryStatus::Pending,
                DiscoveryStatus::CreateStub
                | DiscoveryStatus::LinkExisting(_)
                | DiscoveryStatus::Ignore,
            ) => Ok(next),
            (from, to) => Err(TransitionError {
                from: from.label(),
                to: to.label(),
            }),
        }
    }

    /// A stub request turned out to duplicate an entity that already exists.
    pub fn resolve_duplicate(self, existing: EntityId) -> Result<DiscoveryStatus, TransitionError> {
        match self {
            DiscoveryStatus::CreateStub => Ok(DiscoveryStatus::LinkExisting(existing)),
            DiscoveryStatus::LinkExisting(id) if id == existing => Ok(self),
            from => Err(TransitionError {
                from: from.label(),
                to: "link_existing",
            }),
        }
    }

    /// The commit wrote this Discovery out as `entity`.
    pub fn commit(self, entity: EntityId) -> Result<DiscoveryStatus, TransitionError> {
        match self {
            DiscoveryStatus::CreateStub | DiscoveryStatus::LinkExisting(_) => {
                Ok(DiscoveryStatus::Committed(entity))
            }
            DiscoveryStatus::Committed(id) if id == entity => Ok(self),
            from => Err(TransitionError {
                from: from.label(),
                to: "committed",
            }),
        }
    }
}

/// An existing entity that a Discovery probably refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzySuggestion {
    pub entity_id: EntityId,
    pub name: String,
    pub score: f32,
}

/// A candidate reference to an entity, pending human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discovery {
    /// Normalized identity.
    pub key: DiscoveryKey,
    /// Name as it should be displayed and stored.
    pub name: String,
    /// Best guess at the entity kind; `None` is unclassified.
    pub suggested_kind: Option<EntityKind>,
    /// Text surrounding the mention.
    pub context: String,
    /// Review state.
    pub status: DiscoveryStatus,
    /// Everything that produced this Discovery.
    pub sources: BTreeSet<DiscoverySource>,
    /// Relationship to use instead of the inferred one.
    pub relationship: Option<RelationshipKind>,
    /// Likely existing match, offered for linking.
    pub suggestion: Option<FuzzySuggestion>,
    /// Displayed confidence that this is a real entity reference (0.0 to 1.0).
    pub confidence: f32,
}

impl Discovery {
    /// Create a pending Discovery from a raw name.
    pub fn new(raw_name: &str, source: DiscoverySource) -> Option<Self> {
        let (name, description) = split_descriptor(raw_name);
        let key = DiscoveryKey::from_clean(&name)?;
        Some(Self {
            key,
            name,
            suggested_kind: None,
            context: description.unwrap_or_default(),
            status: DiscoveryStatus::Pending,
            sources: BTreeSet::from([source]),
            relationship: None,
            suggestion: None,
            confidence: 0.5,
        })
    }

    /// Create a Discovery the user added by hand, already decided.
    pub fn manual(raw_name: &str, kind: Option<EntityKind>, status: DiscoveryStatus) -> Option<Self> {
        let mut discovery = Self::new(raw_name, DiscoverySource::Manual)?;
        discovery.suggested_kind = kind;
        discovery.status = status;
        discovery.confidence = 1.0;
        Some(discovery)
    }

    /// Set the suggested kind.
    pub fn with_kind(mut self, kind: Option<EntityKind>) -> Self {
        self.suggested_kind = kind;
        self
    }

    /// Set the context snippet.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Set the relationship override.
    pub fn with_relationship(mut self, relationship: RelationshipKind) -> Self {
        self.relationship = Some(relationship);
        self
    }

    /// Set the confidence.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Attach a fuzzy match suggestion, raising confidence.
    pub fn with_suggestion(mut self, suggestion: FuzzySuggestion) -> Self {
        self.confidence = self.confidence.max(suggestion.score).clamp(0.0, 1.0);
        self.suggestion = Some(suggestion);
        self
    }

    /// Display label for the suggested kind.
    pub fn kind_label(&self) -> &'static str {
        self.suggested_kind.map_or("unclassified", |k| k.as_str())
    }

    /// The highest-precedence source of this Discovery.
    pub fn primary_source(&self) -> Option<&DiscoverySource> {
        self.sources.iter().next_back()
    }
}

/// An ordered batch of Discoveries with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryBatch {
    items: Vec<Discovery>,
}

impl DiscoveryBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a Discovery, merging with an existing one that shares its key.
    pub fn push(&mut self, discovery: Discovery) {
        match self.items.iter_mut().find(|d| d.key == discovery.key) {
            Some(existing) => *existing = merge(existing.clone(), discovery),
            None => self.items.push(discovery),
        }
    }

    pub fn get(&self, key: &DiscoveryKey) -> Option<&Discovery> {
        self.items.iter().find(|d| &d.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Discovery> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<Discovery> {
        self.items
    }
}

impl FromIterator<Discovery> for DiscoveryBatch {
    fn from_iter<I: IntoIterator<Item = Discovery>>(iter: I) -> Self {
        let mut batch = DiscoveryBatch::new();
        for discovery in iter {
            batch.push(discovery);
        }
        batch
    }
}

impl IntoIterator for DiscoveryBatch {
    type Item = Discovery;
    type IntoIter = std::vec::IntoIter<Discovery>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
