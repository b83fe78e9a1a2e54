//! Contradictions between generated claims and recorded facts.
//!
//! Categories fall into three groups:
//!
//! - structured (status, possession, quantity, location): one comparable
//!   value per entity, any difference is a conflict;
//! - stable free text (appearance, personality, backstory, capability):
//!   differences are flagged for human judgement when the policy asks for it;
//! - additive (event, motivation, relationship, secret): new facts accumulate
//!   and never conflict.

use crate::model::{latest_by_category, EntityId, Fact, FactCategory, FactId};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

lazy_static! {
    static ref NUMBER: Regex = Regex::new(r"-?\d+(?:\.\d+)?").unwrap();
}

/// Who a generated claim is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum ClaimSubject {
    /// The entity being authored.
    Authored,
    /// An entity referred to by name.
    Named(String),
    /// An entity the generator already had the id of.
    Entity(EntityId),
}

/// A statement about an entity attribute produced by the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeClaim {
    pub subject: ClaimSubject,
    pub category: FactCategory,
    pub value: String,
}

impl AttributeClaim {
    pub fn new(subject: ClaimSubject, category: FactCategory, value: impl Into<String>) -> Self {
        Self {
            subject,
            category,
            value: value.into(),
        }
    }

    /// A claim about a named entity.
    pub fn named(name: impl Into<String>, category: FactCategory, value: impl Into<String>) -> Self {
        Self::new(ClaimSubject::Named(name.into()), category, value)
    }
}

/// A claim whose subject has been resolved to a known entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedClaim {
    pub entity: EntityId,
    pub entity_name: String,
    pub category: FactCategory,
    pub value: String,
}

/// Which differences are reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictPolicy {
    /// Report differences in stable free-text categories.
    pub flag_free_text: bool,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self {
            flag_free_text: true,
        }
    }
}

impl ConflictPolicy {
    /// Classify a category, or `None` when it never conflicts.
    pub fn kind_for(&self, category: FactCategory) -> Option<ConflictKind> {
        if category.is_structured() {
            Some(ConflictKind::Structured)
        } else if category.is_stable() && self.flag_free_text {
            Some(ConflictKind::FreeText)
        } else {
            None
        }
    }
}

/// Identity of a conflict: one per entity attribute per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConflictKey {
    pub entity: EntityId,
    pub category: FactCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Structured,
    FreeText,
}

/// How the user settled a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "resolution", content = "note")]
pub enum Resolution {
    #[default]
    Unresolved,
    KeepOld,
    TakeNew,
    /// A hand-written reconciliation of both values.
    MergedNote(String),
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Resolution::Unresolved)
    }
}

/// A generated claim that contradicts the recorded value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub key: ConflictKey,
    pub entity_name: String,
    pub kind: ConflictKind,
    pub new_text: String,
    pub old_text: String,
    /// The recorded fact being contradicted.
    pub old_fact: FactId,
    pub resolution: Resolution,
}

impl Conflict {
    pub fn category(&self) -> FactCategory {
        self.key.category
    }

    /// Human-readable identity, e.g. `Captain Vale/Status`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.entity_name, self.key.category.name())
    }

    /// The value to record on commit, if the conflict is resolved.
    pub fn kept_value(&self) -> Option<&str> {
        match &self.resolution {
            Resolution::Unresolved => None,
            Resolution::KeepOld => Some(&self.old_text),
            Resolution::TakeNew => Some(&self.new_text),
            Resolution::MergedNote(note) => Some(note),
        }
    }
}

/// Compare claims against the latest recorded facts.
///
/// Claims about the same entity attribute collapse; the latest claim wins.
/// Conflicts come out in first-claim order.
pub fn detect(claims: &[ResolvedClaim], stored: &[Fact], policy: &ConflictPolicy) -> Vec<Conflict> {
    let mut order: Vec<ConflictKey> = Vec::new();
    let mut latest_claims: HashMap<ConflictKey, &ResolvedClaim> = HashMap::new();
    for claim in claims {
        let key = ConflictKey {
            entity: claim.entity,
            category: claim.category,
        };
        if latest_claims.insert(key, claim).is_none() {
            order.push(key);
        }
    }

    let latest_facts = latest_by_category(stored);
    order
        .into_iter()
        .filter_map(|key| {
            let kind = policy.kind_for(key.category)?;
            let claim = latest_claims.get(&key)?;
            let fact = latest_facts.get(&(key.entity, key.category))?;
            let differs = match kind {
                ConflictKind::Structured => structured_differs(key.category, &claim.value, &fact.content),
                ConflictKind::FreeText => free_text_differs(&claim.value, &fact.content),
            };
            differs.then(|| Conflict {
                key,
                entity_name: claim.entity_name.clone(),
                kind,
                new_text: claim.value.trim().to_string(),
                old_text: fact.content.clone(),
                old_fact: fact.id,
                resolution: Resolution::Unresolved,
            })
        })
        .collect()
}

/// Lowercase, collapse whitespace, drop trailing punctuation.
fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', '!', ';', ','])
        .to_lowercase()
}

fn structured_differs(category: FactCategory, new: &str, old: &str) -> bool {
    if category == FactCategory::Quantity {
        if let (Some(a), Some(b)) = (leading_number(new), leading_number(old)) {
            return (a - b).abs() > f64::EPSILON;
        }
    }
    normalize(new) != normalize(old)
}

fn free_text_differs(new: &str, old: &str) -> bool {
    let (new, old) = (normalize(new), normalize(old));
    !new.is_empty() && !old.contains(&new)
}

fn leading_number(value: &str) -> Option<f64> {
    NUMBER.find(value)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FactSource, NewFact};

    fn fact(subject: EntityId, category: FactCategory, content: &str, sequence: u64) -> Fact {
        NewFact::new(subject, category, content, FactSource::Generated).into_fact(sequence)
    }

    fn claim(entity: EntityId, category: FactCategory, value: &str) -> ResolvedClaim {
        ResolvedClaim {
            entity,
            entity_name: "Captain Vale".to_string(),
            category,
            value: value.to_string(),
        }
    }

    #[test]
    fn test_structured_difference_is_a_conflict() {
        let vale = EntityId::new();
        let stored = vec![fact(vale, FactCategory::Status, "alive", 1)];
        let conflicts = detect(
            &[claim(vale, FactCategory::Status, "dead")],
            &stored,
            &ConflictPolicy::default(),
        );

        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        assert_eq!(conflict.kind, ConflictKind::Structured);
        assert_eq!(conflict.old_text, "alive");
        assert_eq!(conflict.new_text, "dead");
        assert_eq!(conflict.old_fact, stored[0].id);
        assert_eq!(conflict.kept_value(), None);
    }

    #[test]
    fn test_normalized_equal_values_do_not_conflict() {
        let vale = EntityId::new();
        let stored = vec![
            fact(vale, FactCategory::Status, "Alive.", 1),
            fact(vale, FactCategory::Quantity, "12 gold", 2),
        ];
        let conflicts = detect(
            &[
                claim(vale, FactCategory::Status, "  alive "),
                claim(vale, FactCategory::Quantity, "12.0 gold pieces"),
            ],
            &stored,
            &ConflictPolicy::default(),
        );
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_only_latest_fact_is_compared() {
        let vale = EntityId::new();
        let stored = vec![
            fact(vale, FactCategory::Location, "Saltmarsh", 5),
            fact(vale, FactCategory::Location, "the Sea Lion", 2),
        ];
        let same = detect(
            &[claim(vale, FactCategory::Location, "saltmarsh")],
            &stored,
            &ConflictPolicy::default(),
        );
        assert!(same.is_empty());
    }

    #[test]
    fn test_free_text_policy() {
        let vale = EntityId::new();
        let stored = vec![fact(vale, FactCategory::Appearance, "a tall woman with a salt-stained coat", 1)];
        let claims = [claim(vale, FactCategory::Appearance, "short and stout")];

        let flagged = detect(&claims, &stored, &ConflictPolicy::default());
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].kind, ConflictKind::FreeText);

        let quiet = detect(&claims, &stored, &ConflictPolicy { flag_free_text: false });
        assert!(quiet.is_empty());

        let subset = detect(
            &[claim(vale, FactCategory::Appearance, "salt-stained coat")],
            &stored,
            &ConflictPolicy::default(),
        );
        assert!(subset.is_empty());
    }

    #[test]
    fn test_additive_categories_never_conflict() {
        let vale = EntityId::new();
        let stored = vec![fact(vale, FactCategory::Event, "sank the Gull", 1)];
        let conflicts = detect(
            &[claim(vale, FactCategory::Event, "raided Saltmarsh")],
            &stored,
            &ConflictPolicy::default(),
        );
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_claims_collapse_latest_wins() {
        let vale = EntityId::new();
        let stored = vec![fact(vale, FactCategory::Status, "alive", 1)];
        let conflicts = detect(
            &[
                claim(vale, FactCategory::Status, "missing"),
                claim(vale, FactCategory::Status, "dead"),
            ],
            &stored,
            &ConflictPolicy::default(),
        );
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].new_text, "dead");
    }

    #[test]
    fn test_no_stored_fact_means_no_conflict() {
        let vale = EntityId::new();
        let conflicts = detect(
            &[claim(vale, FactCategory::Status, "dead")],
            &[],
            &ConflictPolicy::default(),
        );
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_kept_value_per_resolution() {
        let vale = EntityId::new();
        let stored = vec![fact(vale, FactCategory::Status, "alive", 1)];
        let mut conflict = detect(
            &[claim(vale, FactCategory::Status, "dead")],
            &stored,
            &ConflictPolicy::default(),
        )
        .remove(0);

        conflict.resolution = Resolution::KeepOld;
        assert_eq!(conflict.kept_value(), Some("alive"));
        conflict.resolution = Resolution::TakeNew;
        assert_eq!(conflict.kept_value(), Some("dead"));
        conflict.resolution = Resolution::MergedNote("presumed dead".to_string());
        assert_eq!(conflict.kept_value(), Some("presumed dead"));
    }
}
