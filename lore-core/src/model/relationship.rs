//! Relationships between entities.

use super::entity::{CampaignId, EntityId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipId(Uuid);

impl RelationshipId {
    /// Create a new unique relationship ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RelationshipId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical relationship labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// Generic fallback for pairs without a specific label.
    ConnectedTo,

    // Spatial
    /// Parent place contains a child place.
    Contains,
    /// Child place sits within a parent place.
    LocatedWithin,
    /// A place is home to a character or creature.
    InhabitedBy,
    /// A creature or character is found at a place.
    FoundIn,

    // Organizational
    /// A place is under a faction's control.
    ControlledBy,
    /// A character belongs to a faction.
    MemberOf,
    /// Two factions or characters are allied.
    AlliedWith,
    /// A character or faction holds an item.
    Owns,
    /// Two characters know each other.
    Knows,

    // Quests and encounters
    /// A quest or encounter happens at a place.
    TakesPlaceAt,
    /// A quest is handed out by a character.
    GivenBy,
    /// A quest or encounter involves a creature or faction.
    Involves,
    /// A quest or encounter yields an item.
    Rewards,
    /// An encounter features a character.
    Features,
}

impl RelationshipKind {
    /// Get the snake_case label used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::ConnectedTo => "connected_to",
            RelationshipKind::Contains => "contains",
            RelationshipKind::LocatedWithin => "located_within",
            RelationshipKind::InhabitedBy => "inhabited_by",
            RelationshipKind::FoundIn => "found_in",
            RelationshipKind::ControlledBy => "controlled_by",
            RelationshipKind::MemberOf => "member_of",
            RelationshipKind::AlliedWith => "allied_with",
            RelationshipKind::Owns => "owns",
            RelationshipKind::Knows => "knows",
            RelationshipKind::TakesPlaceAt => "takes_place_at",
            RelationshipKind::GivenBy => "given_by",
            RelationshipKind::Involves => "involves",
            RelationshipKind::Rewards => "rewards",
            RelationshipKind::Features => "features",
        }
    }

    /// Get the display name.
    pub fn name(&self) -> &'static str {
        match self {
            RelationshipKind::ConnectedTo => "connected to",
            RelationshipKind::Contains => "contains",
            RelationshipKind::LocatedWithin => "located within",
            RelationshipKind::InhabitedBy => "inhabited by",
            RelationshipKind::FoundIn => "found in",
            RelationshipKind::ControlledBy => "controlled by",
            RelationshipKind::MemberOf => "member of",
            RelationshipKind::AlliedWith => "allied with",
            RelationshipKind::Owns => "owns",
            RelationshipKind::Knows => "knows",
            RelationshipKind::TakesPlaceAt => "takes place at",
            RelationshipKind::GivenBy => "given by",
            RelationshipKind::Involves => "involves",
            RelationshipKind::Rewards => "rewards",
            RelationshipKind::Features => "features",
        }
    }

    /// Get the inverse relationship kind (if applicable).
    pub fn inverse(&self) -> Option<RelationshipKind> {
        match self {
            RelationshipKind::Contains => Some(RelationshipKind::LocatedWithin),
            RelationshipKind::LocatedWithin => Some(RelationshipKind::Contains),
            RelationshipKind::InhabitedBy => Some(RelationshipKind::FoundIn),
            RelationshipKind::FoundIn => Some(RelationshipKind::InhabitedBy),
            // Symmetric relationships
            RelationshipKind::ConnectedTo
            | RelationshipKind::AlliedWith
            | RelationshipKind::Knows => Some(*self),
            // One-directional relationships
            _ => None,
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed relationship between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Unique identifier.
    pub id: RelationshipId,
    /// Owning campaign.
    pub campaign: CampaignId,
    /// The source entity.
    pub source: EntityId,
    /// The target entity.
    pub target: EntityId,
    /// Kind of relationship.
    pub kind: RelationshipKind,
    /// Optional description or context.
    pub description: Option<String>,
    /// Whether this relationship is still active.
    pub is_active: bool,
    /// When this relationship was created.
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    /// Check if this relationship involves a specific entity.
    pub fn involves(&self, entity_id: EntityId) -> bool {
        self.source == entity_id || self.target == entity_id
    }

    /// Get the other entity in the relationship.
    pub fn other(&self, entity_id: EntityId) -> Option<EntityId> {
        if self.source == entity_id {
            Some(self.target)
        } else if self.target == entity_id {
            Some(self.source)
        } else {
            None
        }
    }
}

/// A relationship to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRelationship {
    pub source: EntityId,
    pub target: EntityId,
    pub kind: RelationshipKind,
    pub description: Option<String>,
}

impl NewRelationship {
    /// Create a new relationship between entities.
    pub fn new(source: EntityId, target: EntityId, kind: RelationshipKind) -> Self {
        Self {
            source,
            target,
            kind,
            description: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Materialize as an active edge in a campaign.
    pub fn into_relationship(self, campaign: CampaignId) -> Relationship {
        Relationship {
            id: RelationshipId::new(),
            campaign,
            source: self.source,
            target: self.target,
            kind: self.kind,
            description: self.description,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_creation() {
        let guild = EntityId::new();
        let vale = EntityId::new();

        let rel = NewRelationship::new(vale, guild, RelationshipKind::MemberOf)
            .with_description("Sworn in last winter")
            .into_relationship(CampaignId::new());

        assert!(rel.involves(guild));
        assert!(rel.involves(vale));
        assert_eq!(rel.other(vale), Some(guild));
        assert!(rel.is_active);
    }

    #[test]
    fn test_relationship_inverse() {
        assert_eq!(
            RelationshipKind::Contains.inverse(),
            Some(RelationshipKind::LocatedWithin)
        );
        assert_eq!(
            RelationshipKind::Knows.inverse(),
            Some(RelationshipKind::Knows)
        );
        assert_eq!(RelationshipKind::Owns.inverse(), None);
    }

    #[test]
    fn test_labels_are_snake_case_on_the_wire() {
        let json = serde_json::to_string(&RelationshipKind::TakesPlaceAt).unwrap();
        assert_eq!(json, "\"takes_place_at\"");
        assert_eq!(RelationshipKind::TakesPlaceAt.as_str(), "takes_place_at");
    }
}
