//! Discoveries from generated sub-object lists.
//!
//! Generators return typed lists next to the narrative, e.g. the `contains`
//! list of a location or the `key_members` of a faction. Each list item is a
//! reference to another entity and becomes a Discovery without any scanning.

use super::{Discovery, DiscoveryBatch, DiscoverySource, FuzzySuggestion, MatchIndex, MatchOutcome};
use crate::model::{EntityKind, RelationshipKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A named list of references produced alongside generated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredField {
    pub name: String,
    pub items: Vec<String>,
}

impl StructuredField {
    pub fn new(name: impl Into<String>, items: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            items: items.into_iter().map(Into::into).collect(),
        }
    }
}

/// How the items of one field are classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Kind of the entities the field refers to.
    pub kind: EntityKind,
    /// Edge to create instead of the inferred one, from the authored entity.
    pub relationship: Option<RelationshipKind>,
}

impl FieldSpec {
    const fn of(kind: EntityKind) -> Self {
        Self {
            kind,
            relationship: None,
        }
    }

    const fn with(kind: EntityKind, relationship: RelationshipKind) -> Self {
        Self {
            kind,
            relationship: Some(relationship),
        }
    }
}

/// Look up the spec for a field of an authored entity kind.
pub fn field_spec(authored: EntityKind, field: &str) -> Option<FieldSpec> {
    use EntityKind::*;
    use RelationshipKind as R;

    let spec = match (authored, field) {
        (Location, "contains" | "sub_locations" | "districts") => FieldSpec::of(Location),
        (Location, "parent" | "region") => FieldSpec::with(Location, R::LocatedWithin),
        (Location, "inhabitants" | "notable_npcs" | "npcs") => FieldSpec::of(Npc),
        (Location, "factions") => FieldSpec::of(Faction),
        (Location, "creatures") => FieldSpec::of(Creature),
        (Location, "items" | "treasures") => FieldSpec::of(Item),

        (Faction, "key_members" | "leaders" | "members") => FieldSpec::of(Npc),
        (Faction, "headquarters" | "territory") => FieldSpec::of(Location),
        (Faction, "allies") => FieldSpec::with(Faction, R::AlliedWith),

        (Encounter, "creatures" | "enemies") => FieldSpec::of(Creature),
        (Encounter, "npcs") => FieldSpec::of(Npc),
        (Encounter, "rewards" | "loot") => FieldSpec::of(Item),
        (Encounter, "location") => FieldSpec::of(Location),

        (Quest, "locations") => FieldSpec::of(Location),
        (Quest, "quest_giver" | "npcs") => FieldSpec::of(Npc),
        (Quest, "rewards") => FieldSpec::with(Item, R::Rewards),
        (Quest, "creatures" | "antagonists") => FieldSpec::of(Creature),

        (Npc, "possessions" | "inventory") => FieldSpec::of(Item),
        (Npc, "affiliations" | "factions") => FieldSpec::of(Faction),
        (Npc, "home" | "residence") => FieldSpec::with(Location, R::LocatedWithin),
        (Npc, "contacts" | "allies") => FieldSpec::of(Npc),

        (Creature, "lair" | "habitat") => FieldSpec::with(Location, R::LocatedWithin),
        (Creature, "treasure") => FieldSpec::of(Item),

        (Item, "owner") => FieldSpec::of(Npc),
        (Item, "location") => FieldSpec::with(Location, R::FoundIn),

        _ => return None,
    };
    Some(spec)
}

/// Turn one structured field into pending Discoveries.
///
/// Items naming a known entity are kept and carry a link suggestion, since
/// the generator explicitly asked for the reference.
pub fn extract_field(authored: EntityKind, field: &StructuredField, index: &MatchIndex) -> DiscoveryBatch {
    let Some(spec) = field_spec(authored, &field.name) else {
        debug!(kind = %authored, field = %field.name, "no extraction rule for field");
        return DiscoveryBatch::new();
    };

    let mut batch = DiscoveryBatch::new();
    for item in &field.items {
        let source = DiscoverySource::Structured {
            field: field.name.clone(),
        };
        let Some(mut discovery) = Discovery::new(item, source) else {
            continue;
        };
        discovery = discovery.with_kind(Some(spec.kind)).with_confidence(0.9);
        if let Some(relationship) = spec.relationship {
            discovery = discovery.with_relationship(relationship);
        }

        let matched = match index.match_key(&discovery.key) {
            MatchOutcome::Exact(id) => Some((id, 1.0)),
            MatchOutcome::Fuzzy { id, score } => Some((id, score)),
            MatchOutcome::None => None,
        };
        if let Some((id, score)) = matched {
            if let Some(name) = index.name_of(id) {
                discovery = discovery.with_suggestion(FuzzySuggestion {
                    entity_id: id,
                    name: name.to_string(),
                    score,
                });
            }
        }
        batch.push(discovery);
    }
    batch
}
