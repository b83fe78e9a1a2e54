//! Relationship types between an authored entity and the things it mentions.
//!
//! One static table covers every pair of entity kinds the review flow links.
//! Rows constrained by sub-kind win over plain rows; anything unmapped falls
//! back to `connected_to`.

use crate::model::{EntityId, EntityKind, RelationshipKind};
use serde::{Deserialize, Serialize};

/// Which way an inferred edge points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Authored entity is the edge source.
    Forward,
    /// Discovered entity is the edge source.
    Reverse,
}

/// An edge type plus the orientation to store it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InferredEdge {
    pub kind: RelationshipKind,
    pub direction: Direction,
}

impl InferredEdge {
    pub const fn forward(kind: RelationshipKind) -> Self {
        Self {
            kind,
            direction: Direction::Forward,
        }
    }

    pub const fn reverse(kind: RelationshipKind) -> Self {
        Self {
            kind,
            direction: Direction::Reverse,
        }
    }

    /// `(source, target)` for an edge between the authored and the discovered entity.
    pub fn endpoints(&self, authored: EntityId, discovered: EntityId) -> (EntityId, EntityId) {
        match self.direction {
            Direction::Forward => (authored, discovered),
            Direction::Reverse => (discovered, authored),
        }
    }
}

/// One row of the inference table.
#[derive(Debug, Clone, Copy)]
pub struct InferenceRule {
    pub source: EntityKind,
    pub source_sub_kind: Option<&'static str>,
    pub target: EntityKind,
    pub target_sub_kind: Option<&'static str>,
    pub edge: InferredEdge,
}

impl InferenceRule {
    const fn new(source: EntityKind, target: EntityKind, edge: InferredEdge) -> Self {
        Self {
            source,
            source_sub_kind: None,
            target,
            target_sub_kind: None,
            edge,
        }
    }

    const fn source_sub(mut self, sub_kind: &'static str) -> Self {
        self.source_sub_kind = Some(sub_kind);
        self
    }

    const fn target_sub(mut self, sub_kind: &'static str) -> Self {
        self.target_sub_kind = Some(sub_kind);
        self
    }

    /// Number of sub-kind constraints, or `None` when the row does not apply.
    fn specificity(&self, source: EntityKind, source_sub: Option<&str>, target: EntityKind, target_sub: Option<&str>) -> Option<u8> {
        if self.source != source || self.target != target {
            return None;
        }
        let mut score = 0;
        for (wanted, actual) in [(self.source_sub_kind, source_sub), (self.target_sub_kind, target_sub)] {
            if let Some(wanted) = wanted {
                match actual {
                    Some(actual) if actual.trim().eq_ignore_ascii_case(wanted) => score += 1,
                    _ => return None,
                }
            }
        }
        Some(score)
    }
}

use EntityKind::{Creature, Encounter, Faction, Item, Location, Npc, Quest};
use RelationshipKind as R;

const FALLBACK: InferredEdge = InferredEdge::forward(R::ConnectedTo);

/// Authored kind first, discovered kind second.
pub static RULES: &[InferenceRule] = &[
    // Locations
    InferenceRule::new(Location, Npc, InferredEdge::forward(R::InhabitedBy)),
    InferenceRule::new(Location, Location, InferredEdge::forward(R::Contains)),
    InferenceRule::new(Location, Location, InferredEdge::forward(R::LocatedWithin)).target_sub("region"),
    InferenceRule::new(Location, Location, InferredEdge::forward(R::LocatedWithin)).target_sub("kingdom"),
    InferenceRule::new(Location, Location, InferredEdge::forward(R::LocatedWithin)).target_sub("continent"),
    InferenceRule::new(Location, Faction, InferredEdge::forward(R::ControlledBy)),
    InferenceRule::new(Location, Item, InferredEdge::reverse(R::FoundIn)),
    InferenceRule::new(Location, Item, InferredEdge::forward(R::Contains)).source_sub("shop"),
    InferenceRule::new(Location, Creature, InferredEdge::forward(R::InhabitedBy)),
    InferenceRule::new(Location, Quest, InferredEdge::reverse(R::TakesPlaceAt)),
    InferenceRule::new(Location, Encounter, InferredEdge::reverse(R::TakesPlaceAt)),
    // Factions
    InferenceRule::new(Faction, Npc, InferredEdge::reverse(R::MemberOf)),
    InferenceRule::new(Faction, Location, InferredEdge::reverse(R::ControlledBy)),
    InferenceRule::new(Faction, Item, InferredEdge::forward(R::Owns)),
    InferenceRule::new(Faction, Quest, InferredEdge::reverse(R::GivenBy)),
    // Quests
    InferenceRule::new(Quest, Location, InferredEdge::forward(R::TakesPlaceAt)),
    InferenceRule::new(Quest, Npc, InferredEdge::forward(R::GivenBy)),
    InferenceRule::new(Quest, Creature, InferredEdge::forward(R::Involves)),
    InferenceRule::new(Quest, Faction, InferredEdge::forward(R::Involves)),
    InferenceRule::new(Quest, Item, InferredEdge::forward(R::Rewards)),
    InferenceRule::new(Quest, Encounter, InferredEdge::forward(R::Features)),
    // Encounters
    InferenceRule::new(Encounter, Creature, InferredEdge::forward(R::Features)),
    InferenceRule::new(Encounter, Npc, InferredEdge::forward(R::Involves)),
    InferenceRule::new(Encounter, Location, InferredEdge::forward(R::TakesPlaceAt)),
    InferenceRule::new(Encounter, Item, InferredEdge::forward(R::Rewards)),
    InferenceRule::new(Encounter, Quest, InferredEdge::reverse(R::Features)),
    // Items
    InferenceRule::new(Item, Npc, InferredEdge::reverse(R::Owns)),
    InferenceRule::new(Item, Faction, InferredEdge::reverse(R::Owns)),
    InferenceRule::new(Item, Creature, InferredEdge::reverse(R::Owns)),
    InferenceRule::new(Item, Location, InferredEdge::forward(R::FoundIn)),
    InferenceRule::new(Item, Quest, InferredEdge::reverse(R::Rewards)),
    // Creatures
    InferenceRule::new(Creature, Location, InferredEdge::forward(R::LocatedWithin)),
    InferenceRule::new(Creature, Item, InferredEdge::forward(R::Owns)),
    InferenceRule::new(Creature, Encounter, InferredEdge::reverse(R::Features)),
    // NPCs
    InferenceRule::new(Npc, Item, InferredEdge::forward(R::Owns)),
    InferenceRule::new(Npc, Faction, InferredEdge::forward(R::MemberOf)),
    InferenceRule::new(Npc, Npc, InferredEdge::forward(R::Knows)),
    InferenceRule::new(Npc, Location, InferredEdge::forward(R::LocatedWithin)),
    InferenceRule::new(Npc, Quest, InferredEdge::reverse(R::GivenBy)),
    InferenceRule::new(Npc, Encounter, InferredEdge::reverse(R::Involves)),
];

/// Infer the edge between an authored entity and a discovered one.
///
/// Total: every pair yields an edge.
pub fn infer(
    source: EntityKind,
    source_sub_kind: Option<&str>,
    target: EntityKind,
    target_sub_kind: Option<&str>,
) -> InferredEdge {
    let mut best: Option<(u8, InferredEdge)> = None;
    for rule in RULES {
        if let Some(score) = rule.specificity(source, source_sub_kind, target, target_sub_kind) {
            if best.map_or(true, |(best_score, _)| score > best_score) {
                best = Some((score, rule.edge));
            }
        }
    }
    best.map_or(FALLBACK, |(_, edge)| edge)
}
