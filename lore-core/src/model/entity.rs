//! Entity types for the campaign knowledge graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a campaign (the top-level namespace of a world).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CampaignId(Uuid);

impl CampaignId {
    /// Create a new unique campaign ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CampaignId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Create a new unique entity ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kinds of entities that can be tracked in a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A non-player character.
    Npc,
    /// A geographic location or place.
    Location,
    /// An item, artifact, or object.
    Item,
    /// An organization, faction, or group.
    Faction,
    /// A quest, mission, or objective.
    Quest,
    /// A creature type or specific monster.
    Creature,
    /// A prepared encounter.
    Encounter,
}

impl EntityKind {
    /// Every kind, in declaration order.
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Npc,
        EntityKind::Location,
        EntityKind::Item,
        EntityKind::Faction,
        EntityKind::Quest,
        EntityKind::Creature,
        EntityKind::Encounter,
    ];

    /// Get the display name for this entity kind.
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Npc => "NPC",
            EntityKind::Location => "Location",
            EntityKind::Item => "Item",
            EntityKind::Faction => "Faction",
            EntityKind::Quest => "Quest",
            EntityKind::Creature => "Creature",
            EntityKind::Encounter => "Encounter",
        }
    }

    /// Get the snake_case label used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Npc => "npc",
            EntityKind::Location => "location",
            EntityKind::Item => "item",
            EntityKind::Faction => "faction",
            EntityKind::Quest => "quest",
            EntityKind::Creature => "creature",
            EntityKind::Encounter => "encounter",
        }
    }

    /// Parse a kind label, accepting the common synonyms generators emit.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "npc" | "character" | "person" => Some(EntityKind::Npc),
            "location" | "place" | "region" => Some(EntityKind::Location),
            "item" | "object" | "artifact" => Some(EntityKind::Item),
            "faction" | "organization" | "organisation" | "group" => Some(EntityKind::Faction),
            "quest" | "mission" => Some(EntityKind::Quest),
            "creature" | "monster" => Some(EntityKind::Creature),
            "encounter" => Some(EntityKind::Encounter),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Auto-created placeholder awaiting elaboration.
    Stub,
    /// Fully authored.
    #[default]
    Active,
    /// Retired from play but kept for history.
    Archived,
}

/// Who may see an entity or fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Visible to players.
    #[default]
    Public,
    /// Visible to the game master only.
    GmOnly,
}

/// An entity tracked in a campaign (NPC, location, item, etc.).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier.
    pub id: EntityId,
    /// Owning campaign.
    pub campaign: CampaignId,
    /// What kind of entity this is.
    pub kind: EntityKind,
    /// Finer classification within the kind ("tavern", "guild", ...).
    pub sub_kind: Option<String>,
    /// Primary name of the entity.
    pub name: String,
    /// Alternative names or nicknames.
    pub aliases: Vec<String>,
    /// Brief description (optional).
    pub description: Option<String>,
    /// Structured, kind-specific fields.
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Lifecycle status.
    pub lifecycle: Lifecycle,
    /// Flagged for later human elaboration.
    pub needs_review: bool,
    /// Who may see this entity.
    pub visibility: Visibility,
    /// Text the entity was discovered in, for stubs.
    pub origin_context: Option<String>,
    /// Soft-delete flag. Deleted entities are never physically removed.
    pub deleted: bool,
    /// When this entity was created.
    pub created_at: DateTime<Utc>,
    /// When this entity was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Materialize a draft as a new entity in a campaign.
    pub fn from_draft(campaign: CampaignId, draft: EntityDraft) -> Self {
        let now = Utc::now();
        Self {
            id: EntityId::new(),
            campaign,
            kind: draft.kind,
            sub_kind: draft.sub_kind,
            name: draft.name,
            aliases: draft.aliases,
            description: draft.description,
            fields: draft.fields,
            lifecycle: draft.lifecycle,
            needs_review: draft.needs_review,
            visibility: draft.visibility,
            origin_context: draft.origin_context,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the authored content of this entity with a draft.
    ///
    /// Completing a stub with an active draft promotes it and clears the review flag.
    pub fn apply_draft(&mut self, draft: EntityDraft) {
        self.kind = draft.kind;
        self.sub_kind = draft.sub_kind;
        self.name = draft.name;
        for alias in draft.aliases {
            if !self.aliases.iter().any(|a| a.eq_ignore_ascii_case(&alias)) {
                self.aliases.push(alias);
            }
        }
        if draft.description.is_some() {
            self.description = draft.description;
        }
        self.fields.extend(draft.fields);
        self.visibility = draft.visibility;
        self.lifecycle = draft.lifecycle;
        self.needs_review = draft.needs_review;
        self.updated_at = Utc::now();
    }

    /// Check if a name matches this entity (case-insensitive).
    pub fn matches_name(&self, query: &str) -> bool {
        let query_lower = query.to_lowercase();
        if self.name.to_lowercase() == query_lower {
            return true;
        }
        self.aliases.iter().any(|a| a.to_lowercase() == query_lower)
    }

    /// Check if a name partially matches this entity (for fuzzy lookup).
    pub fn matches_partial(&self, query: &str) -> bool {
        let query_lower = query.to_lowercase();
        if self.name.to_lowercase().contains(&query_lower) {
            return true;
        }
        self.aliases.iter().any(|a| a.to_lowercase().contains(&query_lower))
    }

    /// Whether this entity is an unelaborated stub.
    pub fn is_stub(&self) -> bool {
        self.lifecycle == Lifecycle::Stub
    }

    /// The roster view of this entity used for dedup.
    pub fn roster_entry(&self) -> RosterEntry {
        RosterEntry {
            id: self.id,
            name: self.name.clone(),
            aliases: self.aliases.clone(),
            kind: self.kind,
            sub_kind: self.sub_kind.clone(),
        }
    }
}

/// Content for creating or completing an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDraft {
    pub kind: EntityKind,
    pub sub_kind: Option<String>,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    #[serde(default)]
    pub needs_review: bool,
    #[serde(default)]
    pub visibility: Visibility,
    pub origin_context: Option<String>,
}

impl EntityDraft {
    /// Create a draft for a fully authored entity.
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            sub_kind: None,
            name: name.into(),
            aliases: Vec::new(),
            description: None,
            fields: Map::new(),
            lifecycle: Lifecycle::Active,
            needs_review: false,
            visibility: Visibility::Public,
            origin_context: None,
        }
    }

    /// Create a minimal stub draft flagged for review.
    pub fn stub(kind: EntityKind, name: impl Into<String>, context: impl Into<String>) -> Self {
        let context = context.into();
        Self {
            lifecycle: Lifecycle::Stub,
            needs_review: true,
            origin_context: (!context.is_empty()).then_some(context),
            ..Self::new(kind, name)
        }
    }

    /// Set the sub-kind.
    pub fn with_sub_kind(mut self, sub_kind: impl Into<String>) -> Self {
        self.sub_kind = Some(sub_kind.into());
        self
    }

    /// Add an alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set a structured field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Set the visibility.
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }
}

/// The slice of an entity the roster query exposes: enough to dedup names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub kind: EntityKind,
    pub sub_kind: Option<String>,
}

impl RosterEntry {
    /// Create a roster entry without aliases.
    pub fn new(id: EntityId, name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id,
            name: name.into(),
            aliases: Vec::new(),
            kind,
            sub_kind: None,
        }
    }
}
