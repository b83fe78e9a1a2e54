//! Campaign knowledge graph model.
//!
//! ```text
//! ┌──────────────┐  facts (append-only)  ┌──────────────┐
//! │    Entity    │◄──────────────────────│     Fact     │
//! │ (id, kind,   │                       │ (category,   │
//! │  lifecycle)  │◄────┐                 │  sequence)   │
//! └──────────────┘     │ source/target   └──────────────┘
//!                ┌─────┴────────┐
//!                │ Relationship │
//!                └──────────────┘
//! ```

mod entity;
mod fact;
mod relationship;

pub use entity::{
    CampaignId, Entity, EntityDraft, EntityId, EntityKind, Lifecycle, RosterEntry, Visibility,
};
pub use fact::{latest_by_category, Fact, FactCategory, FactId, FactSource, NewFact};
pub use relationship::{NewRelationship, Relationship, RelationshipId, RelationshipKind};
