//! Campaign store: the persistent side of the knowledge graph.

use crate::model::{
    CampaignId, Entity, EntityDraft, EntityId, Fact, NewFact, NewRelationship, Relationship,
    RelationshipId, RosterEntry,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Errors from store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),

    #[error("relationship {0} not found")]
    RelationshipNotFound(RelationshipId),

    #[error("entity {0} has been deleted")]
    Deleted(EntityId),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("backend failure: {0}")]
    Backend(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// The downstream persistent store.
///
/// Entities are soft-deleted, facts are append-only, and relationships are
/// removed only when an endpoint goes away or on explicit request.
#[async_trait]
pub trait LoreStore: Send + Sync {
    /// Names, aliases and kinds of every live entity in a campaign.
    async fn roster(&self, campaign: CampaignId) -> Result<Vec<RosterEntry>, StoreError>;

    async fn get_entity(&self, id: EntityId) -> Result<Entity, StoreError>;

    async fn create_entity(&self, campaign: CampaignId, draft: EntityDraft) -> Result<Entity, StoreError>;

    /// Overwrite an entity's authored content.
    async fn update_entity(&self, id: EntityId, draft: EntityDraft) -> Result<Entity, StoreError>;

    /// Flag an entity deleted and drop its edges.
    async fn soft_delete_entity(&self, id: EntityId) -> Result<(), StoreError>;

    /// Append a fact; the store assigns its sequence.
    async fn append_fact(&self, fact: NewFact) -> Result<Fact, StoreError>;

    /// All facts about the given entities.
    async fn facts_for(&self, ids: &[EntityId]) -> Result<Vec<Fact>, StoreError>;

    async fn create_relationship(
        &self,
        campaign: CampaignId,
        relationship: NewRelationship,
    ) -> Result<Relationship, StoreError>;

    async fn delete_relationship(&self, id: RelationshipId) -> Result<(), StoreError>;

    /// Active edges touching an entity.
    async fn relationships_of(&self, id: EntityId) -> Result<Vec<Relationship>, StoreError>;
}

/// Row counts for one campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub entities: usize,
    pub facts: usize,
    pub relationships: usize,
}

/// Everything the memory store holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct MemoryState {
    pub(crate) entities: HashMap<EntityId, Entity>,
    pub(crate) facts: Vec<Fact>,
    pub(crate) relationships: Vec<Relationship>,
    pub(crate) next_sequence: u64,
}

impl MemoryState {
    fn live_entity(&self, id: EntityId) -> Result<&Entity, StoreError> {
        match self.entities.get(&id) {
            Some(entity) if entity.deleted => Err(StoreError::Deleted(id)),
            Some(entity) => Ok(entity),
            None => Err(StoreError::EntityNotFound(id)),
        }
    }
}

/// In-process store for tests, tools and single-user setups.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_state(state: MemoryState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Copy out every row belonging to a campaign.
    pub(crate) async fn campaign_rows(&self, campaign: CampaignId) -> (Vec<Entity>, Vec<Fact>, Vec<Relationship>) {
        let state = self.state.read().await;
        let mut entities: Vec<Entity> = state
            .entities
            .values()
            .filter(|e| e.campaign == campaign)
            .cloned()
            .collect();
        entities.sort_by_key(|e| e.created_at);

        let facts = state
            .facts
            .iter()
            .filter(|f| {
                state
                    .entities
                    .get(&f.subject)
                    .is_some_and(|e| e.campaign == campaign)
            })
            .cloned()
            .collect();
        let relationships = state
            .relationships
            .iter()
            .filter(|r| r.campaign == campaign)
            .cloned()
            .collect();
        (entities, facts, relationships)
    }

    /// Replace a campaign's rows, keeping every other campaign.
    pub(crate) async fn replace_campaign(
        &self,
        campaign: CampaignId,
        entities: Vec<Entity>,
        facts: Vec<Fact>,
        relationships: Vec<Relationship>,
    ) {
        let mut state = self.state.write().await;
        let stale: Vec<EntityId> = state
            .entities
            .values()
            .filter(|e| e.campaign == campaign)
            .map(|e| e.id)
            .collect();
        for id in &stale {
            state.entities.remove(id);
        }
        state.facts.retain(|f| !stale.contains(&f.subject));
        state.relationships.retain(|r| r.campaign != campaign);

        let max_sequence = facts.iter().map(|f| f.sequence).max().unwrap_or(0);
        state.next_sequence = state.next_sequence.max(max_sequence);
        state.entities.extend(entities.into_iter().map(|e| (e.id, e)));
        state.facts.extend(facts);
        state.relationships.extend(relationships);
    }

    /// Row counts for a campaign, deleted entities included.
    pub async fn counts(&self, campaign: CampaignId) -> StoreCounts {
        let (entities, facts, relationships) = self.campaign_rows(campaign).await;
        StoreCounts {
            entities: entities.len(),
            facts: facts.len(),
            relationships: relationships.len(),
        }
    }
}

#[async_trait]
impl LoreStore for MemoryStore {
    // =========================================================================
    // Entity Management
    // =========================================================================

    async fn roster(&self, campaign: CampaignId) -> Result<Vec<RosterEntry>, StoreError> {
        let state = self.state.read().await;
        let mut roster: Vec<RosterEntry> = state
            .entities
            .values()
            .filter(|e| e.campaign == campaign && !e.deleted)
            .map(Entity::roster_entry)
            .collect();
        roster.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(roster)
    }

    async fn get_entity(&self, id: EntityId) -> Result<Entity, StoreError> {
        let state = self.state.read().await;
        state
            .entities
            .get(&id)
            .cloned()
            .ok_or(StoreError::EntityNotFound(id))
    }

    async fn create_entity(&self, campaign: CampaignId, draft: EntityDraft) -> Result<Entity, StoreError> {
        if draft.name.trim().is_empty() {
            return Err(StoreError::Invalid("entity name is empty".to_string()));
        }
        let entity = Entity::from_draft(campaign, draft);
        debug!(id = %entity.id, name = %entity.name, kind = %entity.kind, "created entity");
        let mut state = self.state.write().await;
        state.entities.insert(entity.id, entity.clone());
        Ok(entity)
    }

    async fn update_entity(&self, id: EntityId, draft: EntityDraft) -> Result<Entity, StoreError> {
        if draft.name.trim().is_empty() {
            return Err(StoreError::Invalid("entity name is empty".to_string()));
        }
        let mut state = self.state.write().await;
        state.live_entity(id)?;
        let entity = state
            .entities
            .get_mut(&id)
            .ok_or(StoreError::EntityNotFound(id))?;
        entity.apply_draft(draft);
        Ok(entity.clone())
    }

    async fn soft_delete_entity(&self, id: EntityId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.live_entity(id)?;
        if let Some(entity) = state.entities.get_mut(&id) {
            entity.deleted = true;
        }
        let before = state.relationships.len();
        state.relationships.retain(|r| !r.involves(id));
        debug!(id = %id, edges = before - state.relationships.len(), "soft-deleted entity");
        Ok(())
    }

    // =========================================================================
    // Fact Management
    // =========================================================================

    async fn append_fact(&self, fact: NewFact) -> Result<Fact, StoreError> {
        if fact.content.trim().is_empty() {
            return Err(StoreError::Invalid("fact content is empty".to_string()));
        }
        let mut state = self.state.write().await;
        state.live_entity(fact.subject)?;
        state.next_sequence += 1;
        let fact = fact.into_fact(state.next_sequence);
        state.facts.push(fact.clone());
        Ok(fact)
    }

    async fn facts_for(&self, ids: &[EntityId]) -> Result<Vec<Fact>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .facts
            .iter()
            .filter(|f| ids.contains(&f.subject))
            .cloned()
            .collect())
    }

    // =========================================================================
    // Relationship Management
    // =========================================================================

    async fn create_relationship(
        &self,
        campaign: CampaignId,
        relationship: NewRelationship,
    ) -> Result<Relationship, StoreError> {
        if relationship.source == relationship.target {
            return Err(StoreError::Invalid(format!(
                "entity {} cannot relate to itself",
                relationship.source
            )));
        }
        let mut state = self.state.write().await;
        for endpoint in [relationship.source, relationship.target] {
            if state.live_entity(endpoint)?.campaign != campaign {
                return Err(StoreError::Invalid(format!(
                    "entity {endpoint} belongs to another campaign"
                )));
            }
        }
        let relationship = relationship.into_relationship(campaign);
        state.relationships.push(relationship.clone());
        Ok(relationship)
    }

    async fn delete_relationship(&self, id: RelationshipId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let before = state.relationships.len();
        state.relationships.retain(|r| r.id != id);
        if state.relationships.len() == before {
            return Err(StoreError::RelationshipNotFound(id));
        }
        Ok(())
    }

    async fn relationships_of(&self, id: EntityId) -> Result<Vec<Relationship>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .relationships
            .iter()
            .filter(|r| r.is_active && r.involves(id))
            .cloned()
            .collect())
    }
}
