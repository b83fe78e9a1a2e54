//! Testing utilities for review cycles.
//!
//! This module provides tools for integration testing:
//! - `FaultyStore` for injecting store failures and slow calls
//! - `ReviewHarness` for seeding a campaign and opening sessions on it
//! - Assertion helpers for verifying what reached the store

use crate::commit::PrimaryDraft;
use crate::model::{
    CampaignId, Entity, EntityDraft, EntityId, EntityKind, Fact, FactCategory, FactSource,
    NewFact, NewRelationship, Relationship, RelationshipId, RosterEntry,
};
use crate::session::{ReviewSession, SessionConfig};
use crate::store::{LoreStore, MemoryStore, StoreCounts, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Store operations a fault can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Roster,
    GetEntity,
    CreateEntity,
    UpdateEntity,
    SoftDeleteEntity,
    AppendFact,
    FactsFor,
    CreateRelationship,
    DeleteRelationship,
    RelationshipsOf,
}

/// What happens when a fault triggers.
#[derive(Debug, Clone)]
pub enum FaultEffect {
    Fail(StoreError),
    Delay(Duration),
}

/// A scripted misbehavior.
#[derive(Debug, Clone)]
struct Fault {
    op: StoreOp,
    /// Only calls whose subject contains this text (case-insensitive).
    matching: Option<String>,
    effect: FaultEffect,
}

impl Fault {
    fn applies(&self, op: StoreOp, subject: &str) -> bool {
        self.op == op
            && self
                .matching
                .as_ref()
                .map_or(true, |m| subject.to_lowercase().contains(&m.to_lowercase()))
    }
}

/// A `MemoryStore` that fails or stalls on request.
///
/// The subject a fault matches against is the entity name for entity calls,
/// the content for facts and the relationship kind label for edges.
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<HashMap<StoreOp, usize>>,
}

impl FaultyStore {
    /// Create a store with no faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call to `op`.
    pub fn fail(self, op: StoreOp, error: StoreError) -> Self {
        self.push(op, None, FaultEffect::Fail(error))
    }

    /// Fail calls to `op` whose subject mentions `subject`.
    pub fn fail_on(self, op: StoreOp, subject: &str, error: StoreError) -> Self {
        self.push(op, Some(subject), FaultEffect::Fail(error))
    }

    /// Stall calls to `op` whose subject mentions `subject`.
    pub fn delay_on(self, op: StoreOp, subject: &str, delay: Duration) -> Self {
        self.push(op, Some(subject), FaultEffect::Delay(delay))
    }

    /// Remove every fault.
    pub fn heal(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.clear();
        }
    }

    /// The store behind the faults.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// How many times `op` was called, faulted calls included.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn push(self, op: StoreOp, matching: Option<&str>, effect: FaultEffect) -> Self {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(Fault {
                op,
                matching: matching.map(str::to_string),
                effect,
            });
        }
        self
    }

    /// Count the call and apply the first matching fault.
    async fn check(&self, op: StoreOp, subject: &str) -> Result<(), StoreError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(op).or_insert(0) += 1;
        }
        let effect = self
            .faults
            .lock()
            .ok()
            .and_then(|faults| faults.iter().find(|f| f.applies(op, subject)).map(|f| f.effect.clone()));
        match effect {
            Some(FaultEffect::Fail(error)) => Err(error),
            Some(FaultEffect::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LoreStore for FaultyStore {
    async fn roster(&self, campaign: CampaignId) -> Result<Vec<RosterEntry>, StoreError> {
        self.check(StoreOp::Roster, "").await?;
        self.inner.roster(campaign).await
    }

    async fn get_entity(&self, id: EntityId) -> Result<Entity, StoreError> {
        self.check(StoreOp::GetEntity, &id.to_string()).await?;
        self.inner.get_entity(id).await
    }

    async fn create_entity(&self, campaign: CampaignId, draft: EntityDraft) -> Result<Entity, StoreError> {
        self.check(StoreOp::CreateEntity, &draft.name).await?;
        self.inner.create_entity(campaign, draft).await
    }

    async fn update_entity(&self, id: EntityId, draft: EntityDraft) -> Result<Entity, StoreError> {
        self.check(StoreOp::UpdateEntity, &draft.name).await?;
        self.inner.update_entity(id, draft).await
    }

    async fn soft_delete_entity(&self, id: EntityId) -> Result<(), StoreError> {
        self.check(StoreOp::SoftDeleteEntity, &id.to_string()).await?;
        self.inner.soft_delete_entity(id).await
    }

    async fn append_fact(&self, fact: NewFact) -> Result<Fact, StoreError> {
        self.check(StoreOp::AppendFact, &fact.content).await?;
        self.inner.append_fact(fact).await
    }

    async fn facts_for(&self, ids: &[EntityId]) -> Result<Vec<Fact>, StoreError> {
        self.check(StoreOp::FactsFor, "").await?;
        self.inner.facts_for(ids).await
    }

    async fn create_relationship(
        &self,
        campaign: CampaignId,
        relationship: NewRelationship,
    ) -> Result<Relationship, StoreError> {
        self.check(StoreOp::CreateRelationship, relationship.kind.as_str())
            .await?;
        self.inner.create_relationship(campaign, relationship).await
    }

    async fn delete_relationship(&self, id: RelationshipId) -> Result<(), StoreError> {
        self.check(StoreOp::DeleteRelationship, &id.to_string()).await?;
        self.inner.delete_relationship(id).await
    }

    async fn relationships_of(&self, id: EntityId) -> Result<Vec<Relationship>, StoreError> {
        self.check(StoreOp::RelationshipsOf, &id.to_string()).await?;
        self.inner.relationships_of(id).await
    }
}

/// Test harness for review cycles against one campaign.
pub struct ReviewHarness {
    /// The store, with whatever faults the test configured.
    pub store: Arc<FaultyStore>,
    pub campaign: CampaignId,
    pub config: SessionConfig,
}

impl ReviewHarness {
    /// Create a harness over a fault-free store.
    pub fn new() -> Self {
        Self::with_store(FaultyStore::new())
    }

    /// Create a harness over a configured store.
    pub fn with_store(store: FaultyStore) -> Self {
        Self {
            store: Arc::new(store),
            campaign: CampaignId::new(),
            config: SessionConfig::default(),
        }
    }

    /// Set the session configuration.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Add an existing entity directly, bypassing faults.
    pub async fn seed(&self, kind: EntityKind, name: &str) -> EntityId {
        self.seed_draft(EntityDraft::new(kind, name)).await
    }

    /// Add an existing entity from a draft, bypassing faults.
    pub async fn seed_draft(&self, draft: EntityDraft) -> EntityId {
        match self.store.inner().create_entity(self.campaign, draft).await {
            Ok(entity) => entity.id,
            Err(error) => panic!("seeding failed: {error}"),
        }
    }

    /// Record a fact directly, bypassing faults.
    pub async fn seed_fact(&self, entity: EntityId, category: FactCategory, content: &str) -> Fact {
        let fact = NewFact::new(entity, category, content, FactSource::Generated);
        match self.store.inner().append_fact(fact).await {
            Ok(fact) => fact,
            Err(error) => panic!("seeding failed: {error}"),
        }
    }

    /// Open a session for a new entity.
    pub async fn open(&self, kind: EntityKind, name: &str) -> ReviewSession {
        self.open_primary(PrimaryDraft::Create(EntityDraft::new(kind, name)))
            .await
    }

    /// Open a session for any primary draft.
    pub async fn open_primary(&self, primary: PrimaryDraft) -> ReviewSession {
        ReviewSession::open(
            self.store.clone(),
            self.campaign,
            primary,
            self.config.clone(),
        )
        .await
    }

    /// Row counts for the campaign.
    pub async fn counts(&self) -> StoreCounts {
        self.store.inner().counts(self.campaign).await
    }

    /// Find a live entity by name (case-insensitive).
    pub async fn entity_named(&self, name: &str) -> Option<Entity> {
        let roster = self.store.inner().roster(self.campaign).await.ok()?;
        let entry = roster.iter().find(|e| e.name.eq_ignore_ascii_case(name))?;
        self.store.inner().get_entity(entry.id).await.ok()
    }

    /// Active edges touching the named entity.
    pub async fn edges_of(&self, name: &str) -> Vec<Relationship> {
        match self.entity_named(name).await {
            Some(entity) => self
                .store
                .inner()
                .relationships_of(entity.id)
                .await
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

impl Default for ReviewHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert that the campaign contains a live entity with the given name.
pub async fn assert_has_entity(harness: &ReviewHarness, name: &str) -> Entity {
    match harness.entity_named(name).await {
        Some(entity) => entity,
        None => panic!("Expected entity '{name}' to exist in the store"),
    }
}

/// Assert that the campaign does NOT contain an entity with the given name.
pub async fn assert_no_entity(harness: &ReviewHarness, name: &str) {
    assert!(
        harness.entity_named(name).await.is_none(),
        "Expected entity '{name}' to NOT exist in the store"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_faults_target_matching_calls() {
        let store = FaultyStore::new().fail_on(
            StoreOp::CreateEntity,
            "gray lady",
            StoreError::Backend("disk full".to_string()),
        );
        let campaign = CampaignId::new();

        let ok = store
            .create_entity(campaign, EntityDraft::new(EntityKind::Npc, "Captain Vale"))
            .await;
        assert!(ok.is_ok());

        let failed = store
            .create_entity(campaign, EntityDraft::new(EntityKind::Item, "The Gray Lady"))
            .await;
        assert_eq!(failed.unwrap_err(), StoreError::Backend("disk full".to_string()));
        assert_eq!(store.calls(StoreOp::CreateEntity), 2);

        store.heal();
        assert!(store
            .create_entity(campaign, EntityDraft::new(EntityKind::Item, "The Gray Lady"))
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_stalls_call() {
        let store = FaultyStore::new().delay_on(StoreOp::AppendFact, "slow", Duration::from_secs(30));
        let campaign = CampaignId::new();
        let vale = store
            .create_entity(campaign, EntityDraft::new(EntityKind::Npc, "Captain Vale"))
            .await
            .unwrap();

        let call = store.append_fact(NewFact::new(
            vale.id,
            FactCategory::Event,
            "a slow tale",
            FactSource::User,
        ));
        let timed = tokio::time::timeout(Duration::from_secs(1), call).await;
        assert!(timed.is_err());
    }

    #[tokio::test]
    async fn test_harness_seeding() {
        let harness = ReviewHarness::new();
        harness.seed(EntityKind::Location, "Saltmarsh").await;

        let town = assert_has_entity(&harness, "saltmarsh").await;
        assert_eq!(town.kind, EntityKind::Location);
        assert_no_entity(&harness, "Baldur's Gate").await;
        assert_eq!(harness.counts().await.entities, 1);
    }
}
