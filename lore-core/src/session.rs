//! ReviewSession - the public API for one generate, review, commit cycle.
//!
//! A session owns everything the review surface edits: the Discovery ledger,
//! the detected conflicts and the match index. Nothing reaches the store
//! until [`ReviewSession::commit`].

use crate::commit::{CommitConfig, CommitCoordinator, CommitOutcome, PrimaryDraft};
use crate::conflict::{
    detect, AttributeClaim, ClaimSubject, Conflict, ConflictKey, ConflictPolicy, Resolution,
    ResolvedClaim,
};
use crate::discovery::{
    extract_field, Discovery, DiscoveryKey, DiscoveryStatus, Ledger, LedgerError, LedgerEvent,
    MatchConfig, MatchIndex, MatchOutcome, ScanConfig, Scanner, StructuredField, TransitionError,
};
use crate::model::{CampaignId, EntityId, EntityKind, RosterEntry};
use crate::store::{LoreStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from ReviewSession operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no discovery with key '{0}'")]
    UnknownDiscovery(DiscoveryKey),

    #[error("no conflict for {} on entity {}", .0.category.name(), .0.entity)]
    UnknownConflict(ConflictKey),

    #[error("entity {0} is not in this campaign's roster")]
    UnknownEntity(EntityId),

    #[error("'{0}' is not a usable name")]
    InvalidName(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<LedgerError> for SessionError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::UnknownDiscovery(key) => SessionError::UnknownDiscovery(key),
            LedgerError::Transition(error) => SessionError::Transition(error),
        }
    }
}

/// Configuration for a review session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub scan: ScanConfig,
    pub matching: MatchConfig,
    pub conflicts: ConflictPolicy,
    pub commit: CommitConfig,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mention scanner limits.
    pub fn with_scan(mut self, scan: ScanConfig) -> Self {
        self.scan = scan;
        self
    }

    /// Set the fuzzy match thresholds.
    pub fn with_matching(mut self, matching: MatchConfig) -> Self {
        self.matching = matching;
        self
    }

    /// Set which differences count as conflicts.
    pub fn with_conflict_policy(mut self, conflicts: ConflictPolicy) -> Self {
        self.conflicts = conflicts;
        self
    }

    /// Set commit timeouts and concurrency.
    pub fn with_commit(mut self, commit: CommitConfig) -> Self {
        self.commit = commit;
        self
    }
}

/// What the generator produced for one request. Untrusted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratedContent {
    pub narrative: String,
    pub fields: Vec<StructuredField>,
    pub claims: Vec<AttributeClaim>,
}

/// One review cycle over generated content for a single authored entity.
pub struct ReviewSession {
    store: Arc<dyn LoreStore>,
    campaign: CampaignId,
    config: SessionConfig,
    primary: PrimaryDraft,
    scanner: Scanner,
    index: MatchIndex,
    ledger: Ledger,
    conflicts: Vec<Conflict>,
}

impl ReviewSession {
    /// Start a cycle for an authored entity.
    ///
    /// A roster that cannot be fetched leaves the session with an empty index:
    /// nothing counts as known, so every mention is offered for review.
    pub async fn open(
        store: Arc<dyn LoreStore>,
        campaign: CampaignId,
        primary: PrimaryDraft,
        config: SessionConfig,
    ) -> Self {
        let index = match MatchIndex::load(store.as_ref(), campaign, config.matching.clone()).await {
            Ok(index) => index,
            Err(error) => {
                warn!(campaign = %campaign, error = %error, "roster unavailable, deduplicating against nothing");
                MatchIndex::build(&[], config.matching.clone())
            }
        };

        let draft = primary.draft();
        let scanner = draft
            .aliases
            .iter()
            .fold(Scanner::new(config.scan.clone()).excluding(&draft.name), |scanner, alias| {
                scanner.excluding(alias)
            });

        info!(campaign = %campaign, entity = %draft.name, known = index.len(), "opened review session");
        Self {
            store,
            campaign,
            config,
            primary,
            scanner,
            index,
            ledger: Ledger::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn campaign(&self) -> CampaignId {
        self.campaign
    }

    pub fn primary(&self) -> &PrimaryDraft {
        &self.primary
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The index this cycle deduplicates against.
    pub fn index(&self) -> &MatchIndex {
        &self.index
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Feed everything from one generation into the session.
    pub async fn ingest(&mut self, content: GeneratedContent) -> Result<(), SessionError> {
        self.ingest_narrative(&content.narrative);
        self.ingest_structured(&content.fields);
        self.ingest_claims(&content.claims).await
    }

    /// Scan narrative text for mentions. Unscannable text yields nothing.
    pub fn ingest_narrative(&mut self, text: &str) {
        let batch = match self.scanner.scan(text, &self.index) {
            Ok(batch) => batch,
            Err(error) => {
                warn!(error = %error, "skipping narrative scan");
                return;
            }
        };
        debug!(found = batch.len(), "scanned narrative");
        self.ledger.ingest(batch);
    }

    /// Turn structured sub-object lists into Discoveries.
    pub fn ingest_structured(&mut self, fields: &[StructuredField]) {
        let authored = self.primary.draft().kind;
        for field in fields {
            let batch = extract_field(authored, field, &self.index);
            debug!(field = %field.name, found = batch.len(), "extracted structured field");
            self.ledger.ingest(batch);
        }
    }

    /// Compare generated claims with recorded facts.
    ///
    /// Only claims about known entities are checked. A conflict detected again
    /// with the same new value keeps the resolution the user already chose.
    pub async fn ingest_claims(&mut self, claims: &[AttributeClaim]) -> Result<(), SessionError> {
        let resolved: Vec<ResolvedClaim> = claims.iter().filter_map(|c| self.resolve_claim(c)).collect();
        if resolved.is_empty() {
            return Ok(());
        }

        let mut ids: Vec<EntityId> = resolved.iter().map(|c| c.entity).collect();
        ids.sort();
        ids.dedup();
        let stored = self.store.facts_for(&ids).await?;

        for conflict in detect(&resolved, &stored, &self.config.conflicts) {
            match self.conflicts.iter_mut().find(|c| c.key == conflict.key) {
                Some(existing) if existing.new_text == conflict.new_text => {}
                Some(existing) => *existing = conflict,
                None => self.conflicts.push(conflict),
            }
        }
        debug!(claims = claims.len(), conflicts = self.conflicts.len(), "checked claims");
        Ok(())
    }

    fn resolve_claim(&self, claim: &AttributeClaim) -> Option<ResolvedClaim> {
        let entity = match &claim.subject {
            ClaimSubject::Authored => self.primary.existing_id()?,
            ClaimSubject::Named(name) => match self.index.match_name(name) {
                MatchOutcome::Exact(id) => id,
                MatchOutcome::Fuzzy { .. } | MatchOutcome::None => return None,
            },
            ClaimSubject::Entity(id) => *id,
        };
        let entity_name = self.index.name_of(entity)?.to_string();
        Some(ResolvedClaim {
            entity,
            entity_name,
            category: claim.category,
            value: claim.value.clone(),
        })
    }

    // =========================================================================
    // Review
    // =========================================================================

    /// Discoveries in the order they were first found.
    pub fn current_discoveries(&self) -> Vec<&Discovery> {
        self.ledger.iter().collect()
    }

    pub fn current_conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    /// Record a review decision for a Discovery.
    pub fn set_discovery_status(&mut self, key: &DiscoveryKey, status: DiscoveryStatus) -> Result<(), SessionError> {
        if let DiscoveryStatus::LinkExisting(id) = status {
            self.known_entity(id)?;
        }
        self.ledger.apply(LedgerEvent::SetStatus {
            key: key.clone(),
            status,
        })?;
        Ok(())
    }

    /// Reclassify a Discovery; `None` makes it unclassified.
    pub fn set_discovery_kind(&mut self, key: &DiscoveryKey, kind: Option<EntityKind>) -> Result<(), SessionError> {
        self.ledger.apply(LedgerEvent::SetKind {
            key: key.clone(),
            kind,
        })?;
        Ok(())
    }

    /// Add a mention the scanner missed, ready to become a stub.
    ///
    /// A name that already belongs to a known entity is linked instead.
    pub fn add_manual_discovery(&mut self, name: &str, kind: Option<EntityKind>) -> Result<DiscoveryKey, SessionError> {
        let status = match self.index.match_name(name) {
            MatchOutcome::Exact(id) => DiscoveryStatus::LinkExisting(id),
            MatchOutcome::Fuzzy { .. } | MatchOutcome::None => DiscoveryStatus::CreateStub,
        };
        let discovery = Discovery::manual(name, kind, status)
            .ok_or_else(|| SessionError::InvalidName(name.to_string()))?;
        let key = discovery.key.clone();
        self.ledger.apply(LedgerEvent::Manual(discovery))?;
        Ok(key)
    }

    /// Link a known entity to the authored one.
    pub fn link_manual(&mut self, entity: EntityId) -> Result<DiscoveryKey, SessionError> {
        let entry = self.known_entity(entity)?;
        let discovery = Discovery::manual(&entry.name, Some(entry.kind), DiscoveryStatus::LinkExisting(entity))
            .ok_or_else(|| SessionError::InvalidName(entry.name.clone()))?;
        let key = discovery.key.clone();
        self.ledger.apply(LedgerEvent::Manual(discovery))?;
        Ok(key)
    }

    /// Settle a conflict. `Resolution::Unresolved` reopens it.
    pub fn set_conflict_resolution(&mut self, key: ConflictKey, resolution: Resolution) -> Result<(), SessionError> {
        let conflict = self
            .conflicts
            .iter_mut()
            .find(|c| c.key == key)
            .ok_or(SessionError::UnknownConflict(key))?;
        conflict.resolution = resolution;
        Ok(())
    }

    fn known_entity(&self, id: EntityId) -> Result<RosterEntry, SessionError> {
        self.index
            .entry(id)
            .cloned()
            .ok_or(SessionError::UnknownEntity(id))
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Write the authored entity and everything decided so far.
    ///
    /// May be called again after partial failures; items already written are
    /// not written twice.
    pub async fn commit(&mut self) -> CommitOutcome {
        let coordinator = CommitCoordinator::new(Arc::clone(&self.store), self.campaign, self.config.commit.clone());
        let actionable = self.ledger.actionable();
        let outcome = coordinator
            .commit(self.primary.clone(), &actionable, &self.conflicts, &mut self.index)
            .await;

        for event in outcome.ledger_events() {
            if let Err(error) = self.ledger.apply(event.clone()) {
                warn!(error = %error, "commit produced an unexpected status change");
            }
        }

        if let Some(entity) = &outcome.created_entity {
            if let PrimaryDraft::Create(draft) = &self.primary {
                self.primary = PrimaryDraft::Update {
                    id: entity.id,
                    draft: draft.clone(),
                };
            }
            let failed: Vec<&str> = outcome.errors.iter().map(|e| e.key.as_str()).collect();
            self.conflicts
                .retain(|c| !c.resolution.is_resolved() || failed.contains(&c.label().as_str()));
        }
        outcome
    }

    /// Throw the cycle away. Nothing was written.
    pub fn discard(self) {
        debug!(
            discoveries = self.ledger.len(),
            conflicts = self.conflicts.len(),
            "discarded review session"
        );
    }
}
