//! Writing a reviewed generation to the store.
//!
//! The authored entity is saved first; if that fails nothing else happens.
//! Everything after it is planned sequentially against the match index, then
//! written concurrently. Each write stands alone: a failed stub, edge or fact
//! becomes a [`CommitItemError`] and never undoes the rest.

use crate::conflict::Conflict;
use crate::discovery::{Discovery, DiscoveryKey, DiscoveryStatus, LedgerEvent, MatchIndex};
use crate::infer::{infer, InferredEdge};
use crate::model::{
    CampaignId, Entity, EntityDraft, EntityId, EntityKind, Fact, FactSource, NewFact,
    NewRelationship, Relationship, RelationshipKind,
};
use crate::store::{LoreStore, StoreError};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Limits for the concurrent part of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    /// Upper bound on any single store call.
    pub item_timeout: Duration,
    /// Store calls allowed in flight at once.
    pub max_in_flight: usize,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            item_timeout: Duration::from_secs(10),
            max_in_flight: 8,
        }
    }
}

impl CommitConfig {
    pub fn with_item_timeout(mut self, item_timeout: Duration) -> Self {
        self.item_timeout = item_timeout;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }
}

/// The entity the user authored in this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum PrimaryDraft {
    /// A new entity.
    Create(EntityDraft),
    /// Completing or revising an entity that already exists, e.g. a stub.
    Update { id: EntityId, draft: EntityDraft },
}

impl PrimaryDraft {
    pub fn draft(&self) -> &EntityDraft {
        match self {
            PrimaryDraft::Create(draft) | PrimaryDraft::Update { draft, .. } => draft,
        }
    }

    pub fn existing_id(&self) -> Option<EntityId> {
        match self {
            PrimaryDraft::Create(_) => None,
            PrimaryDraft::Update { id, .. } => Some(*id),
        }
    }
}

/// The write a per-item failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitAction {
    CreateStub,
    CreateRelationship,
    RecordResolution,
}

impl CommitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitAction::CreateStub => "create stub",
            CommitAction::CreateRelationship => "create relationship",
            CommitAction::RecordResolution => "record resolution",
        }
    }
}

impl fmt::Display for CommitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single item failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemFailure {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no entity kind was chosen")]
    Unclassified,
}

/// A failure confined to one item of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{action} for '{key}' failed: {source}")]
pub struct CommitItemError {
    /// Discovery key, or `entity/category` for a conflict resolution.
    pub key: String,
    pub action: CommitAction,
    pub source: ItemFailure,
}

/// A failure that stops the commit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitFatalError {
    #[error("saving the entity failed: {0}")]
    Create(StoreError),

    #[error("updating entity {id} failed: {source}")]
    Update { id: EntityId, source: StoreError },
}

/// A Discovery that was fully written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedDiscovery {
    pub key: DiscoveryKey,
    pub entity: EntityId,
    /// Whether a stub was created for it in this commit.
    pub created: bool,
    /// The edge to the authored entity, if one was needed.
    pub relationship: Option<Relationship>,
}

/// Everything a commit did and failed to do.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    /// The authored entity was saved.
    pub success: bool,
    pub created_entity: Option<Entity>,
    pub committed: Vec<CommittedDiscovery>,
    pub created_stubs: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub facts: Vec<Fact>,
    pub errors: Vec<CommitItemError>,
    pub fatal: Option<CommitFatalError>,
    attempted: usize,
    resolved: BTreeMap<DiscoveryKey, EntityId>,
    events: Vec<LedgerEvent>,
}

impl CommitOutcome {
    fn fatal(error: CommitFatalError) -> Self {
        Self {
            fatal: Some(error),
            ..Self::default()
        }
    }

    /// Entity a Discovery ended up pointing at, for adding structural edges later.
    pub fn entity_for(&self, key: &DiscoveryKey) -> Option<EntityId> {
        self.resolved.get(key).copied()
    }

    /// Whether every item went through.
    pub fn is_complete(&self) -> bool {
        self.success && self.errors.is_empty()
    }

    /// Status changes to feed back into the ledger.
    pub fn ledger_events(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// One line for the review surface.
    pub fn summary(&self) -> String {
        if let Some(fatal) = &self.fatal {
            return format!("entity not saved: {fatal}");
        }
        if self.errors.is_empty() {
            format!("entity saved; {} linked items committed", self.attempted)
        } else {
            format!(
                "entity saved; {} of {} linked items failed",
                self.errors.len(),
                self.attempted
            )
        }
    }
}

/// One planned write.
enum WorkItem {
    Stub {
        discovery: Discovery,
        kind: EntityKind,
    },
    Link {
        discovery: Discovery,
        target: EntityId,
        target_kind: Option<EntityKind>,
        target_sub_kind: Option<String>,
    },
    Resolution {
        label: String,
        fact: NewFact,
    },
}

/// What one work item produced.
#[derive(Default)]
struct ItemReport {
    order: usize,
    committed: Option<CommittedDiscovery>,
    /// The committed edge was written by this item rather than found.
    edge_created: bool,
    stub: Option<Entity>,
    fact: Option<Fact>,
    resolved: Option<(DiscoveryKey, EntityId)>,
    events: Vec<LedgerEvent>,
    error: Option<CommitItemError>,
}

/// Writes reviewed generations for one campaign.
pub struct CommitCoordinator {
    store: Arc<dyn LoreStore>,
    campaign: CampaignId,
    config: CommitConfig,
}

impl CommitCoordinator {
    pub fn new(store: Arc<dyn LoreStore>, campaign: CampaignId, config: CommitConfig) -> Self {
        Self {
            store,
            campaign,
            config,
        }
    }

    /// Save the authored entity, then every actionable Discovery and resolved conflict.
    ///
    /// `index` gains every entity this commit creates, so running the commit
    /// again over the same Discoveries links instead of creating twice.
    pub async fn commit(
        &self,
        primary: PrimaryDraft,
        discoveries: &[Discovery],
        conflicts: &[Conflict],
        index: &mut MatchIndex,
    ) -> CommitOutcome {
        let primary = match self.save_primary(primary).await {
            Ok(entity) => entity,
            Err(error) => {
                warn!(error = %error, "commit aborted");
                return CommitOutcome::fatal(error);
            }
        };
        index.insert(primary.roster_entry());
        info!(id = %primary.id, name = %primary.name, "saved authored entity");

        let mut outcome = CommitOutcome {
            success: true,
            created_entity: Some(primary.clone()),
            ..CommitOutcome::default()
        };
        let mut work: Vec<(usize, WorkItem)> = Vec::new();
        let mut planned_stubs: HashSet<DiscoveryKey> = HashSet::new();
        let mut deferred: Vec<(usize, &Discovery)> = Vec::new();

        for (order, discovery) in discoveries.iter().enumerate() {
            // A second request for a key already planned as a stub waits for that stub.
            if discovery.status == DiscoveryStatus::CreateStub
                && index.exact(&discovery.key).is_none()
                && !planned_stubs.insert(discovery.key.clone())
            {
                deferred.push((order, discovery));
                continue;
            }
            if let Some(item) = self.plan(&primary, discovery, index, &mut outcome) {
                work.push((order, item));
            }
        }
        for conflict in conflicts {
            let Some(value) = conflict.kept_value() else {
                continue;
            };
            let fact = NewFact::new(
                conflict.key.entity,
                conflict.category(),
                value,
                FactSource::ConflictResolution,
            );
            let label = conflict.label();
            work.push((discoveries.len() + work.len(), WorkItem::Resolution { label, fact }));
        }
        debug!(items = work.len(), deferred = deferred.len(), "planned commit work");
        self.run(work, &primary, index, &mut outcome).await;

        if !deferred.is_empty() {
            let mut second: Vec<(usize, WorkItem)> = Vec::new();
            for (order, discovery) in deferred {
                let already_resolved = outcome.resolved.contains_key(&discovery.key);
                let events_before = outcome.events.len();
                if let Some(item) = self.plan(&primary, discovery, index, &mut outcome) {
                    second.push((order, item));
                }
                if already_resolved {
                    outcome.events.truncate(events_before);
                }
            }
            self.run(second, &primary, index, &mut outcome).await;
        }

        info!(summary = %outcome.summary(), "commit finished");
        outcome
    }

    /// Execute planned work concurrently and fold the reports into `outcome` in plan order.
    async fn run(
        &self,
        work: Vec<(usize, WorkItem)>,
        primary: &Entity,
        index: &mut MatchIndex,
        outcome: &mut CommitOutcome,
    ) {
        outcome.attempted += work.len();
        let mut reports: Vec<ItemReport> = stream::iter(work)
            .map(|(order, item)| self.execute(order, item, primary))
            .buffer_unordered(self.config.max_in_flight.max(1))
            .collect()
            .await;
        reports.sort_by_key(|report| report.order);

        for report in reports {
            if let Some(stub) = report.stub {
                index.insert(stub.roster_entry());
                outcome.created_stubs.push(stub);
            }
            if let Some(committed) = report.committed {
                if report.edge_created {
                    if let Some(relationship) = &committed.relationship {
                        outcome.relationships.push(relationship.clone());
                    }
                }
                outcome.committed.push(committed);
            }
            if let Some(fact) = report.fact {
                outcome.facts.push(fact);
            }
            // Only the first resolution of a key feeds the ledger.
            let fresh = report
                .resolved
                .as_ref()
                .map_or(true, |(key, _)| !outcome.resolved.contains_key(key));
            if fresh {
                outcome.events.extend(report.events);
            }
            if let Some((key, id)) = report.resolved {
                outcome.resolved.entry(key).or_insert(id);
            }
            if let Some(error) = report.error {
                warn!(key = %error.key, action = %error.action, error = %error.source, "commit item failed");
                outcome.errors.push(error);
            }
        }
    }

    async fn save_primary(&self, primary: PrimaryDraft) -> Result<Entity, CommitFatalError> {
        match primary {
            PrimaryDraft::Create(draft) => self
                .bounded(self.store.create_entity(self.campaign, draft))
                .await
                .map_err(CommitFatalError::Create),
            PrimaryDraft::Update { id, draft } => self
                .bounded(self.store.update_entity(id, draft))
                .await
                .map_err(|source| CommitFatalError::Update { id, source }),
        }
    }

    /// Decide what to write for one Discovery. Dedup happens here, in order.
    fn plan(
        &self,
        primary: &Entity,
        discovery: &Discovery,
        index: &MatchIndex,
        outcome: &mut CommitOutcome,
    ) -> Option<WorkItem> {
        let key = discovery.key.clone();
        let target = match discovery.status {
            DiscoveryStatus::CreateStub => match index.exact(&key) {
                Some(existing) => {
                    debug!(key = %key, entity = %existing, "stub request matches existing entity");
                    outcome.events.push(LedgerEvent::Duplicate {
                        key: key.clone(),
                        entity: existing,
                    });
                    existing
                }
                None => {
                    let Some(kind) = discovery.suggested_kind else {
                        outcome.attempted += 1;
                        outcome.errors.push(CommitItemError {
                            key: key.to_string(),
                            action: CommitAction::CreateStub,
                            source: ItemFailure::Unclassified,
                        });
                        return None;
                    };
                    return Some(WorkItem::Stub {
                        discovery: discovery.clone(),
                        kind,
                    });
                }
            },
            DiscoveryStatus::LinkExisting(id) => id,
            DiscoveryStatus::Pending | DiscoveryStatus::Ignore | DiscoveryStatus::Committed(_) => {
                return None
            }
        };

        if target == primary.id {
            outcome.events.push(LedgerEvent::Committed {
                key: key.clone(),
                entity: target,
            });
            outcome.resolved.insert(key.clone(), target);
            outcome.committed.push(CommittedDiscovery {
                key,
                entity: target,
                created: false,
                relationship: None,
            });
            return None;
        }

        let entry = index.entry(target);
        Some(WorkItem::Link {
            discovery: discovery.clone(),
            target,
            target_kind: entry.map(|e| e.kind).or(discovery.suggested_kind),
            target_sub_kind: entry.and_then(|e| e.sub_kind.clone()),
        })
    }

    async fn execute(&self, order: usize, item: WorkItem, primary: &Entity) -> ItemReport {
        let mut report = ItemReport {
            order,
            ..ItemReport::default()
        };
        match item {
            WorkItem::Stub { discovery, kind } => {
                let draft = EntityDraft::stub(kind, discovery.name.clone(), discovery.context.clone())
                    .with_visibility(primary.visibility);
                let stub = match self
                    .bounded(self.store.create_entity(self.campaign, draft))
                    .await
                {
                    Ok(stub) => stub,
                    Err(error) => {
                        report.error = Some(item_error(&discovery.key, CommitAction::CreateStub, error));
                        return report;
                    }
                };
                let edge = edge_for(primary, &discovery, Some(kind), None);
                report.resolved = Some((discovery.key.clone(), stub.id));

                match self.link(primary, stub.id, edge).await {
                    Ok(relationship) => {
                        report.edge_created = true;
                        report.events.push(LedgerEvent::Committed {
                            key: discovery.key.clone(),
                            entity: stub.id,
                        });
                        report.committed = Some(CommittedDiscovery {
                            key: discovery.key.clone(),
                            entity: stub.id,
                            created: true,
                            relationship: Some(relationship),
                        });
                    }
                    Err(error) => {
                        // The stub exists; a retry links to it instead of creating another.
                        report.events.push(LedgerEvent::Duplicate {
                            key: discovery.key.clone(),
                            entity: stub.id,
                        });
                        report.error = Some(item_error(
                            &discovery.key,
                            CommitAction::CreateRelationship,
                            error,
                        ));
                    }
                }
                report.stub = Some(stub);
            }
            WorkItem::Link {
                discovery,
                target,
                target_kind,
                target_sub_kind,
            } => {
                let edge = edge_for(primary, &discovery, target_kind, target_sub_kind.as_deref());
                report.resolved = Some((discovery.key.clone(), target));
                match self.link_once(primary, target, edge).await {
                    Ok((relationship, created)) => {
                        report.edge_created = created;
                        report.events.push(LedgerEvent::Committed {
                            key: discovery.key.clone(),
                            entity: target,
                        });
                        report.committed = Some(CommittedDiscovery {
                            key: discovery.key,
                            entity: target,
                            created: false,
                            relationship: Some(relationship),
                        });
                    }
                    Err(error) => {
                        report.error = Some(item_error(
                            &discovery.key,
                            CommitAction::CreateRelationship,
                            error,
                        ));
                    }
                }
            }
            WorkItem::Resolution { label, fact } => {
                match self.bounded(self.store.append_fact(fact)).await {
                    Ok(fact) => report.fact = Some(fact),
                    Err(error) => {
                        report.error = Some(CommitItemError {
                            key: label,
                            action: CommitAction::RecordResolution,
                            source: error.into(),
                        });
                    }
                }
            }
        }
        report
    }

    /// Like [`Self::link`], but reuses an identical edge that already exists.
    async fn link_once(
        &self,
        primary: &Entity,
        other: EntityId,
        edge: InferredEdge,
    ) -> Result<(Relationship, bool), StoreError> {
        let (source, target) = edge.endpoints(primary.id, other);
        let existing = self
            .bounded(self.store.relationships_of(primary.id))
            .await?
            .into_iter()
            .find(|r| r.source == source && r.target == target && r.kind == edge.kind);
        match existing {
            Some(relationship) => {
                debug!(id = %relationship.id, kind = %edge.kind, "edge already recorded");
                Ok((relationship, false))
            }
            None => Ok((self.link(primary, other, edge).await?, true)),
        }
    }

    async fn link(&self, primary: &Entity, other: EntityId, edge: InferredEdge) -> Result<Relationship, StoreError> {
        let (source, target) = edge.endpoints(primary.id, other);
        let relationship = NewRelationship::new(source, target, edge.kind);
        self.bounded(self.store.create_relationship(self.campaign, relationship))
            .await
    }

    /// Run a store call under the per-item timeout.
    async fn bounded<T>(&self, call: impl Future<Output = Result<T, StoreError>>) -> Result<T, StoreError> {
        let limit = self.config.item_timeout;
        timeout(limit, call)
            .await
            .unwrap_or(Err(StoreError::Timeout(limit)))
    }
}

/// The edge between the authored entity and a Discovery's entity.
fn edge_for(
    primary: &Entity,
    discovery: &Discovery,
    target_kind: Option<EntityKind>,
    target_sub_kind: Option<&str>,
) -> InferredEdge {
    if let Some(kind) = discovery.relationship {
        return InferredEdge::forward(kind);
    }
    match target_kind {
        Some(kind) => infer(primary.kind, primary.sub_kind.as_deref(), kind, target_sub_kind),
        None => InferredEdge::forward(RelationshipKind::ConnectedTo),
    }
}

fn item_error(key: &DiscoveryKey, action: CommitAction, error: StoreError) -> CommitItemError {
    CommitItemError {
        key: key.to_string(),
        action,
        source: error.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{ConflictKey, ConflictKind, Resolution};
    use crate::discovery::{DiscoverySource, Ledger, MatchConfig};
    use crate::model::{FactCategory, Lifecycle, RosterEntry};
    use crate::store::MemoryStore;

    fn stub_request(name: &str, kind: Option<EntityKind>) -> Discovery {
        let mut discovery = Discovery::new(
            name,
            DiscoverySource::Structured {
                field: "key_members".to_string(),
            },
        )
        .unwrap()
        .with_kind(kind)
        .with_context(format!("{name} sits on the council"));
        discovery.status = DiscoveryStatus::CreateStub;
        discovery
    }

    fn coordinator(store: &Arc<MemoryStore>, campaign: CampaignId) -> CommitCoordinator {
        CommitCoordinator::new(store.clone(), campaign, CommitConfig::default())
    }

    #[tokio::test]
    async fn test_faction_members_become_npc_stubs() {
        let store = Arc::new(MemoryStore::new());
        let campaign = CampaignId::new();
        let discoveries = vec![
            stub_request("Brother Ansel", Some(EntityKind::Npc)),
            stub_request("Mother Grell", Some(EntityKind::Npc)),
        ];
        let mut index = MatchIndex::empty();

        let outcome = coordinator(&store, campaign)
            .commit(
                PrimaryDraft::Create(EntityDraft::new(EntityKind::Faction, "Lantern Guild")),
                &discoveries,
                &[],
                &mut index,
            )
            .await;

        assert!(outcome.is_complete(), "{}", outcome.summary());
        let guild = outcome.created_entity.clone().unwrap();
        assert_eq!(outcome.created_stubs.len(), 2);
        for stub in &outcome.created_stubs {
            assert_eq!(stub.kind, EntityKind::Npc);
            assert_eq!(stub.lifecycle, Lifecycle::Stub);
            assert!(stub.needs_review);
            assert!(stub.origin_context.as_deref().unwrap().contains("council"));
        }
        assert_eq!(outcome.relationships.len(), 2);
        for edge in &outcome.relationships {
            assert_eq!(edge.kind, RelationshipKind::MemberOf);
            assert_eq!(edge.target, guild.id);
        }

        let ansel = DiscoveryKey::from_name("Brother Ansel").unwrap();
        let ansel_id = outcome.entity_for(&ansel).unwrap();
        assert_eq!(store.get_entity(ansel_id).await.unwrap().name, "Brother Ansel");
        assert_eq!(store.roster(campaign).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_recommit_links_instead_of_duplicating() {
        let store = Arc::new(MemoryStore::new());
        let campaign = CampaignId::new();
        let discoveries = vec![stub_request("Brother Ansel", Some(EntityKind::Npc))];
        let mut index = MatchIndex::empty();
        let coordinator = coordinator(&store, campaign);

        let first = coordinator
            .commit(
                PrimaryDraft::Create(EntityDraft::new(EntityKind::Location, "Saltmarsh")),
                &discoveries,
                &[],
                &mut index,
            )
            .await;
        let town = first.created_entity.clone().unwrap();
        let second = coordinator
            .commit(
                PrimaryDraft::Update {
                    id: town.id,
                    draft: EntityDraft::new(EntityKind::Location, "Saltmarsh"),
                },
                &discoveries,
                &[],
                &mut index,
            )
            .await;

        assert!(second.is_complete());
        assert!(second.created_stubs.is_empty());
        let key = DiscoveryKey::from_name("Brother Ansel").unwrap();
        assert_eq!(first.entity_for(&key), second.entity_for(&key));
        let npcs = store
            .roster(campaign)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EntityKind::Npc)
            .count();
        assert_eq!(npcs, 1);
        assert!(matches!(
            second.ledger_events().first(),
            Some(LedgerEvent::Duplicate { .. })
        ));

        // The edge from the first commit is reused, not written again.
        assert!(second.relationships.is_empty());
        assert_eq!(store.relationships_of(town.id).await.unwrap().len(), 1);
        assert_eq!(second.committed[0].relationship, first.committed[0].relationship);
        assert!(!second.committed[0].created);
    }

    #[tokio::test]
    async fn test_same_key_twice_in_one_commit_creates_one_stub() {
        let store = Arc::new(MemoryStore::new());
        let campaign = CampaignId::new();
        let mut leader = stub_request("brother ansel - the bell keeper", Some(EntityKind::Npc));
        leader.sources = [DiscoverySource::Structured {
            field: "leaders".to_string(),
        }]
        .into_iter()
        .collect();
        let discoveries = vec![
            stub_request("Brother Ansel", Some(EntityKind::Npc)),
            leader,
        ];
        assert_eq!(discoveries[0].key, discoveries[1].key);

        let outcome = coordinator(&store, campaign)
            .commit(
                PrimaryDraft::Create(EntityDraft::new(EntityKind::Faction, "Lantern Guild")),
                &discoveries,
                &[],
                &mut MatchIndex::empty(),
            )
            .await;

        assert!(outcome.is_complete(), "{}", outcome.summary());
        assert_eq!(outcome.created_stubs.len(), 1);
        let npcs = store
            .roster(campaign)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EntityKind::Npc)
            .count();
        assert_eq!(npcs, 1);

        let ansel = outcome.created_stubs[0].id;
        assert_eq!(outcome.committed.len(), 2);
        assert!(outcome.committed.iter().all(|c| c.entity == ansel));
        assert_eq!(outcome.relationships.len(), 1);
        assert_eq!(store.counts(campaign).await.relationships, 1);

        // The ledger sees one commit for the key.
        let mut ledger = Ledger::from_batch(discoveries[..1].iter().cloned().collect());
        for event in outcome.ledger_events() {
            ledger.apply(event.clone()).unwrap();
        }
        assert_eq!(
            ledger.get(&discoveries[0].key).unwrap().status,
            DiscoveryStatus::Committed(ansel)
        );
    }

    #[tokio::test]
    async fn test_stub_matching_roster_becomes_link() {
        let store = Arc::new(MemoryStore::new());
        let campaign = CampaignId::new();
        let vale = store
            .create_entity(campaign, EntityDraft::new(EntityKind::Npc, "Captain Vale"))
            .await
            .unwrap();
        let mut index = MatchIndex::build(&[vale.roster_entry()], MatchConfig::default());

        let outcome = coordinator(&store, campaign)
            .commit(
                PrimaryDraft::Create(EntityDraft::new(EntityKind::Location, "Saltmarsh")),
                &[stub_request("captain vale", Some(EntityKind::Npc))],
                &[],
                &mut index,
            )
            .await;

        assert!(outcome.created_stubs.is_empty());
        assert_eq!(outcome.committed.len(), 1);
        assert_eq!(outcome.committed[0].entity, vale.id);
        let edge = outcome.relationships[0].clone();
        assert_eq!(edge.kind, RelationshipKind::InhabitedBy);
        assert_eq!(edge.target, vale.id);
        // The known entity is not mutated.
        assert_eq!(store.get_entity(vale.id).await.unwrap().updated_at, vale.updated_at);
    }

    #[tokio::test]
    async fn test_unclassified_stub_is_item_error() {
        let store = Arc::new(MemoryStore::new());
        let campaign = CampaignId::new();
        let outcome = coordinator(&store, campaign)
            .commit(
                PrimaryDraft::Create(EntityDraft::new(EntityKind::Location, "Saltmarsh")),
                &[
                    stub_request("Warehouse 7", Some(EntityKind::Location)),
                    stub_request("The Gray Lady", None),
                ],
                &[],
                &mut MatchIndex::empty(),
            )
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].source, ItemFailure::Unclassified);
        assert_eq!(outcome.created_stubs.len(), 1);
        assert_eq!(outcome.summary(), "entity saved; 1 of 2 linked items failed");
    }

    #[tokio::test]
    async fn test_override_relationship_and_link_existing() {
        let store = Arc::new(MemoryStore::new());
        let campaign = CampaignId::new();
        let coast = store
            .create_entity(
                campaign,
                EntityDraft::new(EntityKind::Location, "Azure Coast").with_sub_kind("region"),
            )
            .await
            .unwrap();
        let mut index = MatchIndex::build(
            &[RosterEntry::new(coast.id, "Azure Coast", EntityKind::Location)],
            MatchConfig::default(),
        );
        let mut parent = Discovery::new(
            "Azure Coast",
            DiscoverySource::Structured {
                field: "parent".to_string(),
            },
        )
        .unwrap()
        .with_relationship(RelationshipKind::LocatedWithin);
        parent.status = DiscoveryStatus::LinkExisting(coast.id);

        let outcome = coordinator(&store, campaign)
            .commit(
                PrimaryDraft::Create(EntityDraft::new(EntityKind::Location, "Saltmarsh")),
                &[parent],
                &[],
                &mut index,
            )
            .await;

        let town = outcome.created_entity.clone().unwrap();
        let edge = &outcome.relationships[0];
        assert_eq!(edge.kind, RelationshipKind::LocatedWithin);
        assert_eq!((edge.source, edge.target), (town.id, coast.id));
    }

    #[tokio::test]
    async fn test_resolved_conflicts_append_facts() {
        let store = Arc::new(MemoryStore::new());
        let campaign = CampaignId::new();
        let vale = store
            .create_entity(campaign, EntityDraft::new(EntityKind::Npc, "Captain Vale"))
            .await
            .unwrap();
        let old = store
            .append_fact(NewFact::new(vale.id, FactCategory::Status, "alive", FactSource::Generated))
            .await
            .unwrap();

        let conflict = |resolution| Conflict {
            key: ConflictKey {
                entity: vale.id,
                category: FactCategory::Status,
            },
            entity_name: "Captain Vale".to_string(),
            kind: ConflictKind::Structured,
            new_text: "dead".to_string(),
            old_text: "alive".to_string(),
            old_fact: old.id,
            resolution,
        };
        let conflicts = vec![
            conflict(Resolution::TakeNew),
            Conflict {
                key: ConflictKey {
                    entity: vale.id,
                    category: FactCategory::Location,
                },
                ..conflict(Resolution::Unresolved)
            },
        ];

        let outcome = coordinator(&store, campaign)
            .commit(
                PrimaryDraft::Create(EntityDraft::new(EntityKind::Location, "Saltmarsh")),
                &[],
                &conflicts,
                &mut MatchIndex::empty(),
            )
            .await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.facts.len(), 1);
        assert_eq!(outcome.facts[0].content, "dead");
        assert_eq!(outcome.facts[0].source, FactSource::ConflictResolution);

        let history = store.facts_for(&[vale.id]).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().any(|f| f.id == old.id));
    }

    #[tokio::test]
    async fn test_primary_failure_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let campaign = CampaignId::new();
        let outcome = coordinator(&store, campaign)
            .commit(
                PrimaryDraft::Create(EntityDraft::new(EntityKind::Location, "   ")),
                &[stub_request("Warehouse 7", Some(EntityKind::Location))],
                &[],
                &mut MatchIndex::empty(),
            )
            .await;

        assert!(!outcome.success);
        assert!(matches!(outcome.fatal, Some(CommitFatalError::Create(StoreError::Invalid(_)))));
        assert!(outcome.summary().starts_with("entity not saved"));
        assert_eq!(store.counts(campaign).await.entities, 0);
    }

    #[tokio::test]
    async fn test_ledger_events_commit_the_ledger() {
        let store = Arc::new(MemoryStore::new());
        let campaign = CampaignId::new();
        let discoveries = vec![stub_request("Brother Ansel", Some(EntityKind::Npc))];
        let mut ledger = Ledger::from_batch(discoveries.iter().cloned().collect());

        let outcome = coordinator(&store, campaign)
            .commit(
                PrimaryDraft::Create(EntityDraft::new(EntityKind::Faction, "Lantern Guild")),
                &ledger.actionable(),
                &[],
                &mut MatchIndex::empty(),
            )
            .await;
        for event in outcome.ledger_events() {
            ledger.apply(event.clone()).unwrap();
        }

        assert!(ledger.actionable().is_empty());
        let key = DiscoveryKey::from_name("Brother Ansel").unwrap();
        assert_eq!(
            ledger.get(&key).unwrap().status,
            DiscoveryStatus::Committed(outcome.entity_for(&key).unwrap())
        );
    }
}
