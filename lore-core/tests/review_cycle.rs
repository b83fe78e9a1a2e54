//! End-to-end review cycles against the in-memory store.
//!
//! Run with: `cargo test -p lore-core --test review_cycle`

use lore_core::conflict::{AttributeClaim, ClaimSubject, ConflictKind, Resolution};
use lore_core::discovery::{DiscoveryKey, DiscoverySource, DiscoveryStatus, StructuredField};
use lore_core::model::{EntityDraft, EntityKind, FactCategory, Lifecycle, RelationshipKind};
use lore_core::persist::CampaignSnapshot;
use lore_core::testing::{assert_has_entity, assert_no_entity, ReviewHarness};
use lore_core::{GeneratedContent, LoreStore, PrimaryDraft};
use tempfile::TempDir;

fn key(name: &str) -> DiscoveryKey {
    DiscoveryKey::from_name(name).unwrap()
}

// =============================================================================
// Full cycle: scan, extract, detect, review, commit
// =============================================================================

#[tokio::test]
async fn test_full_review_cycle() {
    let harness = ReviewHarness::new();
    let vale = harness.seed(EntityKind::Npc, "Captain Vale").await;
    let tavern = harness.seed(EntityKind::Location, "The Rusty Anchor Tavern").await;
    harness.seed_fact(vale, FactCategory::Status, "alive").await;

    let mut session = harness.open(EntityKind::Location, "Saltmarsh").await;
    session
        .ingest(GeneratedContent {
            narrative: "Saltmarsh bustles at dawn. Captain Vale keeps the harbor while \
                        Brother Ansel rings the bells of the Temple of Tides."
                .to_string(),
            fields: vec![StructuredField::new(
                "contains",
                ["The Rusty Anchor Tavern - a dockside pub", "Warehouse 7 - a smugglers' cache"],
            )],
            claims: vec![AttributeClaim::named("Captain Vale", FactCategory::Status, "dead")],
        })
        .await
        .unwrap();

    // The authored entity and known entities are not rediscovered by the scan.
    let names: Vec<String> = session
        .current_discoveries()
        .iter()
        .map(|d| d.name.clone())
        .collect();
    assert_eq!(
        names,
        vec![
            "Brother Ansel",
            "Temple of Tides",
            "The Rusty Anchor Tavern",
            "Warehouse 7"
        ]
    );
    assert!(session
        .current_discoveries()
        .iter()
        .all(|d| d.status == DiscoveryStatus::Pending));

    let tavern_discovery = session.ledger().get(&key("The Rusty Anchor Tavern")).unwrap();
    assert_eq!(tavern_discovery.suggestion.as_ref().unwrap().entity_id, tavern);
    assert_eq!(tavern_discovery.context, "a dockside pub");

    let conflicts = session.current_conflicts().to_vec();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].kind, ConflictKind::Structured);
    assert_eq!(conflicts[0].old_text, "alive");

    session
        .set_discovery_status(&key("Brother Ansel"), DiscoveryStatus::CreateStub)
        .unwrap();
    session
        .set_discovery_status(&key("Temple of Tides"), DiscoveryStatus::Ignore)
        .unwrap();
    session
        .set_discovery_status(&key("The Rusty Anchor Tavern"), DiscoveryStatus::LinkExisting(tavern))
        .unwrap();
    session
        .set_discovery_status(&key("Warehouse 7"), DiscoveryStatus::CreateStub)
        .unwrap();
    session
        .set_conflict_resolution(conflicts[0].key, Resolution::TakeNew)
        .unwrap();

    let outcome = session.commit().await;
    assert!(outcome.is_complete(), "{}", outcome.summary());
    assert_eq!(outcome.created_stubs.len(), 2);
    assert_eq!(outcome.relationships.len(), 3);
    assert_eq!(outcome.facts.len(), 1);
    assert_eq!(outcome.summary(), "entity saved; 4 linked items committed");

    let town = assert_has_entity(&harness, "Saltmarsh").await;
    let ansel = assert_has_entity(&harness, "Brother Ansel").await;
    assert_eq!(ansel.lifecycle, Lifecycle::Stub);
    assert!(ansel.needs_review);
    assert_no_entity(&harness, "Temple of Tides").await;

    let edges = harness.edges_of("Saltmarsh").await;
    let kinds: Vec<RelationshipKind> = edges.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&RelationshipKind::InhabitedBy));
    assert_eq!(
        kinds.iter().filter(|k| **k == RelationshipKind::Contains).count(),
        2
    );
    assert!(edges.iter().all(|e| e.source == town.id));

    // Both the old and the new status are on record.
    let history = harness.store.facts_for(&[vale]).await.unwrap();
    assert_eq!(history.len(), 2);

    assert_eq!(
        session.ledger().get(&key("Warehouse 7")).unwrap().status,
        DiscoveryStatus::Committed(outcome.entity_for(&key("Warehouse 7")).unwrap())
    );
    assert!(session.current_conflicts().is_empty());

    // A second commit has nothing left to write.
    let again = session.commit().await;
    assert!(again.is_complete());
    assert!(again.created_stubs.is_empty());
    assert_eq!(harness.counts().await.entities, 5);
}

// =============================================================================
// Discard
// =============================================================================

#[tokio::test]
async fn test_discard_writes_nothing() {
    let harness = ReviewHarness::new();
    let mut session = harness.open(EntityKind::Faction, "Lantern Guild").await;
    session.ingest_narrative("Mother Grell and Brother Ansel lead the Lantern Guild.");
    session
        .add_manual_discovery("Warehouse 7", Some(EntityKind::Location))
        .unwrap();
    assert_eq!(session.current_discoveries().len(), 3);

    session.discard();

    let counts = harness.counts().await;
    assert_eq!(counts.entities, 0);
    assert_eq!(counts.facts, 0);
    assert_eq!(counts.relationships, 0);
}

// =============================================================================
// Ledger merging across sources
// =============================================================================

#[tokio::test]
async fn test_structured_discoveries_survive_rescan() {
    let harness = ReviewHarness::new();
    let mut session = harness.open(EntityKind::Location, "Saltmarsh").await;

    session.ingest_structured(&[StructuredField::new("contains", ["Warehouse 7"])]);
    session.ingest_narrative("Smugglers hid in Warehouse 7 overnight.");
    session.ingest_narrative("The tide rose over the docks.");

    let discoveries = session.current_discoveries();
    assert_eq!(discoveries.len(), 1);
    let warehouse = discoveries[0];
    assert_eq!(warehouse.suggested_kind, Some(EntityKind::Location));
    assert!(warehouse.sources.contains(&DiscoverySource::Scan));
    assert!(warehouse.sources.contains(&DiscoverySource::Structured {
        field: "contains".to_string()
    }));
    assert!(warehouse.context.contains("Smugglers"));
}

#[tokio::test]
async fn test_manual_add_merges_with_scan() {
    let harness = ReviewHarness::new();
    let mut session = harness.open(EntityKind::Location, "Saltmarsh").await;

    session.ingest_narrative("At noon Captain Vale waved from the pier.");
    assert_eq!(
        session.ledger().get(&key("captain vale")).unwrap().status,
        DiscoveryStatus::Pending
    );

    session
        .add_manual_discovery("Captain Vale", Some(EntityKind::Npc))
        .unwrap();

    let discoveries = session.current_discoveries();
    assert_eq!(discoveries.len(), 1);
    assert_eq!(discoveries[0].status, DiscoveryStatus::CreateStub);
    assert!(discoveries[0].context.contains("pier"));
}

#[tokio::test]
async fn test_fuzzy_match_is_only_a_suggestion() {
    let harness = ReviewHarness::new();
    let vale = harness.seed(EntityKind::Npc, "Captain Vale").await;
    let mut session = harness.open(EntityKind::Location, "Saltmarsh").await;

    session.ingest_narrative("At noon Captain Vael waved from the pier.");
    let discovery = session.ledger().get(&key("Captain Vael")).unwrap().clone();
    assert_eq!(discovery.status, DiscoveryStatus::Pending);
    let suggestion = discovery.suggestion.unwrap();
    assert_eq!(suggestion.entity_id, vale);
    assert_eq!(suggestion.name, "Captain Vale");

    session
        .set_discovery_status(&discovery.key, DiscoveryStatus::LinkExisting(suggestion.entity_id))
        .unwrap();
    let outcome = session.commit().await;

    assert!(outcome.is_complete());
    assert!(outcome.created_stubs.is_empty());
    assert_eq!(outcome.entity_for(&discovery.key), Some(vale));
    assert_eq!(harness.edges_of("Captain Vale").await.len(), 1);
}

// =============================================================================
// Completing a stub
// =============================================================================

#[tokio::test]
async fn test_completing_a_stub_promotes_it() {
    let harness = ReviewHarness::new();
    let vale = harness
        .seed_draft(EntityDraft::stub(
            EntityKind::Npc,
            "Captain Vale",
            "Captain Vale waved from the pier",
        ))
        .await;
    harness
        .seed_fact(vale, FactCategory::Personality, "gruff and silent")
        .await;

    let mut session = harness
        .open_primary(PrimaryDraft::Update {
            id: vale,
            draft: EntityDraft::new(EntityKind::Npc, "Captain Vale")
                .with_description("Harbor master of Saltmarsh"),
        })
        .await;
    session
        .ingest_claims(&[AttributeClaim::new(
            ClaimSubject::Authored,
            FactCategory::Personality,
            "cheerful and talkative",
        )])
        .await
        .unwrap();

    let conflicts = session.current_conflicts().to_vec();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].kind, ConflictKind::FreeText);
    session
        .set_conflict_resolution(
            conflicts[0].key,
            Resolution::MergedNote("gruff with strangers, warm with crew".to_string()),
        )
        .unwrap();

    let outcome = session.commit().await;
    assert!(outcome.is_complete());

    let completed = assert_has_entity(&harness, "Captain Vale").await;
    assert_eq!(completed.id, vale);
    assert_eq!(completed.lifecycle, Lifecycle::Active);
    assert!(!completed.needs_review);
    assert_eq!(outcome.facts[0].content, "gruff with strangers, warm with crew");
}

#[tokio::test]
async fn test_unresolved_conflicts_write_nothing() {
    let harness = ReviewHarness::new();
    let vale = harness.seed(EntityKind::Npc, "Captain Vale").await;
    harness.seed_fact(vale, FactCategory::Location, "Saltmarsh").await;

    let mut session = harness.open(EntityKind::Quest, "The Sunken Bell").await;
    session
        .ingest_claims(&[
            AttributeClaim::named("Captain Vale", FactCategory::Location, "the Sea Lion"),
            AttributeClaim::named("Nobody Known", FactCategory::Status, "dead"),
        ])
        .await
        .unwrap();
    assert_eq!(session.current_conflicts().len(), 1);

    let outcome = session.commit().await;
    assert!(outcome.facts.is_empty());
    assert_eq!(harness.store.facts_for(&[vale]).await.unwrap().len(), 1);
    assert_eq!(session.current_conflicts().len(), 1);
}

// =============================================================================
// Snapshot after commit
// =============================================================================

#[tokio::test]
async fn test_snapshot_after_commit() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("saltmarsh.json");
    let harness = ReviewHarness::new();

    let mut session = harness.open(EntityKind::Faction, "Lantern Guild").await;
    session.ingest_structured(&[StructuredField::new("key_members", ["Brother Ansel", "Mother Grell"])]);
    for name in ["Brother Ansel", "Mother Grell"] {
        session
            .set_discovery_status(&key(name), DiscoveryStatus::CreateStub)
            .unwrap();
    }
    let outcome = session.commit().await;
    assert!(outcome.is_complete());
    assert!(outcome
        .relationships
        .iter()
        .all(|r| r.kind == RelationshipKind::MemberOf));

    let snapshot = CampaignSnapshot::capture(harness.store.inner(), harness.campaign).await;
    assert_eq!(snapshot.metadata.stubs_needing_review, 2);
    snapshot.save_json(&path).await.unwrap();

    let restored = CampaignSnapshot::load_json(&path).await.unwrap().into_store();
    assert_eq!(restored.roster(harness.campaign).await.unwrap().len(), 3);
    assert_eq!(restored.counts(harness.campaign).await.relationships, 2);
}
