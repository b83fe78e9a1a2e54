//! Campaign snapshots for the in-memory store.
//!
//! A snapshot is a versioned JSON document holding every entity, fact and
//! relationship of one campaign, so a `MemoryStore` can be saved and reloaded.

use crate::model::{CampaignId, Entity, Fact, Relationship};
use crate::store::{MemoryState, MemoryStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::info;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current snapshot file version.
const SNAPSHOT_VERSION: u32 = 1;

/// A saved campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSnapshot {
    /// Format version for compatibility checking.
    pub version: u32,

    pub campaign: CampaignId,

    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,

    pub metadata: SnapshotMetadata,

    pub entities: Vec<Entity>,
    pub facts: Vec<Fact>,
    pub relationships: Vec<Relationship>,
}

/// Summary counts, readable without loading the whole snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub entities: usize,
    /// Stubs still flagged for review.
    pub stubs_needing_review: usize,
    pub facts: usize,
    pub relationships: usize,
}

impl CampaignSnapshot {
    /// Copy a campaign out of a store.
    pub async fn capture(store: &MemoryStore, campaign: CampaignId) -> Self {
        let (entities, facts, relationships) = store.campaign_rows(campaign).await;
        let metadata = SnapshotMetadata {
            entities: entities.len(),
            stubs_needing_review: entities
                .iter()
                .filter(|e| e.is_stub() && e.needs_review && !e.deleted)
                .count(),
            facts: facts.len(),
            relationships: relationships.len(),
        };
        Self {
            version: SNAPSHOT_VERSION,
            campaign,
            saved_at: Utc::now(),
            metadata,
            entities,
            facts,
            relationships,
        }
    }

    /// Replace the campaign in `store` with this snapshot's rows.
    pub async fn restore_into(self, store: &MemoryStore) {
        store
            .replace_campaign(self.campaign, self.entities, self.facts, self.relationships)
            .await;
    }

    /// Build a fresh store holding only this campaign.
    pub fn into_store(self) -> MemoryStore {
        let next_sequence = self.facts.iter().map(|f| f.sequence).max().unwrap_or(0);
        MemoryStore::from_state(MemoryState {
            entities: self.entities.into_iter().map(|e| (e.id, e)).collect(),
            facts: self.facts,
            relationships: self.relationships,
            next_sequence,
        })
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content).await?;
        info!(
            campaign = %self.campaign,
            entities = self.metadata.entities,
            path = %path.as_ref().display(),
            "saved campaign snapshot"
        );
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        let saved: Self = serde_json::from_str(&content)?;

        if saved.version != SNAPSHOT_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: saved.version,
            });
        }

        Ok(saved)
    }

    /// Read a snapshot's metadata without keeping its rows.
    pub async fn peek_metadata(path: impl AsRef<Path>) -> Result<SnapshotMetadata, PersistError> {
        let content = fs::read_to_string(path).await?;

        #[derive(Deserialize)]
        struct Partial {
            version: u32,
            metadata: SnapshotMetadata,
        }

        let partial: Partial = serde_json::from_str(&content)?;

        if partial.version != SNAPSHOT_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: partial.version,
            });
        }

        Ok(partial.metadata)
    }
}

/// Information about a snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub metadata: SnapshotMetadata,
}

/// List readable snapshot files in a directory.
pub async fn list_snapshots(dir: impl AsRef<Path>) -> Result<Vec<SnapshotInfo>, PersistError> {
    let mut snapshots = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            if let Ok(metadata) = CampaignSnapshot::peek_metadata(&path).await {
                snapshots.push(SnapshotInfo { path, metadata });
            }
        }
    }

    snapshots.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(snapshots)
}

/// File name for a campaign snapshot.
pub fn snapshot_path(base_dir: impl AsRef<Path>, campaign_name: &str) -> PathBuf {
    let sanitized = campaign_name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>();
    base_dir.as_ref().join(format!("{sanitized}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        EntityDraft, EntityKind, FactCategory, FactSource, NewFact, NewRelationship,
        RelationshipKind,
    };
    use crate::store::LoreStore;
    use tempfile::TempDir;

    async fn seeded() -> (MemoryStore, CampaignId) {
        let store = MemoryStore::new();
        let campaign = CampaignId::new();
        let town = store
            .create_entity(campaign, EntityDraft::new(EntityKind::Location, "Saltmarsh"))
            .await
            .unwrap();
        let vale = store
            .create_entity(
                campaign,
                EntityDraft::stub(EntityKind::Npc, "Captain Vale", "Vale runs the harbor"),
            )
            .await
            .unwrap();
        store
            .append_fact(NewFact::new(vale.id, FactCategory::Status, "alive", FactSource::Generated))
            .await
            .unwrap();
        store
            .create_relationship(
                campaign,
                NewRelationship::new(town.id, vale.id, RelationshipKind::InhabitedBy),
            )
            .await
            .unwrap();
        (store, campaign)
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = snapshot_path(temp_dir.path(), "Ghosts of Saltmarsh");
        let (store, campaign) = seeded().await;

        let snapshot = CampaignSnapshot::capture(&store, campaign).await;
        assert_eq!(snapshot.metadata.stubs_needing_review, 1);
        snapshot.save_json(&path).await.unwrap();

        let loaded = CampaignSnapshot::load_json(&path).await.unwrap();
        assert_eq!(loaded.campaign, campaign);
        assert_eq!(loaded.metadata, snapshot.metadata);

        let restored = loaded.into_store();
        let roster = restored.roster(campaign).await.unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(restored.counts(campaign).await, store.counts(campaign).await);

        // New facts continue the sequence.
        let vale = roster.iter().find(|e| e.name == "Captain Vale").unwrap();
        let fact = restored
            .append_fact(NewFact::new(vale.id, FactCategory::Status, "missing", FactSource::User))
            .await
            .unwrap();
        assert_eq!(fact.sequence, 2);
    }

    #[tokio::test]
    async fn test_restore_replaces_only_that_campaign() {
        let (store, campaign) = seeded().await;
        let snapshot = CampaignSnapshot::capture(&store, campaign).await;

        let other = CampaignId::new();
        store
            .create_entity(other, EntityDraft::new(EntityKind::Faction, "Sea Princes"))
            .await
            .unwrap();
        store
            .create_entity(campaign, EntityDraft::new(EntityKind::Item, "Silver Key"))
            .await
            .unwrap();

        snapshot.restore_into(&store).await;

        assert_eq!(store.roster(campaign).await.unwrap().len(), 2);
        assert_eq!(store.roster(other).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("old.json");
        let (store, campaign) = seeded().await;

        let mut snapshot = CampaignSnapshot::capture(&store, campaign).await;
        snapshot.version = 99;
        snapshot.save_json(&path).await.unwrap();

        let err = CampaignSnapshot::load_json(&path).await.unwrap_err();
        assert!(matches!(
            err,
            PersistError::VersionMismatch { expected: 1, found: 99 }
        ));
    }

    #[tokio::test]
    async fn test_list_snapshots() {
        let temp_dir = TempDir::new().unwrap();
        let (store, campaign) = seeded().await;
        let snapshot = CampaignSnapshot::capture(&store, campaign).await;

        snapshot
            .save_json(snapshot_path(temp_dir.path(), "one"))
            .await
            .unwrap();
        snapshot
            .save_json(snapshot_path(temp_dir.path(), "two"))
            .await
            .unwrap();
        fs::write(temp_dir.path().join("notes.json"), "{}").await.unwrap();
        fs::write(temp_dir.path().join("readme.txt"), "hi").await.unwrap();

        let snapshots = list_snapshots(temp_dir.path()).await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots[0].path.ends_with("one.json"));
    }
}
