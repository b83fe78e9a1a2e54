//! Dedup index over the campaign roster.

use super::DiscoveryKey;
use crate::model::{CampaignId, EntityId, RosterEntry};
use crate::store::{LoreStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Errors from building the match index.
#[derive(Debug, Error)]
pub enum MatchIndexError {
    #[error("roster fetch failed: {0}")]
    Roster(#[from] StoreError),
}

/// Fuzzy matching thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Minimum edit-distance similarity (0.0 to 1.0) for a fuzzy match.
    pub min_fuzzy_score: f32,
    /// Shortest name that may match by substring containment.
    pub min_containment_len: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_fuzzy_score: 0.8,
            min_containment_len: 4,
        }
    }
}

/// Result of looking a name up in the index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOutcome {
    /// Nothing close.
    None,
    /// Same normalized name or alias.
    Exact(EntityId),
    /// Similar name; advisory only.
    Fuzzy { id: EntityId, score: f32 },
}

/// Name index built once per review cycle from the known-entity roster.
#[derive(Debug, Clone, Default)]
pub struct MatchIndex {
    exact: HashMap<DiscoveryKey, EntityId>,
    keys: Vec<(DiscoveryKey, EntityId)>,
    entries: HashMap<EntityId, RosterEntry>,
    config: MatchConfig,
}

impl MatchIndex {
    /// Build an index from a roster.
    pub fn build(roster: &[RosterEntry], config: MatchConfig) -> Self {
        let mut index = Self {
            config,
            ..Self::default()
        };
        for entry in roster {
            index.insert(entry.clone());
        }
        index
    }

    /// An index that knows no entities.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fetch the campaign roster and index it.
    pub async fn load(
        store: &dyn LoreStore,
        campaign: CampaignId,
        config: MatchConfig,
    ) -> Result<Self, MatchIndexError> {
        let roster = store.roster(campaign).await?;
        debug!(campaign = %campaign, entities = roster.len(), "built match index");
        Ok(Self::build(&roster, config))
    }

    /// Add an entity, e.g. one created earlier in the same commit.
    pub fn insert(&mut self, entry: RosterEntry) {
        let names = std::iter::once(&entry.name).chain(entry.aliases.iter());
        for name in names {
            if let Some(key) = DiscoveryKey::from_name(name) {
                if self.exact.insert(key.clone(), entry.id).is_none() {
                    self.keys.push((key, entry.id));
                }
            }
        }
        self.entries.insert(entry.id, entry);
    }

    /// Look up a name.
    pub fn match_name(&self, name: &str) -> MatchOutcome {
        match DiscoveryKey::from_name(name) {
            Some(key) => self.match_key(&key),
            None => MatchOutcome::None,
        }
    }

    /// Look up a normalized key.
    pub fn match_key(&self, key: &DiscoveryKey) -> MatchOutcome {
        if let Some(&id) = self.exact.get(key) {
            return MatchOutcome::Exact(id);
        }

        let mut best: Option<(f32, &DiscoveryKey, EntityId)> = None;
        for (known, id) in &self.keys {
            let score = self.similarity(key.as_str(), known.as_str());
            if score <= 0.0 {
                continue;
            }
            let better = match best {
                Some((best_score, best_key, _)) => {
                    score > best_score || (score == best_score && known < best_key)
                }
                None => true,
            };
            if better {
                best = Some((score, known, *id));
            }
        }

        match best {
            Some((score, _, id)) => MatchOutcome::Fuzzy { id, score },
            None => MatchOutcome::None,
        }
    }

    /// Exact lookup only.
    pub fn exact(&self, key: &DiscoveryKey) -> Option<EntityId> {
        self.exact.get(key).copied()
    }

    /// Roster entry for an indexed entity.
    pub fn entry(&self, id: EntityId) -> Option<&RosterEntry> {
        self.entries.get(&id)
    }

    /// Primary name of an indexed entity.
    pub fn name_of(&self, id: EntityId) -> Option<&str> {
        self.entries.get(&id).map(|e| e.name.as_str())
    }

    /// Number of indexed entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Similarity of two keys, or 0.0 when below the fuzzy thresholds.
    fn similarity(&self, a: &str, b: &str) -> f32 {
        let (len_a, len_b) = (a.chars().count(), b.chars().count());
        let (shorter, longer, short_len, long_len) = if len_a <= len_b {
            (a, b, len_a, len_b)
        } else {
            (b, a, len_b, len_a)
        };
        if long_len == 0 {
            return 0.0;
        }

        if short_len >= self.config.min_containment_len && longer.contains(shorter) {
            return (short_len as f32 / long_len as f32).max(0.6);
        }

        let max_distance = ((1.0 - self.config.min_fuzzy_score) * long_len as f32).floor() as usize;
        if long_len - short_len > max_distance {
            return 0.0;
        }
        let distance = levenshtein(a, b);
        if distance > max_distance {
            return 0.0;
        }
        1.0 - distance as f32 / long_len as f32
    }
}

/// Edit distance between two strings, by characters.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b_chars.len()]
}
