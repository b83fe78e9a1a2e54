//! The Discovery ledger: one deterministic reducer over discovery events.
//!
//! Scans, structured extractions, manual additions and review decisions all
//! arrive as [`LedgerEvent`]s. Merging is additive with dedup by identity key,
//! so a later re-scan of narrative text never drops Discoveries that came from
//! structured fields.

use super::{Discovery, DiscoveryBatch, DiscoveryKey, DiscoveryStatus, TransitionError};
use crate::model::{EntityId, EntityKind};
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

/// Errors from applying ledger events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("no discovery with key '{0}'")]
    UnknownDiscovery(DiscoveryKey),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Something that changes the ledger.
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    /// Discoveries from a scan or a structured extraction.
    Batch(DiscoveryBatch),
    /// A Discovery the user added directly.
    Manual(Discovery),
    /// A review decision.
    SetStatus {
        key: DiscoveryKey,
        status: DiscoveryStatus,
    },
    /// The user reclassified a Discovery.
    SetKind {
        key: DiscoveryKey,
        kind: Option<EntityKind>,
    },
    /// The commit found an existing entity for a stub request.
    Duplicate { key: DiscoveryKey, entity: EntityId },
    /// The commit wrote a Discovery out.
    Committed { key: DiscoveryKey, entity: EntityId },
}

/// Combine two Discoveries that share a key.
///
/// Commutative and idempotent: decisions beat pending, richer context wins,
/// higher-precedence sources win naming and classification, provenance is
/// unioned. Every tie is broken by a total order.
pub fn merge(a: Discovery, b: Discovery) -> Discovery {
    debug_assert_eq!(a.key, b.key);

    let status = merge_status(a.status, b.status);
    let context = pick_longer(&a.context, &b.context);
    let source_order = a.primary_source().cmp(&b.primary_source());

    let suggested_kind = match (a.suggested_kind, b.suggested_kind) {
        (Some(ka), Some(kb)) => Some(match source_order {
            Ordering::Greater => ka,
            Ordering::Less => kb,
            Ordering::Equal => ka.min(kb),
        }),
        (ka, kb) => ka.or(kb),
    };
    let name = match source_order {
        Ordering::Greater => a.name.clone(),
        Ordering::Less => b.name.clone(),
        Ordering::Equal => a.name.clone().min(b.name.clone()),
    };
    let relationship = match (a.relationship, b.relationship) {
        (Some(ra), Some(rb)) => Some(ra.min(rb)),
        (ra, rb) => ra.or(rb),
    };
    let suggestion = match (a.suggestion, b.suggestion) {
        (Some(sa), Some(sb)) => {
            let a_wins = sa.score > sb.score
                || (sa.score == sb.score && sa.entity_id <= sb.entity_id);
            Some(if a_wins { sa } else { sb })
        }
        (sa, sb) => sa.or(sb),
    };

    let mut sources = a.sources;
    sources.extend(b.sources);

    Discovery {
        key: a.key,
        name,
        suggested_kind,
        context,
        status,
        sources,
        relationship,
        suggestion,
        confidence: a.confidence.max(b.confidence),
    }
}

fn merge_status(a: DiscoveryStatus, b: DiscoveryStatus) -> DiscoveryStatus {
    match a.rank().cmp(&b.rank()) {
        Ordering::Greater => a,
        Ordering::Less => b,
        Ordering::Equal => match (a, b) {
            (DiscoveryStatus::LinkExisting(x), DiscoveryStatus::LinkExisting(y)) => {
                DiscoveryStatus::LinkExisting(x.min(y))
            }
            (DiscoveryStatus::Committed(x), DiscoveryStatus::Committed(y)) => {
                DiscoveryStatus::Committed(x.min(y))
            }
            _ => a,
        },
    }
}

fn pick_longer(a: &str, b: &str) -> String {
    match a.len().cmp(&b.len()) {
        Ordering::Greater => a.to_string(),
        Ordering::Less => b.to_string(),
        Ordering::Equal => a.min(b).to_string(),
    }
}

/// Deduplicated Discoveries for one review cycle, in first-insertion order.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: HashMap<DiscoveryKey, Discovery>,
    order: Vec<DiscoveryKey>,
}

impl PartialEq for Ledger {
    /// Ledgers are equal when they hold the same Discoveries, in any order.
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ledger from a single batch.
    pub fn from_batch(batch: DiscoveryBatch) -> Self {
        let mut ledger = Self::new();
        ledger.ingest(batch);
        ledger
    }

    /// Apply one event.
    pub fn apply(&mut self, event: LedgerEvent) -> Result<(), LedgerError> {
        match event {
            LedgerEvent::Batch(batch) => {
                self.ingest(batch);
                Ok(())
            }
            LedgerEvent::Manual(discovery) => {
                self.insert(discovery);
                Ok(())
            }
            LedgerEvent::SetStatus { key, status } => {
                let entry = self.entry_mut(&key)?;
                entry.status = entry.status.decide(status)?;
                Ok(())
            }
            LedgerEvent::SetKind { key, kind } => {
                self.entry_mut(&key)?.suggested_kind = kind;
                Ok(())
            }
            LedgerEvent::Duplicate { key, entity } => {
                let entry = self.entry_mut(&key)?;
                entry.status = entry.status.resolve_duplicate(entity)?;
                Ok(())
            }
            LedgerEvent::Committed { key, entity } => {
                let entry = self.entry_mut(&key)?;
                entry.status = entry.status.commit(entity)?;
                Ok(())
            }
        }
    }

    /// Merge every Discovery of a batch into the ledger.
    pub fn ingest(&mut self, batch: DiscoveryBatch) {
        for discovery in batch {
            self.insert(discovery);
        }
    }

    /// Merge another ledger into a copy of this one.
    pub fn merge(&self, other: &Ledger) -> Ledger {
        let mut merged = self.clone();
        for discovery in other.iter() {
            merged.insert(discovery.clone());
        }
        merged
    }

    fn insert(&mut self, discovery: Discovery) {
        match self.entries.remove(&discovery.key) {
            Some(existing) => {
                let merged = merge(existing, discovery);
                self.entries.insert(merged.key.clone(), merged);
            }
            None => {
                self.order.push(discovery.key.clone());
                self.entries.insert(discovery.key.clone(), discovery);
            }
        }
    }

    fn entry_mut(&mut self, key: &DiscoveryKey) -> Result<&mut Discovery, LedgerError> {
        self.entries
            .get_mut(key)
            .ok_or_else(|| LedgerError::UnknownDiscovery(key.clone()))
    }

    pub fn get(&self, key: &DiscoveryKey) -> Option<&Discovery> {
        self.entries.get(key)
    }

    /// Discoveries in first-insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Discovery> {
        self.order.iter().filter_map(|key| self.entries.get(key))
    }

    /// Discoveries the commit should act on.
    pub fn actionable(&self) -> Vec<Discovery> {
        self.iter()
            .filter(|d| {
                matches!(
                    d.status,
                    DiscoveryStatus::CreateStub | DiscoveryStatus::LinkExisting(_)
                )
            })
            .cloned()
            .collect()
    }

    /// Number of Discoveries still awaiting a decision.
    pub fn pending_count(&self) -> usize {
        self.iter().filter(|d| !d.status.is_decided()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
