//! Lore discovery and commit engine for co-authored campaign worlds.
//!
//! This crate provides:
//! - Detection of entity mentions in generated narrative and structured output
//! - Deduplication against the campaign roster, exact and fuzzy
//! - Detection of generated claims that contradict recorded facts
//! - A review ledger with checked decisions
//! - A commit that saves the authored entity, stubs, edges and resolutions
//!   with per-item failure reporting
//!
//! # Quick Start
//!
//! ```ignore
//! use lore_core::{
//!     EntityDraft, EntityKind, GeneratedContent, MemoryStore, PrimaryDraft, ReviewSession,
//!     SessionConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let campaign = lore_core::CampaignId::new();
//!     let primary = PrimaryDraft::Create(EntityDraft::new(EntityKind::Location, "Saltmarsh"));
//!
//!     let mut session = ReviewSession::open(store, campaign, primary, SessionConfig::default()).await;
//!     session
//!         .ingest(GeneratedContent {
//!             narrative: "Captain Vale keeps the harbor at Saltmarsh.".to_string(),
//!             ..GeneratedContent::default()
//!         })
//!         .await?;
//!
//!     for discovery in session.current_discoveries() {
//!         println!("{} ({})", discovery.name, discovery.kind_label());
//!     }
//!
//!     let outcome = session.commit().await;
//!     println!("{}", outcome.summary());
//!     Ok(())
//! }
//! ```

pub mod commit;
pub mod conflict;
pub mod discovery;
pub mod infer;
pub mod model;
pub mod persist;
pub mod session;
pub mod store;
pub mod testing;

// Primary public API
pub use commit::{
    CommitAction, CommitConfig, CommitCoordinator, CommitFatalError, CommitItemError,
    CommitOutcome, CommittedDiscovery, ItemFailure, PrimaryDraft,
};
pub use conflict::{
    AttributeClaim, ClaimSubject, Conflict, ConflictKey, ConflictKind, ConflictPolicy, Resolution,
};
pub use discovery::{
    Discovery, DiscoveryBatch, DiscoveryKey, DiscoverySource, DiscoveryStatus, Ledger,
    LedgerEvent, MatchConfig, MatchIndex, MatchOutcome, ScanConfig, Scanner, StructuredField,
};
pub use infer::{infer, Direction, InferredEdge};
pub use model::{
    CampaignId, Entity, EntityDraft, EntityId, EntityKind, Fact, FactCategory, Lifecycle,
    Relationship, RelationshipKind, Visibility,
};
pub use persist::{CampaignSnapshot, PersistError};
pub use session::{GeneratedContent, ReviewSession, SessionConfig, SessionError};
pub use store::{LoreStore, MemoryStore, StoreError};
pub use testing::{FaultyStore, ReviewHarness, StoreOp};
