//! Memory types and scoring
//!
//! Defines the record and per-stage row structures plus the bounded
//! arithmetic every stage shares.

pub mod scoring;
pub mod types;

pub use types::{
    AgeBucket, AssociationEdge, CentralityScores, CoherenceTier, ConsolidationOutcome,
    ConsolidationState, EdgeKey, Episode, Fate, MemoryRecord, SemanticNode, StmEntry,
    WorkingMemoryEntry, WorkingMemorySlot, WorkingMemoryStatus,
};
