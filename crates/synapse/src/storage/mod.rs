//! Record store abstraction
//!
//! Every stage reads and writes through [`RecordStore`]: point lookup,
//! range scan by access time and upsert by id. Scans return rows ordered by
//! their key so passes are deterministic regardless of backend.

pub mod dead_letter;
pub mod memory;
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::memory::{
    AssociationEdge, ConsolidationOutcome, Episode, MemoryRecord, SemanticNode, StmEntry,
    WorkingMemoryEntry,
};

pub use dead_letter::{DeadLetter, DeadLetterSet, RowKind};
pub use memory::{InMemoryStore, Snapshot};
pub use retry::{RetryPolicy, with_retry};

/// Key-indexed storage for records and the rows each stage emits
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Point lookup of a record
    async fn get_record(&self, id: Uuid) -> Result<Option<MemoryRecord>>;

    /// Records whose `last_accessed_at` lies in `[from, to]`, ordered by id
    async fn records_accessed_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MemoryRecord>>;

    async fn upsert_record(&self, record: &MemoryRecord) -> Result<()>;

    async fn working_memory_entries(&self) -> Result<Vec<WorkingMemoryEntry>>;
    async fn upsert_working_memory_entry(&self, entry: &WorkingMemoryEntry) -> Result<()>;

    async fn stm_entries(&self) -> Result<Vec<StmEntry>>;
    async fn upsert_stm_entry(&self, entry: &StmEntry) -> Result<()>;

    async fn episodes(&self) -> Result<Vec<Episode>>;
    async fn upsert_episode(&self, episode: &Episode) -> Result<()>;
    /// Drop an episode superseded by re-clustering; missing ids are not an error
    async fn remove_episode(&self, cluster_id: Uuid) -> Result<()>;

    async fn outcomes(&self) -> Result<Vec<ConsolidationOutcome>>;
    async fn upsert_outcome(&self, outcome: &ConsolidationOutcome) -> Result<()>;
    /// Drop a superseded outcome; missing ids are not an error
    async fn remove_outcome(&self, record_id: Uuid) -> Result<()>;

    async fn edges(&self) -> Result<Vec<AssociationEdge>>;
    async fn upsert_edge(&self, edge: &AssociationEdge) -> Result<()>;

    async fn nodes(&self) -> Result<Vec<SemanticNode>>;
    async fn upsert_node(&self, node: &SemanticNode) -> Result<()>;
}
