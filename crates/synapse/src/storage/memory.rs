//! In-memory record store with JSON snapshots
//!
//! Reference [`RecordStore`] backed by `DashMap`s. A [`Snapshot`] holds every
//! table sorted by key, so saving the same state twice produces the same bytes.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SynapseError};
use crate::memory::{
    AssociationEdge, ConsolidationOutcome, EdgeKey, Episode, MemoryRecord, SemanticNode,
    StmEntry, WorkingMemoryEntry,
};
use crate::storage::RecordStore;

/// Serializable copy of every table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub records: Vec<MemoryRecord>,
    #[serde(default)]
    pub working_memory: Vec<WorkingMemoryEntry>,
    #[serde(default)]
    pub stm: Vec<StmEntry>,
    #[serde(default)]
    pub episodes: Vec<Episode>,
    #[serde(default)]
    pub outcomes: Vec<ConsolidationOutcome>,
    #[serde(default)]
    pub edges: Vec<AssociationEdge>,
    #[serde(default)]
    pub nodes: Vec<SemanticNode>,
}

/// Concurrent in-memory store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: DashMap<Uuid, MemoryRecord>,
    working_memory: DashMap<Uuid, WorkingMemoryEntry>,
    stm: DashMap<Uuid, StmEntry>,
    episodes: DashMap<Uuid, Episode>,
    outcomes: DashMap<Uuid, ConsolidationOutcome>,
    edges: DashMap<EdgeKey, AssociationEdge>,
    nodes: DashMap<Uuid, SemanticNode>,
}

fn sorted_values<K, V, F, O>(map: &DashMap<K, V>, key: F) -> Vec<V>
where
    K: Eq + std::hash::Hash,
    V: Clone,
    F: Fn(&V) -> O,
    O: Ord,
{
    let mut values: Vec<V> = map.iter().map(|e| e.value().clone()).collect();
    values.sort_by_key(|v| key(v));
    values
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with records, e.g. from an ingestion step
    pub fn with_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = MemoryRecord>,
    {
        let store = Self::new();
        for record in records {
            store.records.insert(record.id, record);
        }
        store
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::new();
        for r in snapshot.records {
            store.records.insert(r.id, r);
        }
        for e in snapshot.working_memory {
            store.working_memory.insert(e.record_id, e);
        }
        for e in snapshot.stm {
            store.stm.insert(e.record_id, e);
        }
        for e in snapshot.episodes {
            store.episodes.insert(e.cluster_id, e);
        }
        for o in snapshot.outcomes {
            store.outcomes.insert(o.record_id, o);
        }
        for e in snapshot.edges {
            store.edges.insert(e.key, e);
        }
        for n in snapshot.nodes {
            store.nodes.insert(n.record_id, n);
        }
        store
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            records: sorted_values(&self.records, |r| r.id),
            working_memory: sorted_values(&self.working_memory, |e| e.record_id),
            stm: sorted_values(&self.stm, |e| e.record_id),
            episodes: sorted_values(&self.episodes, |e| e.cluster_id),
            outcomes: sorted_values(&self.outcomes, |o| o.record_id),
            edges: sorted_values(&self.edges, |e| e.key),
            nodes: sorted_values(&self.nodes, |n| n.record_id),
        }
    }

    /// Load a snapshot file; a missing file yields an empty store.
    pub async fn load(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await? {
            info!("No snapshot at {}, starting empty", path.display());
            return Ok(Self::new());
        }
        let bytes = tokio::fs::read(path).await?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        debug!(
            "Loaded snapshot from {} ({} records)",
            path.display(),
            snapshot.records.len()
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Write a snapshot file, creating parent directories as needed.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(&self.snapshot())?;
        tokio::fs::write(path, json).await?;
        debug!("Saved snapshot to {}", path.display());
        Ok(())
    }

    /// Serialized snapshot, for comparing states byte for byte
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| SynapseError::Serialization(e.to_string()))
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn get_record(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn records_accessed_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MemoryRecord>> {
        let mut records: Vec<MemoryRecord> = self
            .records
            .iter()
            .filter(|r| r.last_accessed_at >= from && r.last_accessed_at <= to)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn upsert_record(&self, record: &MemoryRecord) -> Result<()> {
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn working_memory_entries(&self) -> Result<Vec<WorkingMemoryEntry>> {
        Ok(sorted_values(&self.working_memory, |e| e.record_id))
    }

    async fn upsert_working_memory_entry(&self, entry: &WorkingMemoryEntry) -> Result<()> {
        self.working_memory.insert(entry.record_id, entry.clone());
        Ok(())
    }

    async fn stm_entries(&self) -> Result<Vec<StmEntry>> {
        Ok(sorted_values(&self.stm, |e| e.record_id))
    }

    async fn upsert_stm_entry(&self, entry: &StmEntry) -> Result<()> {
        self.stm.insert(entry.record_id, entry.clone());
        Ok(())
    }

    async fn episodes(&self) -> Result<Vec<Episode>> {
        Ok(sorted_values(&self.episodes, |e| e.cluster_id))
    }

    async fn upsert_episode(&self, episode: &Episode) -> Result<()> {
        self.episodes.insert(episode.cluster_id, episode.clone());
        Ok(())
    }

    async fn remove_episode(&self, cluster_id: Uuid) -> Result<()> {
        self.episodes.remove(&cluster_id);
        Ok(())
    }

    async fn outcomes(&self) -> Result<Vec<ConsolidationOutcome>> {
        Ok(sorted_values(&self.outcomes, |o| o.record_id))
    }

    async fn upsert_outcome(&self, outcome: &ConsolidationOutcome) -> Result<()> {
        self.outcomes.insert(outcome.record_id, outcome.clone());
        Ok(())
    }

    async fn remove_outcome(&self, record_id: Uuid) -> Result<()> {
        self.outcomes.remove(&record_id);
        Ok(())
    }

    async fn edges(&self) -> Result<Vec<AssociationEdge>> {
        Ok(sorted_values(&self.edges, |e| e.key))
    }

    async fn upsert_edge(&self, edge: &AssociationEdge) -> Result<()> {
        self.edges.insert(edge.key, edge.clone());
        Ok(())
    }

    async fn nodes(&self) -> Result<Vec<SemanticNode>> {
        Ok(sorted_values(&self.nodes, |n| n.record_id))
    }

    async fn upsert_node(&self, node: &SemanticNode) -> Result<()> {
        self.nodes.insert(node.record_id, node.clone());
        Ok(())
    }
}
