//! Test utilities for synapse - scripted mocks
//!
//! This module provides:
//! - A scripted enrichment oracle that succeeds, fails, answers badly or hangs
//! - A record store wrapper that injects read and write failures

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{Result, SynapseError};
use crate::memory::{
    AssociationEdge, ConsolidationOutcome, Episode, MemoryRecord, SemanticNode, StmEntry,
    WorkingMemoryEntry,
};
use crate::oracle::{ActionTag, Directive, EnrichmentOracle, OracleError, StructuredExtraction};
use crate::storage::{InMemoryStore, RecordStore};

/// How a [`MockOracle`] answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOracleMode {
    /// A valid extraction with a summary
    Ok,
    /// `OracleError::Unavailable` every time
    Unavailable,
    /// An extraction that fails validation
    Invalid,
    /// Never answers
    Hang,
}

/// Scripted oracle that counts its calls
#[derive(Debug)]
pub struct MockOracle {
    mode: MockOracleMode,
    calls: AtomicU32,
}

impl MockOracle {
    pub fn new(mode: MockOracleMode) -> Self {
        Self {
            mode,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnrichmentOracle for MockOracle {
    async fn extract(
        &self,
        _text: &str,
        _directive: Directive,
    ) -> std::result::Result<StructuredExtraction, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            MockOracleMode::Ok => Ok(StructuredExtraction {
                goal: "building".to_string(),
                tasks: vec!["ship release".to_string()],
                actions: vec![ActionTag::new("ship", Some("release"))],
                entities: vec!["Synapse".to_string()],
                summary: Some("Shipped the release".to_string()),
            }),
            MockOracleMode::Unavailable => {
                Err(OracleError::Unavailable("mock is down".to_string()))
            }
            MockOracleMode::Invalid => Ok(StructuredExtraction {
                goal: String::new(),
                tasks: Vec::new(),
                actions: Vec::new(),
                entities: Vec::new(),
                summary: None,
            }),
            MockOracleMode::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Store wrapper that fails on demand.
///
/// Reads fail while `fail_reads` is set. Writes for a scripted id fail the
/// given number of times (`u32::MAX` means always) before reaching the
/// inner store. Rows are keyed by record id, episodes by cluster id and
/// edges by [`EdgeKey::row_id`](crate::memory::EdgeKey::row_id).
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    fail_reads: AtomicBool,
    write_failures: DashMap<Uuid, u32>,
    writes: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `times` writes keyed by `id`
    pub fn fail_writes_for(&self, id: Uuid, times: u32) {
        self.write_failures.insert(id, times);
    }

    /// Writes that reached the inner store
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(SynapseError::StoreUnavailable("injected read failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_write(&self, id: Uuid) -> Result<()> {
        if let Some(mut remaining) = self.write_failures.get_mut(&id) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(SynapseError::PersistenceFailure(format!(
                    "injected write failure for {id}"
                )));
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn get_record(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        self.check_read()?;
        self.inner.get_record(id).await
    }

    async fn records_accessed_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MemoryRecord>> {
        self.check_read()?;
        self.inner.records_accessed_between(from, to).await
    }

    async fn upsert_record(&self, record: &MemoryRecord) -> Result<()> {
        self.check_write(record.id)?;
        self.inner.upsert_record(record).await
    }

    async fn working_memory_entries(&self) -> Result<Vec<WorkingMemoryEntry>> {
        self.check_read()?;
        self.inner.working_memory_entries().await
    }

    async fn upsert_working_memory_entry(&self, entry: &WorkingMemoryEntry) -> Result<()> {
        self.check_write(entry.record_id)?;
        self.inner.upsert_working_memory_entry(entry).await
    }

    async fn stm_entries(&self) -> Result<Vec<StmEntry>> {
        self.check_read()?;
        self.inner.stm_entries().await
    }

    async fn upsert_stm_entry(&self, entry: &StmEntry) -> Result<()> {
        self.check_write(entry.record_id)?;
        self.inner.upsert_stm_entry(entry).await
    }

    async fn episodes(&self) -> Result<Vec<Episode>> {
        self.check_read()?;
        self.inner.episodes().await
    }

    async fn upsert_episode(&self, episode: &Episode) -> Result<()> {
        self.check_write(episode.cluster_id)?;
        self.inner.upsert_episode(episode).await
    }

    async fn remove_episode(&self, cluster_id: Uuid) -> Result<()> {
        self.check_write(cluster_id)?;
        self.inner.remove_episode(cluster_id).await
    }

    async fn outcomes(&self) -> Result<Vec<ConsolidationOutcome>> {
        self.check_read()?;
        self.inner.outcomes().await
    }

    async fn upsert_outcome(&self, outcome: &ConsolidationOutcome) -> Result<()> {
        self.check_write(outcome.record_id)?;
        self.inner.upsert_outcome(outcome).await
    }

    async fn remove_outcome(&self, record_id: Uuid) -> Result<()> {
        self.check_write(record_id)?;
        self.inner.remove_outcome(record_id).await
    }

    async fn edges(&self) -> Result<Vec<AssociationEdge>> {
        self.check_read()?;
        self.inner.edges().await
    }

    async fn upsert_edge(&self, edge: &AssociationEdge) -> Result<()> {
        self.check_write(edge.key.row_id())?;
        self.inner.upsert_edge(edge).await
    }

    async fn nodes(&self) -> Result<Vec<SemanticNode>> {
        self.check_read()?;
        self.inner.nodes().await
    }

    async fn upsert_node(&self, node: &SemanticNode) -> Result<()> {
        self.check_write(node.record_id)?;
        self.inner.upsert_node(node).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_oracle_counts_calls() {
        let oracle = MockOracle::new(MockOracleMode::Unavailable);
        assert!(oracle.extract("a", Directive::Gist).await.is_err());
        assert!(oracle.extract("b", Directive::Gist).await.is_err());
        assert_eq!(oracle.calls(), 2);
    }

    #[tokio::test]
    async fn mock_oracle_ok_is_valid() {
        let oracle = MockOracle::new(MockOracleMode::Ok);
        let extraction = oracle.extract("a", Directive::Gist).await.unwrap();
        assert!(extraction.validate(Directive::Gist).is_ok());
    }

    #[tokio::test]
    async fn flaky_store_fails_then_recovers() {
        let store = FlakyStore::new(InMemoryStore::new());
        let record = MemoryRecord::new("x", Utc::now());
        store.fail_writes_for(record.id, 1);

        assert!(store.upsert_record(&record).await.is_err());
        assert!(store.upsert_record(&record).await.is_ok());
        assert_eq!(store.writes(), 1);

        store.set_fail_reads(true);
        assert!(matches!(
            store.get_record(record.id).await,
            Err(SynapseError::StoreUnavailable(_))
        ));
    }
}
