//! Pass orchestration
//!
//! Every pass follows the same shape: read all of its input first (a read
//! failure aborts the pass before anything is written), compute rows with
//! the pure stage functions, then write them one record at a time with
//! retry, dead-lettering and a cancellation check before each record.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::Duration;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SynapseError};
use crate::memory::{
    ConsolidationOutcome, Fate, MemoryRecord, WorkingMemoryEntry, WorkingMemoryStatus,
};
use crate::oracle::GuardedOracle;
use crate::pipeline::consolidation::{self, EdgeEndpoint, Replay};
use crate::pipeline::ltm::{self, LtmInput};
use crate::pipeline::stm;
use crate::pipeline::working_memory;
use crate::pipeline::{PassContext, PassSummary, Stage};
use crate::storage::{DeadLetter, DeadLetterSet, RecordStore, RetryPolicy, RowKind, with_retry};

/// Runs the four passes against a record store
pub struct Engine {
    store: Arc<dyn RecordStore>,
    oracle: Arc<GuardedOracle>,
    dead_letters: Arc<DeadLetterSet>,
}

/// Any failure while reading a pass's input is fatal for the pass
fn input_unavailable(e: SynapseError) -> SynapseError {
    match e {
        SynapseError::StoreUnavailable(_) => e,
        other => SynapseError::StoreUnavailable(other.to_string()),
    }
}

/// Repair a record read from the store, counting each defaulted field
fn sanitize(record: &mut MemoryRecord, summary: &mut PassSummary) {
    for repair in record.sanitize() {
        warn!(
            "{}",
            SynapseError::InputMalformed(format!("record {}: {}", record.id, repair))
        );
        summary.repaired += 1;
    }
}

impl Engine {
    pub fn new(store: Arc<dyn RecordStore>, oracle: GuardedOracle) -> Self {
        Self {
            store,
            oracle: Arc::new(oracle),
            dead_letters: Arc::new(DeadLetterSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn dead_letters(&self) -> &DeadLetterSet {
        &self.dead_letters
    }

    /// Run `stage` once
    pub async fn run(&self, stage: Stage, ctx: &PassContext) -> Result<PassSummary> {
        match stage {
            Stage::WorkingMemory => self.run_working_memory(ctx).await,
            Stage::Stm => self.run_stm(ctx).await,
            Stage::Consolidation => self.run_consolidation(ctx).await,
            Stage::Ltm => self.run_ltm(ctx).await,
        }
    }

    /// Run every stage in order, stopping after a cancelled pass
    pub async fn run_all(&self, ctx: &PassContext) -> Result<Vec<PassSummary>> {
        let mut summaries = Vec::with_capacity(Stage::ALL.len());
        for stage in Stage::ALL {
            let summary = self.run(stage, ctx).await?;
            let cancelled = summary.cancelled;
            summaries.push(summary);
            if cancelled {
                break;
            }
        }
        Ok(summaries)
    }

    /// Whether the pass should stop before writing the next record
    fn should_stop(&self, ctx: &PassContext, summary: &mut PassSummary) -> bool {
        if ctx.cancel.is_cancelled() {
            if !summary.cancelled {
                info!("{} pass {} cancelled", summary.stage, ctx.run_id);
            }
            summary.cancelled = true;
        }
        summary.cancelled
    }

    /// Write one row with retry; park it as a dead letter when retries run out.
    async fn persist<F, Fut>(
        &self,
        ctx: &PassContext,
        kind: RowKind,
        id: Uuid,
        summary: &mut PassSummary,
        op: F,
    ) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let stage = summary.stage;
        let policy = RetryPolicy::from_config(&ctx.config.persistence);
        match with_retry(&policy, stage.as_str(), op).await {
            Ok(()) => {
                self.dead_letters.clear(stage, kind, id);
                true
            }
            Err(e) => {
                warn!("Dead-lettering {} {} row {}: {}", stage, kind, id, e);
                summary.errors += 1;
                summary.dead_lettered += 1;
                self.dead_letters.park(DeadLetter {
                    row_id: id,
                    kind,
                    stage,
                    cutoff: ctx.cutoff,
                    attempts: policy.max_attempts,
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    /// Rank the attention window ending at the cutoff.
    pub async fn run_working_memory(&self, ctx: &PassContext) -> Result<PassSummary> {
        let config = &ctx.config.working_memory;
        let mut summary = PassSummary::new(Stage::WorkingMemory);

        let from = ctx.cutoff - Duration::minutes(config.window_minutes);
        let touched = self
            .store
            .records_accessed_between(from, ctx.cutoff)
            .await
            .map_err(input_unavailable)?;
        let previous: HashMap<Uuid, WorkingMemoryEntry> = self
            .store
            .working_memory_entries()
            .await
            .map_err(input_unavailable)?
            .into_iter()
            .map(|e| (e.record_id, e))
            .collect();

        summary.records_in = touched.len();
        let mut candidates = Vec::with_capacity(touched.len());
        for mut record in touched {
            if record.forgotten {
                summary.skipped += 1;
                continue;
            }
            sanitize(&mut record, &mut summary);
            candidates.push(record);
        }

        let view = working_memory::rank_window(&candidates, &previous, ctx.cutoff, config);
        summary.overloaded = view.overloaded;
        if view.overloaded {
            warn!(
                "Working memory overloaded: {} contending for {} slots",
                view.contending, config.capacity_ceiling
            );
        }

        for entry in view.entries.iter().chain(view.expired.iter()) {
            if self.should_stop(ctx, &mut summary) {
                break;
            }
            if self
                .persist(ctx, RowKind::Record, entry.record_id, &mut summary, || {
                    self.store.upsert_working_memory_entry(entry)
                })
                .await
            {
                summary.records_out += 1;
            }
        }

        info!("{}", summary);
        Ok(summary)
    }

    /// Promote graduates into episodes.
    pub async fn run_stm(&self, ctx: &PassContext) -> Result<PassSummary> {
        let config = &ctx.config;
        let mut summary = PassSummary::new(Stage::Stm);

        let entries = self
            .store
            .working_memory_entries()
            .await
            .map_err(input_unavailable)?;
        let existing_episodes = self.store.episodes().await.map_err(input_unavailable)?;

        let mut promoted = Vec::new();
        for entry in entries
            .iter()
            .filter(|e| e.status == WorkingMemoryStatus::Active)
        {
            summary.records_in += 1;
            let Some(mut record) = self
                .store
                .get_record(entry.record_id)
                .await
                .map_err(input_unavailable)?
            else {
                debug!("Working memory row {} has no record", entry.record_id);
                summary.skipped += 1;
                continue;
            };
            if record.forgotten {
                summary.skipped += 1;
                continue;
            }
            sanitize(&mut record, &mut summary);
            if stm::graduates(entry, record.activation_strength, &config.stm) {
                promoted.push(record);
            } else {
                summary.skipped += 1;
            }
        }

        let plan = stm::organize(
            promoted,
            self.oracle.rules(),
            ctx.cutoff,
            &config.stm,
            &config.working_memory,
        );
        summary.skipped += plan.deferred.len();
        debug!(
            "STM admitted {} records into {} episodes, deferred {}",
            plan.entries.len(),
            plan.episodes.len(),
            plan.deferred.len()
        );

        // An episode that lost a member to re-clustering is closed for good
        let planned: HashSet<Uuid> = plan.episodes.iter().map(|e| e.cluster_id).collect();
        let admitted: HashSet<Uuid> = plan.entries.iter().map(|e| e.record_id).collect();
        let superseded: Vec<Uuid> = existing_episodes
            .iter()
            .filter(|e| !planned.contains(&e.cluster_id))
            .filter(|e| e.member_ids.iter().any(|m| admitted.contains(m)))
            .map(|e| e.cluster_id)
            .collect();

        for episode in &plan.episodes {
            if self.should_stop(ctx, &mut summary) {
                break;
            }
            self.persist(ctx, RowKind::Episode, episode.cluster_id, &mut summary, || {
                self.store.upsert_episode(episode)
            })
            .await;
        }

        for cluster_id in superseded {
            if self.should_stop(ctx, &mut summary) {
                break;
            }
            debug!("Retiring superseded episode {}", cluster_id);
            self.persist(ctx, RowKind::Episode, cluster_id, &mut summary, || {
                self.store.remove_episode(cluster_id)
            })
            .await;
        }

        for entry in &plan.entries {
            if self.should_stop(ctx, &mut summary) {
                break;
            }
            if self
                .persist(ctx, RowKind::Record, entry.record_id, &mut summary, || {
                    self.store.upsert_stm_entry(entry)
                })
                .await
            {
                summary.records_out += 1;
            }
        }

        info!("{}", summary);
        Ok(summary)
    }

    /// Replay ready STM entries and decide their fate.
    pub async fn run_consolidation(&self, ctx: &PassContext) -> Result<PassSummary> {
        let config = &ctx.config;
        let mut summary = PassSummary::new(Stage::Consolidation);

        let entries = self
            .store
            .stm_entries()
            .await
            .map_err(input_unavailable)?;
        let consolidated: HashMap<Uuid, ConsolidationOutcome> = self
            .store
            .outcomes()
            .await
            .map_err(input_unavailable)?
            .into_iter()
            .map(|o| (o.record_id, o))
            .collect();

        let mut inputs = Vec::new();
        for entry in entries.iter().filter(|e| e.ready) {
            summary.records_in += 1;
            let closed = consolidated
                .get(&entry.record_id)
                .map(|o| o.episode_id == entry.episode_id)
                .unwrap_or(false);
            if closed {
                summary.skipped += 1;
                continue;
            }
            match self
                .store
                .get_record(entry.record_id)
                .await
                .map_err(input_unavailable)?
            {
                Some(record) if record.forgotten => {
                    debug!("Record {} already forgotten", record.id);
                    summary.skipped += 1;
                }
                Some(mut record) => {
                    sanitize(&mut record, &mut summary);
                    inputs.push((entry, record));
                }
                None => {
                    debug!("STM entry {} has no record", entry.record_id);
                    summary.skipped += 1;
                }
            }
        }
        summary.skipped += entries.len() - summary.records_in;

        let oracle = self.oracle.as_ref();
        let replays: Vec<Replay> = stream::iter(inputs)
            .map(|(entry, record)| {
                consolidation::replay(entry, record, oracle, &config.consolidation)
            })
            .buffered(config.pipeline.concurrency.max(1))
            .collect()
            .await;

        let coherence: HashMap<Uuid, f32> = entries
            .iter()
            .map(|e| (e.record_id, e.coherence_score))
            .collect();

        let mut committed: HashSet<Uuid> = HashSet::new();
        for replay in &replays {
            if self.should_stop(ctx, &mut summary) {
                break;
            }
            if replay.degraded {
                summary.degraded += 1;
                debug!(
                    "{}",
                    SynapseError::EnrichmentUnavailable(format!(
                        "record {} consolidated with rule fallback",
                        replay.record.id
                    ))
                );
            }

            let record = &replay.record;
            let id = record.id;

            // Outcome first, then the record; a record that cannot be
            // written takes its outcome back out so the next pass replays it.
            let outcome_ok = match &replay.outcome {
                Some(outcome) => {
                    self.persist(ctx, RowKind::Record, id, &mut summary, || {
                        self.store.upsert_outcome(outcome)
                    })
                    .await
                }
                None => {
                    self.persist(ctx, RowKind::Record, id, &mut summary, || {
                        self.store.remove_outcome(id)
                    })
                    .await
                }
            };
            if !outcome_ok {
                continue;
            }

            let record_ok = self
                .persist(ctx, RowKind::Record, id, &mut summary, || {
                    self.store.upsert_record(record)
                })
                .await;
            if !record_ok {
                if replay.outcome.is_some() {
                    if let Err(e) = self.store.remove_outcome(id).await {
                        warn!("Could not withdraw outcome for {}: {}", id, e);
                    }
                }
                continue;
            }

            if replay.outcome.is_some() {
                committed.insert(id);
                summary.records_out += 1;
            } else {
                debug!("Record {} excluded and marked forgotten", id);
                summary.skipped += 1;
            }
        }

        if !summary.cancelled {
            let endpoints: Vec<EdgeEndpoint<'_>> = replays
                .iter()
                .filter(|r| committed.contains(&r.record.id))
                .filter_map(|r| {
                    r.outcome.as_ref().map(|o| EdgeEndpoint {
                        record: &r.record,
                        episode_id: o.episode_id,
                        coherence: coherence.get(&o.record_id).copied().unwrap_or(0.0),
                        entities: &r.entities,
                    })
                })
                .collect();
            let edges = consolidation::build_edges(&endpoints);
            debug!("Linking {} association edges", edges.len());
            for edge in &edges {
                if self.should_stop(ctx, &mut summary) {
                    break;
                }
                self.persist(ctx, RowKind::Edge, edge.key.row_id(), &mut summary, || {
                    self.store.upsert_edge(edge)
                })
                .await;
            }
        }

        info!("{}", summary);
        Ok(summary)
    }

    /// Place transferred memories into the semantic network.
    pub async fn run_ltm(&self, ctx: &PassContext) -> Result<PassSummary> {
        let config = &ctx.config.ltm;
        let mut summary = PassSummary::new(Stage::Ltm);

        let outcomes = self.store.outcomes().await.map_err(input_unavailable)?;
        let edges = self.store.edges().await.map_err(input_unavailable)?;

        let categories: HashMap<Uuid, String> = outcomes
            .iter()
            .filter_map(|o| o.semantic_category.clone().map(|c| (o.record_id, c)))
            .collect();

        let mut transferred = Vec::new();
        for outcome in &outcomes {
            if outcome.fate != Fate::CorticalTransfer {
                summary.skipped += 1;
                continue;
            }
            summary.records_in += 1;
            match self
                .store
                .get_record(outcome.record_id)
                .await
                .map_err(input_unavailable)?
            {
                Some(mut record) => {
                    sanitize(&mut record, &mut summary);
                    transferred.push((outcome, record));
                }
                None => summary.skipped += 1,
            }
        }

        let inputs: Vec<LtmInput<'_>> = transferred
            .iter()
            .map(|(outcome, record)| LtmInput {
                outcome: *outcome,
                record,
            })
            .collect();
        let nodes = ltm::build_network(&inputs, &edges, &categories, ctx.cutoff, config);
        debug!(
            "Semantic network: {} nodes, {} ranked",
            nodes.len(),
            nodes.iter().filter(|n| n.network_rank.is_some()).count()
        );

        for node in &nodes {
            if self.should_stop(ctx, &mut summary) {
                break;
            }
            if self
                .persist(ctx, RowKind::Record, node.record_id, &mut summary, || {
                    self.store.upsert_node(node)
                })
                .await
            {
                summary.records_out += 1;
            }
        }

        info!("{}", summary);
        Ok(summary)
    }
}
