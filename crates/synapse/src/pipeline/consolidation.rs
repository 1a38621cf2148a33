//! Consolidation engine
//!
//! Replays ready STM entries: extracts associations through the guarded
//! oracle, applies Hebbian strengthening and competitive forgetting, picks
//! a fate and, for transfer-strength memories, attaches a gist and a
//! semantic category. Also links surviving memories with association edges.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::config::ConsolidationConfig;
use crate::memory::scoring::{clamp_unit, jaccard};
use crate::memory::{AssociationEdge, ConsolidationOutcome, EdgeKey, Fate, MemoryRecord, StmEntry};
use crate::oracle::{Directive, GENERAL_GOAL, GuardedOracle};

/// Associations at which extraction richness saturates
const RICHNESS_SATURATION: f32 = 6.0;

/// `adjusted · (0.7 + 0.3·coherence)`
pub fn hebbian_potential(adjusted: f32, coherence: f32) -> f32 {
    clamp_unit(clamp_unit(adjusted) * (0.7 + 0.3 * clamp_unit(coherence)))
}

/// Boost the potential, then decay weak and reinforce strong weights.
pub fn competitive_strength(potential: f32, config: &ConsolidationConfig) -> f32 {
    let weight = clamp_unit(potential * config.hebbian_boost);
    let factor = if weight < config.weak_threshold {
        config.weak_decay
    } else if weight > config.strong_threshold {
        config.strong_boost
    } else {
        config.mild_decay
    };
    clamp_unit(weight * factor)
}

/// Richness of an extraction in [0, 1]
pub fn extraction_richness(association_count: usize) -> f32 {
    clamp_unit(association_count as f32 / RICHNESS_SATURATION)
}

/// `0.4·coherence + 0.3·competition share + 0.3·richness`
pub fn replay_quality(coherence: f32, share: f32, richness: f32) -> f32 {
    clamp_unit(0.4 * clamp_unit(coherence) + 0.3 * clamp_unit(share) + 0.3 * clamp_unit(richness))
}

/// Fate for a strength/replay pair; `None` means the memory is excluded.
pub fn classify_fate(strength: f32, replay: f32, config: &ConsolidationConfig) -> Option<Fate> {
    if strength < config.exclusion_floor {
        None
    } else if strength >= config.transfer_strength && replay >= config.transfer_replay {
        Some(Fate::CorticalTransfer)
    } else if strength >= config.retained_strength && replay >= config.retained_replay {
        Some(Fate::Retained)
    } else if strength >= config.forgetting_floor {
        Some(Fate::GradualForgetting)
    } else {
        Some(Fate::RapidForgetting)
    }
}

pub fn ltp_multiplier(fate: Fate, config: &ConsolidationConfig) -> f32 {
    match fate {
        Fate::CorticalTransfer => config.ltp_transfer,
        Fate::Retained => config.ltp_retained,
        Fate::GradualForgetting => config.ltp_gradual,
        Fate::RapidForgetting => config.ltp_rapid,
    }
}

/// Result of replaying one record
#[derive(Debug, Clone)]
pub struct Replay {
    /// `None` when the record was excluded
    pub outcome: Option<ConsolidationOutcome>,
    /// The record with its activation (and `forgotten` flag) written back
    pub record: MemoryRecord,
    pub entities: BTreeSet<String>,
    pub degraded: bool,
}

/// Replay one ready STM entry.
///
/// Reads only the STM row plus the record's content, tags and access time,
/// never its previous activation, so replaying the same input twice yields
/// the same output.
pub async fn replay(
    entry: &StmEntry,
    mut record: MemoryRecord,
    oracle: &GuardedOracle,
    config: &ConsolidationConfig,
) -> Replay {
    let associations = oracle
        .extract_or_fallback(&record.content, &entry.goal_label, Directive::Associations)
        .await;
    let mut degraded = associations.degraded;
    let extraction = associations.extraction;

    let potential = hebbian_potential(entry.adjusted_strength, entry.coherence_score);
    let strength = competitive_strength(potential, config);
    let replay_q = replay_quality(
        entry.coherence_score,
        entry.competition_share,
        extraction_richness(extraction.association_count()),
    );

    let entities: BTreeSet<String> = extraction.entities.iter().map(|e| e.to_lowercase()).collect();

    let Some(fate) = classify_fate(strength, replay_q, config) else {
        record.set_activation(0.0);
        record.forgotten = true;
        return Replay {
            outcome: None,
            record,
            entities,
            degraded,
        };
    };

    let consolidated = clamp_unit(strength * ltp_multiplier(fate, config));

    let (semantic_gist, semantic_category) = if consolidated >= config.transfer_strength {
        let gist = oracle
            .extract_or_fallback(&record.content, &entry.goal_label, Directive::Gist)
            .await;
        degraded |= gist.degraded;
        let summary = if gist.degraded {
            None
        } else {
            gist.extraction.summary.clone()
        };
        let summary = summary.unwrap_or_else(|| {
            oracle
                .rules()
                .gist(&record.content, &entry.goal_label, config.gist_max_words)
        });
        (Some(summary), Some(category(oracle, &extraction.goal, &entry.goal_label)))
    } else {
        (None, None)
    };

    record.set_activation(consolidated);
    record.forgotten = false;

    Replay {
        outcome: Some(ConsolidationOutcome {
            record_id: entry.record_id,
            episode_id: entry.episode_id,
            fate,
            consolidated_strength: consolidated,
            replay_quality: replay_q,
            semantic_gist,
            semantic_category,
            hebbian_delta: consolidated - clamp_unit(entry.adjusted_strength),
            degraded,
        }),
        record,
        entities,
        degraded,
    }
}

/// The extraction's goal decides the category unless it is unspecific.
fn category(oracle: &GuardedOracle, extracted_goal: &str, stm_goal: &str) -> String {
    let rules = oracle.rules();
    let from_extraction = rules.category_for(extracted_goal);
    if from_extraction != rules.category_for(GENERAL_GOAL) {
        from_extraction
    } else {
        rules.category_for(stm_goal)
    }
}

/// A surviving memory as seen by edge construction
#[derive(Debug, Clone)]
pub struct EdgeEndpoint<'a> {
    pub record: &'a MemoryRecord,
    pub episode_id: Uuid,
    pub coherence: f32,
    pub entities: &'a BTreeSet<String>,
}

/// Link surviving memories of the same episode or with shared tags/entities.
///
/// `strength = 0.5·coherence + 0.5·jaccard(tags)`, where coherence counts
/// only for same-episode pairs. Output is ordered by key.
pub fn build_edges(endpoints: &[EdgeEndpoint<'_>]) -> Vec<AssociationEdge> {
    let mut edges = Vec::new();
    for (i, a) in endpoints.iter().enumerate() {
        for b in &endpoints[i + 1..] {
            let Some(key) = EdgeKey::new(a.record.id, b.record.id) else {
                continue;
            };
            let same_episode = a.episode_id == b.episode_id;
            let shared_tags = a.record.tags.intersection(&b.record.tags).count();
            let shared_entities = a.entities.intersection(b.entities).count();
            if !same_episode && shared_tags == 0 && shared_entities == 0 {
                continue;
            }

            let coherence = if same_episode {
                clamp_unit(a.coherence.min(b.coherence))
            } else {
                0.0
            };
            edges.push(AssociationEdge {
                key,
                strength: clamp_unit(0.5 * coherence + 0.5 * jaccard(&a.record.tags, &b.record.tags)),
                co_activation_count: (shared_tags + shared_entities + usize::from(same_episode))
                    as u32,
                last_activated_at: a.record.last_accessed_at.max(b.record.last_accessed_at),
            });
        }
    }
    edges.sort_by_key(|e| e.key);
    edges
}
