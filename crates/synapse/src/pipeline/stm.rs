//! Short-term memory episode organizer
//!
//! Takes working memory graduates, admits the strongest under the STM
//! capacity, groups them into goal-aligned episodes split on time gaps,
//! and scores interference, competition and readiness for consolidation.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::{StmConfig, WorkingMemoryConfig};
use crate::memory::scoring::{
    clamp_unit, elapsed_minutes, estimate_salience, jaccard, mean, safe_ratio,
};
use crate::memory::{
    CoherenceTier, Episode, MemoryRecord, StmEntry, WorkingMemoryEntry, WorkingMemoryStatus,
};
use crate::oracle::{GENERAL_GOAL, RuleBook};
use crate::pipeline::working_memory::{frequency, rank_order, recency};

/// Namespace for deterministic episode ids
const EPISODE_NAMESPACE: Uuid = Uuid::from_u128(0x5e1f_3b7a_9c2d_4e60_8a41_c0de_e915_0de5);

/// Goal continuity credited to episodes with no goal evidence
const UNDIRECTED_GOAL_CONTINUITY: f32 = 0.5;

/// Shortest content word treated as a concept
const MIN_CONCEPT_LEN: usize = 4;

/// Whether a working memory row has earned promotion to STM.
///
/// Either it dwelt long enough with enough activation, or its activation is
/// high enough to bypass the dwell requirement.
pub fn graduates(entry: &WorkingMemoryEntry, activation: f32, config: &StmConfig) -> bool {
    if entry.status != WorkingMemoryStatus::Active {
        return false;
    }
    activation >= config.bypass_activation
        || (entry.dwell_secs >= config.min_dwell_secs && activation >= config.min_activation)
}

/// `0.5·activation + 0.3·recency + 0.2·frequency`, clamped
pub fn competition_score(activation: f32, recency: f32, frequency: f32) -> f32 {
    clamp_unit(0.5 * clamp_unit(activation) + 0.3 * recency + 0.2 * frequency)
}

pub fn coherence_tier(score: f32, config: &StmConfig) -> CoherenceTier {
    if score >= config.high_coherence {
        CoherenceTier::High
    } else if score >= config.medium_coherence {
        CoherenceTier::Medium
    } else {
        CoherenceTier::Low
    }
}

/// `max(epsilon, activation · (1 − (0.6·proactive + 0.4·retroactive) · weight))`
pub fn adjusted_strength(activation: f32, proactive: f32, retroactive: f32, config: &StmConfig) -> f32 {
    let interference = config.proactive_weight * proactive + config.retroactive_weight * retroactive;
    let adjusted = clamp_unit(activation) * (1.0 - interference * config.interference_weight);
    clamp_unit(adjusted).max(config.strength_epsilon)
}

/// Deterministic episode id from its goal and first member
pub fn episode_id(goal: &str, first_member: Uuid) -> Uuid {
    let name = format!("{goal}:{first_member}");
    Uuid::new_v5(&EPISODE_NAMESPACE, name.as_bytes())
}

fn concepts(content: &str) -> BTreeSet<String> {
    content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_CONCEPT_LEN)
        .map(str::to_lowercase)
        .collect()
}

/// A record admitted to STM this pass
#[derive(Debug, Clone)]
pub struct Admitted {
    pub record: MemoryRecord,
    pub goal: String,
    pub competition: f32,
    pub recency: f32,
}

/// Admitted records grouped into episodes, members in time order
#[derive(Debug, Default)]
pub struct EpisodeArena {
    members: Vec<Admitted>,
    /// Index ranges into `members`, one per episode
    spans: Vec<std::ops::Range<usize>>,
}

impl EpisodeArena {
    /// Partition by goal, order by creation, split where the gap between
    /// consecutive members exceeds `gap_minutes`.
    pub fn build(admitted: Vec<Admitted>, gap_minutes: i64) -> Self {
        let mut by_goal: BTreeMap<String, Vec<Admitted>> = BTreeMap::new();
        for a in admitted {
            by_goal.entry(a.goal.clone()).or_default().push(a);
        }

        let gap = Duration::minutes(gap_minutes);
        let mut arena = Self::default();
        for (_, mut group) in by_goal {
            group.sort_by(|a, b| {
                a.record
                    .created_at
                    .cmp(&b.record.created_at)
                    .then_with(|| a.record.id.cmp(&b.record.id))
            });
            let mut start = arena.members.len();
            let mut previous: Option<DateTime<Utc>> = None;
            for member in group {
                let created = member.record.created_at;
                let split = previous
                    .map(|prev| created - prev > gap)
                    .unwrap_or(false);
                if split {
                    arena.spans.push(start..arena.members.len());
                    start = arena.members.len();
                }
                previous = Some(created);
                arena.members.push(member);
            }
            if start < arena.members.len() {
                arena.spans.push(start..arena.members.len());
            }
        }
        arena
    }

    pub fn episode_count(&self) -> usize {
        self.spans.len()
    }

    /// Members of each episode, in time order
    pub fn episodes(&self) -> impl Iterator<Item = &[Admitted]> {
        self.spans.iter().map(|span| &self.members[span.clone()])
    }
}

/// Coherence of `member` relative to the member before it
fn member_coherence(prev: &Admitted, member: &Admitted, config: &StmConfig) -> f32 {
    let gap = elapsed_minutes(prev.record.created_at, member.record.created_at);
    let temporal = clamp_unit(1.0 - safe_ratio(gap, config.episode_gap_minutes as f32, 1.0));
    let overlap = jaccard(&concepts(&prev.record.content), &concepts(&member.record.content));
    let context = jaccard(&prev.record.tags, &member.record.tags);
    let goal = if member.goal == GENERAL_GOAL {
        UNDIRECTED_GOAL_CONTINUITY
    } else if member.goal == prev.goal {
        1.0
    } else {
        0.0
    };

    clamp_unit(
        config.temporal_weight * temporal
            + config.overlap_weight * overlap
            + config.context_weight * context
            + config.goal_weight * goal,
    )
}

/// Mean member coherence over non-first members; a singleton scores 0.0
pub fn episode_coherence(members: &[Admitted], config: &StmConfig) -> f32 {
    mean(
        members
            .windows(2)
            .map(|pair| member_coherence(&pair[0], &pair[1], config)),
    )
    .map(clamp_unit)
    .unwrap_or(0.0)
}

/// Output of one STM pass
#[derive(Debug, Default)]
pub struct StmPlan {
    pub episodes: Vec<Episode>,
    pub entries: Vec<StmEntry>,
    /// Graduates left for a later cycle because STM was full
    pub deferred: Vec<Uuid>,
}

/// Admit graduates up to the STM limit and organize them into episodes.
pub fn organize(
    promoted: Vec<MemoryRecord>,
    rules: &RuleBook,
    cutoff: DateTime<Utc>,
    stm: &StmConfig,
    wm: &WorkingMemoryConfig,
) -> StmPlan {
    let mut candidates: Vec<Admitted> = promoted
        .into_iter()
        .map(|record| {
            let rec = recency(&record, cutoff, wm);
            let competition = competition_score(record.activation_strength, rec, frequency(&record, wm));
            let goal = rules.classify_goal(&record.content, &record.tags);
            Admitted {
                record,
                goal,
                competition,
                recency: rec,
            }
        })
        .collect();
    candidates.sort_by(|a, b| rank_order((a.competition, &a.record), (b.competition, &b.record)));

    let limit = stm.admission_limit();
    let mut deferred: Vec<Uuid> = candidates
        .iter()
        .skip(limit)
        .map(|a| a.record.id)
        .collect();
    deferred.sort();
    candidates.truncate(limit);

    let arena = EpisodeArena::build(candidates, stm.episode_gap_minutes);
    let mut plan = StmPlan {
        deferred,
        ..StmPlan::default()
    };

    for members in arena.episodes() {
        let Some(first) = members.first() else {
            continue;
        };
        let last = &members[members.len() - 1];
        let coherence = episode_coherence(members, stm);
        let tier = coherence_tier(coherence, stm);
        let cluster_id = episode_id(&first.goal, first.record.id);
        let total_competition: f32 = members.iter().map(|m| m.competition).sum();

        plan.episodes.push(Episode {
            cluster_id,
            goal_label: first.goal.clone(),
            coherence_score: coherence,
            coherence_tier: tier,
            member_ids: members.iter().map(|m| m.record.id).collect(),
            started_at: first.record.created_at,
            ended_at: last.record.created_at,
        });

        for (i, member) in members.iter().enumerate() {
            let activation = clamp_unit(member.record.activation_strength);
            let proactive = mean(members[..i].iter().map(|m| clamp_unit(m.record.activation_strength)))
                .unwrap_or(0.0);
            let retroactive = mean(
                members[i + 1..]
                    .iter()
                    .map(|m| clamp_unit(m.record.activation_strength)),
            )
            .unwrap_or(0.0);
            let adjusted = adjusted_strength(activation, proactive, retroactive, stm);

            let share = if members.len() == 1 {
                1.0
            } else {
                clamp_unit(safe_ratio(member.competition, total_competition, 1.0))
            };

            let co_activation = members
                .iter()
                .filter(|peer| peer.record.id != member.record.id)
                .filter(|peer| !peer.record.tags.is_disjoint(&member.record.tags))
                .count() as u32;

            let salience = clamp_unit(
                0.5 * estimate_salience(&member.record.content, &member.record.tags)
                    + 0.5 * activation,
            );

            let ready = (tier == CoherenceTier::High
                && co_activation >= stm.min_co_activation
                && salience >= stm.salience_threshold)
                || (adjusted >= stm.strong_strength
                    && member.recency >= stm.strong_recency
                    && share >= stm.min_competition_share);

            plan.entries.push(StmEntry {
                record_id: member.record.id,
                episode_id: cluster_id,
                sequence_position: i + 1,
                goal_label: member.goal.clone(),
                coherence_score: coherence,
                coherence_tier: tier,
                competition_score: member.competition,
                competition_share: share,
                proactive_interference: proactive,
                retroactive_interference: retroactive,
                adjusted_strength: adjusted,
                co_activation_count: co_activation,
                salience,
                recency: member.recency,
                ready,
            });
        }
    }

    plan.episodes.sort_by_key(|e| e.cluster_id);
    plan.entries.sort_by_key(|e| e.record_id);
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cutoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn record(content: &str, tags: &[&str], created_minutes_ago: i64, activation: f32) -> MemoryRecord {
        let created = cutoff() - Duration::minutes(created_minutes_ago);
        let mut r = MemoryRecord::new(content, created).with_tags(tags.iter().copied());
        r.last_accessed_at = cutoff() - Duration::minutes(1);
        r.access_count = 3;
        r.activation_strength = activation;
        r
    }

    fn wm_entry(dwell_secs: i64) -> WorkingMemoryEntry {
        WorkingMemoryEntry {
            record_id: Uuid::new_v4(),
            status: WorkingMemoryStatus::Active,
            slot: None,
            priority_score: 0.5,
            recency: 0.5,
            frequency: 0.5,
            first_entered_at: None,
            dwell_secs,
        }
    }

    fn organize_default(records: Vec<MemoryRecord>) -> StmPlan {
        organize(
            records,
            &RuleBook::new(),
            cutoff(),
            &StmConfig::default(),
            &WorkingMemoryConfig::default(),
        )
    }

    #[test]
    fn test_graduation_rules() {
        let config = StmConfig::default();
        assert!(graduates(&wm_entry(60), 0.3, &config));
        assert!(!graduates(&wm_entry(59), 0.5, &config));
        assert!(!graduates(&wm_entry(600), 0.2, &config));
        assert!(graduates(&wm_entry(0), 0.8, &config));

        let mut evicted = wm_entry(600);
        evicted.status = WorkingMemoryStatus::Evicted;
        assert!(!graduates(&evicted, 0.9, &config));
    }

    #[test]
    fn test_adjusted_strength_floor() {
        let config = StmConfig::default();
        assert_eq!(adjusted_strength(0.0, 1.0, 1.0, &config), config.strength_epsilon);
        // 0.8 · (1 − (0.6·0.5 + 0.4·0.0)·0.5) = 0.68
        assert!((adjusted_strength(0.8, 0.5, 0.0, &config) - 0.68).abs() < 1e-5);
    }

    #[test]
    fn test_episode_id_is_stable() {
        let id = Uuid::new_v4();
        assert_eq!(episode_id("planning", id), episode_id("planning", id));
        assert_ne!(episode_id("planning", id), episode_id("learning", id));
    }

    #[test]
    fn test_same_goal_within_gap_shares_episode() {
        let plan = organize_default(vec![
            record("Plan the roadmap", &["goal:launch"], 50, 0.6),
            record("Schedule launch meeting", &["goal:launch"], 30, 0.6),
            record("Finalize launch deadline", &["goal:launch"], 10, 0.6),
        ]);
        assert_eq!(plan.episodes.len(), 1);
        assert_eq!(plan.episodes[0].member_ids.len(), 3);
        assert_eq!(plan.episodes[0].goal_label, "launch");
        let positions: Vec<usize> = {
            let mut p: Vec<usize> = plan.entries.iter().map(|e| e.sequence_position).collect();
            p.sort();
            p
        };
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[test]
    fn test_gap_above_threshold_splits() {
        let plan = organize_default(vec![
            record("Plan the roadmap", &["goal:launch"], 120, 0.6),
            record("Schedule launch meeting", &["goal:launch"], 10, 0.6),
        ]);
        assert_eq!(plan.episodes.len(), 2);
        assert!(plan.episodes.iter().all(|e| e.coherence_tier == CoherenceTier::Low));
    }

    fn pair_with_gap(gap: Duration) -> Vec<MemoryRecord> {
        let first = record("Plan the roadmap", &["goal:launch"], 60, 0.6);
        let mut second = record("Schedule launch meeting", &["goal:launch"], 0, 0.6);
        second.created_at = first.created_at + gap;
        vec![first, second]
    }

    #[test]
    fn test_gap_exactly_at_threshold_stays_together() {
        let plan = organize_default(pair_with_gap(Duration::minutes(30)));
        assert_eq!(plan.episodes.len(), 1);
    }

    #[test]
    fn test_gap_seconds_above_threshold_splits() {
        let plan = organize_default(pair_with_gap(Duration::minutes(30) + Duration::seconds(59)));
        assert_eq!(plan.episodes.len(), 2);

        let plan = organize_default(pair_with_gap(Duration::minutes(30) + Duration::seconds(1)));
        assert_eq!(plan.episodes.len(), 2);
    }

    #[test]
    fn test_different_goals_never_share() {
        let plan = organize_default(vec![
            record("note", &["goal:launch"], 20, 0.6),
            record("note", &["goal:hiring"], 19, 0.6),
        ]);
        assert_eq!(plan.episodes.len(), 2);
    }

    #[test]
    fn test_singleton_episode() {
        let plan = organize_default(vec![record("Lone thought", &[], 5, 0.9)]);
        let entry = &plan.entries[0];
        assert_eq!(plan.episodes[0].coherence_score, 0.0);
        assert_eq!(entry.coherence_tier, CoherenceTier::Low);
        assert_eq!(entry.competition_share, 1.0);
        assert_eq!(entry.proactive_interference, 0.0);
        assert_eq!(entry.retroactive_interference, 0.0);
        assert_eq!(entry.co_activation_count, 0);
    }

    #[test]
    fn test_zero_activation_episode_has_no_division_error() {
        let mut a = record("a", &["x"], 10, 0.0);
        let mut b = record("b", &["x"], 9, 0.0);
        a.access_count = 0;
        b.access_count = 0;
        a.last_accessed_at = cutoff() - Duration::days(30);
        b.last_accessed_at = cutoff() - Duration::days(30);
        let plan = organize_default(vec![a, b]);
        for entry in &plan.entries {
            assert!(entry.competition_share.is_finite());
            assert!(entry.adjusted_strength >= StmConfig::default().strength_epsilon);
        }
    }

    #[test]
    fn test_interference_uses_neighbors() {
        let plan = organize_default(vec![
            record("first", &["goal:g"], 20, 0.4),
            record("second", &["goal:g"], 15, 0.6),
            record("third", &["goal:g"], 10, 0.8),
        ]);
        let episode = &plan.episodes[0];
        let middle_id = episode.member_ids[1];
        let middle = plan.entries.iter().find(|e| e.record_id == middle_id).unwrap();
        assert!((middle.proactive_interference - 0.4).abs() < 1e-6);
        assert!((middle.retroactive_interference - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_admission_limit_defers_weakest() {
        let records: Vec<MemoryRecord> = (0..12)
            .map(|i| record(&format!("note {i}"), &[], i, 0.05 * i as f32))
            .collect();
        let weakest: Vec<Uuid> = records[..3].iter().map(|r| r.id).collect();
        let plan = organize_default(records);

        assert_eq!(plan.entries.len(), 9);
        assert_eq!(plan.deferred.len(), 3);
        for id in weakest {
            assert!(plan.deferred.contains(&id));
        }
    }

    #[test]
    fn test_high_coherence_episode_becomes_ready() {
        let tags = &["goal:launch", "launch", "important"];
        let plan = organize_default(vec![
            record("Important launch decision for the beta release", tags, 6, 0.7),
            record("Important launch decision for the beta release", tags, 5, 0.7),
            record("Important launch decision for the beta release", tags, 4, 0.7),
        ]);
        let episode = &plan.episodes[0];
        assert_eq!(episode.coherence_tier, CoherenceTier::High);
        assert!(plan.entries.iter().all(|e| e.co_activation_count == 2));
        assert!(plan.entries.iter().all(|e| e.ready));
    }

    #[test]
    fn test_scores_are_bounded() {
        let plan = organize_default(vec![
            record("urgent critical important", &["urgent", "critical"], 3, 1.0),
            record("urgent critical important", &["urgent", "critical"], 2, 1.0),
        ]);
        for e in &plan.entries {
            for v in [
                e.coherence_score,
                e.competition_score,
                e.competition_share,
                e.adjusted_strength,
                e.salience,
                e.recency,
            ] {
                assert!((0.0..=1.0).contains(&v));
            }
        }
    }
}
