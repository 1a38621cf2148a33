//! Working memory window
//!
//! Ranks the records touched within the trailing window by a blend of
//! activation, recency and access frequency, keeps the top slots and evicts
//! the rest. Nothing is deleted; rows flip between active and evicted.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::config::WorkingMemoryConfig;
use crate::error::SynapseError;
use crate::memory::scoring::{clamp_unit, elapsed_minutes, log_frequency, recency_decay, safe_ratio};
use crate::memory::{MemoryRecord, WorkingMemoryEntry, WorkingMemorySlot, WorkingMemoryStatus};

/// Result of ranking one window
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingMemoryView {
    /// One row per contending record, best first
    pub entries: Vec<WorkingMemoryEntry>,
    /// Previously active rows whose record left the window
    pub expired: Vec<WorkingMemoryEntry>,
    pub contending: usize,
    pub overloaded: bool,
}

impl WorkingMemoryView {
    pub fn active(&self) -> impl Iterator<Item = &WorkingMemoryEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == WorkingMemoryStatus::Active)
    }
}

pub fn recency(record: &MemoryRecord, cutoff: DateTime<Utc>, config: &WorkingMemoryConfig) -> f32 {
    recency_decay(
        elapsed_minutes(record.last_accessed_at, cutoff),
        config.recency_tau_minutes,
    )
}

pub fn frequency(record: &MemoryRecord, config: &WorkingMemoryConfig) -> f32 {
    log_frequency(record.access_count, config.frequency_saturation)
}

/// `w1·activation + w2·recency + w3·frequency`, clamped to [0, 1]
pub fn priority(activation: f32, recency: f32, frequency: f32, config: &WorkingMemoryConfig) -> f32 {
    clamp_unit(
        config.activation_weight * clamp_unit(activation)
            + config.recency_weight * recency
            + config.frequency_weight * frequency,
    )
}

/// Higher score first, then earliest creation, then id.
pub fn rank_order(
    a: (f32, &MemoryRecord),
    b: (f32, &MemoryRecord),
) -> Ordering {
    b.0.total_cmp(&a.0)
        .then_with(|| a.1.created_at.cmp(&b.1.created_at))
        .then_with(|| a.1.id.cmp(&b.1.id))
}

/// Whether `contending` records overload a window with `ceiling` slots
pub fn is_overloaded(contending: usize, config: &WorkingMemoryConfig) -> bool {
    safe_ratio(contending as f32, config.capacity_ceiling as f32, 0.0) > config.overload_utilization
}

/// Rank the window ending at `cutoff`.
///
/// `records` are the candidates touched within the window; `previous` holds
/// this stage's rows from earlier passes, keyed by record id, so an
/// uninterrupted stay keeps its original entry time.
pub fn rank_window(
    records: &[MemoryRecord],
    previous: &HashMap<Uuid, WorkingMemoryEntry>,
    cutoff: DateTime<Utc>,
    config: &WorkingMemoryConfig,
) -> WorkingMemoryView {
    let capacity = config.effective_capacity();

    let mut scored: Vec<(f32, f32, f32, &MemoryRecord)> = records
        .iter()
        .map(|r| {
            let rec = recency(r, cutoff, config);
            let freq = frequency(r, config);
            (priority(r.activation_strength, rec, freq, config), rec, freq, r)
        })
        .collect();
    scored.sort_by(|a, b| rank_order((a.0, a.3), (b.0, b.3)));

    let contending = scored.len();
    if contending > capacity {
        debug!(
            "{}",
            SynapseError::CapacityExceeded {
                contending,
                capacity
            }
        );
    }

    let entries: Vec<WorkingMemoryEntry> = scored
        .into_iter()
        .enumerate()
        .map(|(i, (score, rec, freq, record))| {
            if i < capacity {
                let entered_at = previous
                    .get(&record.id)
                    .filter(|p| p.status == WorkingMemoryStatus::Active)
                    .and_then(|p| p.first_entered_at)
                    .unwrap_or(record.last_accessed_at)
                    .min(cutoff);
                WorkingMemoryEntry {
                    record_id: record.id,
                    status: WorkingMemoryStatus::Active,
                    slot: Some(WorkingMemorySlot {
                        rank: i + 1,
                        priority_score: score,
                        entered_at,
                    }),
                    priority_score: score,
                    recency: rec,
                    frequency: freq,
                    first_entered_at: Some(entered_at),
                    dwell_secs: (cutoff - entered_at).num_seconds().max(0),
                }
            } else {
                evicted(record.id, score, rec, freq)
            }
        })
        .collect();

    let mut expired: Vec<WorkingMemoryEntry> = previous
        .values()
        .filter(|p| p.status == WorkingMemoryStatus::Active)
        .filter(|p| !records.iter().any(|r| r.id == p.record_id))
        .map(|p| evicted(p.record_id, p.priority_score, p.recency, p.frequency))
        .collect();
    expired.sort_by_key(|e| e.record_id);

    WorkingMemoryView {
        entries,
        expired,
        contending,
        overloaded: is_overloaded(contending, config),
    }
}

fn evicted(record_id: Uuid, priority_score: f32, recency: f32, frequency: f32) -> WorkingMemoryEntry {
    WorkingMemoryEntry {
        record_id,
        status: WorkingMemoryStatus::Evicted,
        slot: None,
        priority_score,
        recency,
        frequency,
        first_entered_at: None,
        dwell_secs: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn cutoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn record(minutes_ago: i64, activation: f32, accesses: u32) -> MemoryRecord {
        let touched = cutoff() - Duration::minutes(minutes_ago);
        let mut r = MemoryRecord::new("note", touched - Duration::hours(1));
        r.last_accessed_at = touched;
        r.access_count = accesses;
        r.activation_strength = activation;
        r
    }

    #[test]
    fn test_empty_window() {
        let view = rank_window(&[], &HashMap::new(), cutoff(), &WorkingMemoryConfig::default());
        assert!(view.entries.is_empty());
        assert!(!view.overloaded);
    }

    #[test]
    fn test_priority_is_bounded() {
        let config = WorkingMemoryConfig::default();
        assert_eq!(priority(1.0, 1.0, 1.0, &config), 1.0);
        assert_eq!(priority(0.0, 0.0, 0.0, &config), 0.0);
        assert!((priority(1.0, 0.0, 0.0, &config) - 0.5).abs() < 1e-6);
        assert_eq!(priority(f32::NAN, 0.0, 0.0, &config), 0.0);
    }

    #[test]
    fn test_never_exceeds_ceiling() {
        let config = WorkingMemoryConfig {
            capacity: 50,
            ..WorkingMemoryConfig::default()
        };
        let records: Vec<MemoryRecord> = (0..20).map(|i| record(i, 0.5, 1)).collect();
        let view = rank_window(&records, &HashMap::new(), cutoff(), &config);

        assert_eq!(view.active().count(), config.capacity_ceiling);
        assert_eq!(view.entries.len(), 20);
        assert!(view.overloaded);
    }

    #[test]
    fn test_ceiling_boundary() {
        let config = WorkingMemoryConfig {
            capacity: 50,
            ..WorkingMemoryConfig::default()
        };
        let evicted = |view: &WorkingMemoryView| {
            view.entries
                .iter()
                .filter(|e| e.status == WorkingMemoryStatus::Evicted)
                .count()
        };

        let nine: Vec<MemoryRecord> = (0..9).map(|i| record(i, 0.5, 1)).collect();
        let view = rank_window(&nine, &HashMap::new(), cutoff(), &config);
        assert_eq!(view.active().count(), 9);
        assert_eq!(evicted(&view), 0);

        let ten: Vec<MemoryRecord> = (0..10).map(|i| record(i, 0.5, 1)).collect();
        let view = rank_window(&ten, &HashMap::new(), cutoff(), &config);
        assert_eq!(view.active().count(), 9);
        assert_eq!(evicted(&view), 1);
        assert_eq!(view.contending, 10);
    }

    #[test]
    fn test_ranking_and_eviction() {
        let config = WorkingMemoryConfig {
            capacity: 2,
            ..WorkingMemoryConfig::default()
        };
        let strong = record(1, 0.9, 10);
        let medium = record(5, 0.5, 2);
        let weak = record(25, 0.1, 0);
        let records = vec![weak.clone(), strong.clone(), medium.clone()];

        let view = rank_window(&records, &HashMap::new(), cutoff(), &config);
        let order: Vec<Uuid> = view.entries.iter().map(|e| e.record_id).collect();
        assert_eq!(order, vec![strong.id, medium.id, weak.id]);
        assert_eq!(view.entries[0].slot.as_ref().unwrap().rank, 1);
        assert_eq!(view.entries[2].status, WorkingMemoryStatus::Evicted);
        assert!(view.entries[2].slot.is_none());
    }

    #[test]
    fn test_ties_break_by_creation_then_id() {
        let config = WorkingMemoryConfig::default();
        let mut a = record(3, 0.5, 1);
        let mut b = a.clone();
        b.id = Uuid::new_v4();
        a.created_at = cutoff() - Duration::hours(3);
        b.created_at = cutoff() - Duration::hours(2);

        let view = rank_window(&[b.clone(), a.clone()], &HashMap::new(), cutoff(), &config);
        assert_eq!(view.entries[0].record_id, a.id);

        b.created_at = a.created_at;
        let view = rank_window(&[b.clone(), a.clone()], &HashMap::new(), cutoff(), &config);
        assert_eq!(view.entries[0].record_id, a.id.min(b.id));
    }

    #[test]
    fn test_dwell_accumulates_across_passes() {
        let config = WorkingMemoryConfig::default();
        let r = record(2, 0.6, 1);
        let first = rank_window(std::slice::from_ref(&r), &HashMap::new(), cutoff(), &config);
        assert_eq!(first.entries[0].dwell_secs, 120);

        let previous: HashMap<Uuid, WorkingMemoryEntry> = first
            .entries
            .iter()
            .map(|e| (e.record_id, e.clone()))
            .collect();
        let later = cutoff() + Duration::minutes(3);
        let second = rank_window(std::slice::from_ref(&r), &previous, later, &config);
        assert_eq!(second.entries[0].dwell_secs, 300);
        assert_eq!(
            second.entries[0].first_entered_at,
            first.entries[0].first_entered_at
        );
    }

    #[test]
    fn test_record_leaving_window_expires() {
        let config = WorkingMemoryConfig::default();
        let r = record(2, 0.6, 1);
        let first = rank_window(std::slice::from_ref(&r), &HashMap::new(), cutoff(), &config);
        let previous: HashMap<Uuid, WorkingMemoryEntry> = first
            .entries
            .iter()
            .map(|e| (e.record_id, e.clone()))
            .collect();

        let view = rank_window(&[], &previous, cutoff(), &config);
        assert_eq!(view.expired.len(), 1);
        assert_eq!(view.expired[0].status, WorkingMemoryStatus::Evicted);
        assert_eq!(view.expired[0].first_entered_at, None);
    }

    #[test]
    fn test_overload_threshold() {
        let config = WorkingMemoryConfig::default();
        // 8 / 9 = 0.89 > 0.85, 7 / 9 = 0.78
        assert!(is_overloaded(8, &config));
        assert!(!is_overloaded(7, &config));
    }
}
