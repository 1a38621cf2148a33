//! Dead letters for rows that could not be persisted
//!
//! A row whose write keeps failing after every retry is parked here and the
//! batch moves on. The set is keyed by stage, row kind and row id, so a later
//! failure for the same row replaces the earlier entry and a successful write
//! of one kind never clears a letter of another.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::Stage;

/// Which table a dead-lettered row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    /// A per-record row (record, stage entry, outcome or node); id is the record id
    Record,
    /// An episode; id is the cluster id
    Episode,
    /// An association edge; id is [`EdgeKey::row_id`](crate::memory::EdgeKey::row_id)
    Edge,
}

impl std::fmt::Display for RowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RowKind::Record => "record",
            RowKind::Episode => "episode",
            RowKind::Edge => "edge",
        })
    }
}

/// A row that a stage failed to persist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub row_id: Uuid,
    pub kind: RowKind,
    pub stage: Stage,
    /// Pass cutoff at the time of the failure
    pub cutoff: DateTime<Utc>,
    pub attempts: u32,
    pub reason: String,
}

/// Concurrent set of dead letters
#[derive(Debug, Default)]
pub struct DeadLetterSet {
    entries: DashMap<(Stage, RowKind, Uuid), DeadLetter>,
}

impl DeadLetterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn park(&self, letter: DeadLetter) {
        self.entries
            .insert((letter.stage, letter.kind, letter.row_id), letter);
    }

    /// Remove the entry once a later pass wrote the row successfully
    pub fn clear(&self, stage: Stage, kind: RowKind, row_id: Uuid) -> bool {
        self.entries.remove(&(stage, kind, row_id)).is_some()
    }

    pub fn contains(&self, stage: Stage, kind: RowKind, row_id: Uuid) -> bool {
        self.entries.contains_key(&(stage, kind, row_id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All letters ordered by stage, kind, then row id
    pub fn list(&self) -> Vec<DeadLetter> {
        let mut letters: Vec<DeadLetter> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        letters.sort_by_key(|l| (l.stage, l.kind, l.row_id));
        letters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter(stage: Stage, id: Uuid, reason: &str) -> DeadLetter {
        DeadLetter {
            row_id: id,
            kind: RowKind::Record,
            stage,
            cutoff: Utc::now(),
            attempts: 4,
            reason: reason.to_string(),
        }
    }

    #[test]
    fn test_park_replaces_same_key() {
        let set = DeadLetterSet::new();
        let id = Uuid::new_v4();
        set.park(letter(Stage::Stm, id, "first"));
        set.park(letter(Stage::Stm, id, "second"));
        set.park(letter(Stage::Ltm, id, "other stage"));

        assert_eq!(set.len(), 2);
        let stm = set.list().into_iter().find(|l| l.stage == Stage::Stm).unwrap();
        assert_eq!(stm.reason, "second");
    }

    #[test]
    fn test_clear() {
        let set = DeadLetterSet::new();
        let id = Uuid::new_v4();
        set.park(letter(Stage::Consolidation, id, "down"));
        assert!(set.contains(Stage::Consolidation, RowKind::Record, id));
        assert!(set.clear(Stage::Consolidation, RowKind::Record, id));
        assert!(!set.clear(Stage::Consolidation, RowKind::Record, id));
        assert!(set.is_empty());
    }

    #[test]
    fn test_kinds_do_not_share_keys() {
        let set = DeadLetterSet::new();
        let id = Uuid::new_v4();
        set.park(letter(Stage::Consolidation, id, "record down"));

        assert!(!set.clear(Stage::Consolidation, RowKind::Edge, id));
        assert!(set.contains(Stage::Consolidation, RowKind::Record, id));
    }
}
