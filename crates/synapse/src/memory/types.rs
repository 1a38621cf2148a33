//! Memory types for the Synapse pipeline
//!
//! Defines the captured record plus the rows each stage emits for it:
//! working memory entries, episodes, STM entries, consolidation outcomes,
//! association edges and semantic nodes.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::memory::scoring::clamp_unit;

/// Activation assumed for records that arrive without one
pub const DEFAULT_ACTIVATION: f32 = 0.5;

/// Namespace for edge row ids
const EDGE_NAMESPACE: Uuid = Uuid::from_u128(0x6b1d_93e2_4f0a_5c77_a8e1_2d4c_90f3_b615);

/// A unit of captured content.
///
/// Records are mutated in place by the stages (activation is recalculated)
/// but never hard-deleted; consolidation marks them `forgotten` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "MemoryRecordWire")]
pub struct MemoryRecord {
    /// Stable identity
    pub id: Uuid,
    /// Captured text
    pub content: String,
    /// Tags, kept sorted so serialized rows are stable
    pub tags: BTreeSet<String>,
    /// When this record was captured
    pub created_at: DateTime<Utc>,
    /// When this record was last touched
    pub last_accessed_at: DateTime<Utc>,
    /// How many times this record has been touched
    pub access_count: u32,
    /// How "alive" the memory currently is (0.0-1.0)
    pub activation_strength: f32,
    /// Set once consolidation drops the record below the activation floor
    pub forgotten: bool,
}

/// Lenient on-disk shape of a record; every optional field has a default.
#[derive(Deserialize)]
struct MemoryRecordWire {
    id: Uuid,
    #[serde(default)]
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    last_accessed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    access_count: u32,
    #[serde(default)]
    activation_strength: Option<f32>,
    #[serde(default)]
    forgotten: bool,
}

impl From<MemoryRecordWire> for MemoryRecord {
    fn from(wire: MemoryRecordWire) -> Self {
        let mut record = Self {
            id: wire.id,
            content: wire.content,
            tags: wire.tags.into_iter().collect(),
            created_at: wire.created_at,
            last_accessed_at: wire.last_accessed_at.unwrap_or(wire.created_at),
            access_count: wire.access_count,
            activation_strength: wire.activation_strength.unwrap_or(DEFAULT_ACTIVATION),
            forgotten: wire.forgotten,
        };
        record.sanitize();
        record
    }
}

impl MemoryRecord {
    /// Create a new record captured at `created_at`
    pub fn new(content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            tags: BTreeSet::new(),
            created_at,
            last_accessed_at: created_at,
            access_count: 0,
            activation_strength: DEFAULT_ACTIVATION,
            forgotten: false,
        }
    }

    /// Builder-style tag assignment
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Mark this record as accessed at `at`
    pub fn mark_accessed(&mut self, at: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        if at > self.last_accessed_at {
            self.last_accessed_at = at;
        }
    }

    /// Update the activation, clamped to [0, 1]
    pub fn set_activation(&mut self, activation: f32) {
        self.activation_strength = clamp_unit(activation);
    }

    /// Repair invalid fields in place.
    ///
    /// Returns a description of every field that had to be defaulted; an
    /// empty list means the record was already well formed.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut repairs = Vec::new();

        if !self.activation_strength.is_finite()
            || !(0.0..=1.0).contains(&self.activation_strength)
        {
            repairs.push(format!(
                "activation_strength {} out of range",
                self.activation_strength
            ));
            self.activation_strength = clamp_unit(self.activation_strength);
        }

        if self.last_accessed_at < self.created_at {
            repairs.push("last_accessed_at precedes created_at".to_string());
            self.last_accessed_at = self.created_at;
        }

        let before = self.tags.len();
        self.tags = std::mem::take(&mut self.tags)
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if self.tags.len() != before {
            repairs.push("blank or duplicate tags dropped".to_string());
        }

        repairs
    }
}

/// Whether a record currently holds a working memory slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkingMemoryStatus {
    /// Ranked within capacity
    Active,
    /// Contended this cycle but fell below the last slot
    Evicted,
}

/// Ranking of a record within the current attention window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingMemorySlot {
    /// 1-based position in the window
    pub rank: usize,
    /// Blended activation/recency/frequency score
    pub priority_score: f32,
    /// When the record entered the window in this cycle
    pub entered_at: DateTime<Utc>,
}

/// Working memory row emitted per contending record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingMemoryEntry {
    pub record_id: Uuid,
    pub status: WorkingMemoryStatus,
    /// Present only while `status` is active
    pub slot: Option<WorkingMemorySlot>,
    pub priority_score: f32,
    pub recency: f32,
    pub frequency: f32,
    /// First cycle of the current uninterrupted stay in the window
    pub first_entered_at: Option<DateTime<Utc>>,
    /// Seconds spent in the window as of the pass cutoff
    pub dwell_secs: i64,
}

/// Ordered coherence classification of an episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoherenceTier {
    Low,
    Medium,
    High,
}

/// A cluster of temporally related records sharing a goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub cluster_id: Uuid,
    pub goal_label: String,
    pub coherence_score: f32,
    pub coherence_tier: CoherenceTier,
    /// Members in time order
    pub member_ids: Vec<Uuid>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Per-record output of the STM organizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StmEntry {
    pub record_id: Uuid,
    pub episode_id: Uuid,
    /// 1-based position within the episode
    pub sequence_position: usize,
    pub goal_label: String,
    pub coherence_score: f32,
    pub coherence_tier: CoherenceTier,
    pub competition_score: f32,
    /// Share of the episode's summed competition scores
    pub competition_share: f32,
    pub proactive_interference: f32,
    pub retroactive_interference: f32,
    /// Working strength after interference, never below epsilon
    pub adjusted_strength: f32,
    pub co_activation_count: u32,
    pub salience: f32,
    pub recency: f32,
    /// Eligible for consolidation
    pub ready: bool,
}

/// Terminal state of a record after one consolidation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fate {
    CorticalTransfer,
    Retained,
    GradualForgetting,
    RapidForgetting,
}

/// Per-record result of replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationOutcome {
    pub record_id: Uuid,
    pub episode_id: Uuid,
    pub fate: Fate,
    pub consolidated_strength: f32,
    pub replay_quality: f32,
    /// Abstracted summary, only for transfer-eligible strength
    pub semantic_gist: Option<String>,
    pub semantic_category: Option<String>,
    /// Change produced by Hebbian strengthening (may be negative)
    pub hebbian_delta: f32,
    /// Whether the rule fallback replaced the oracle
    pub degraded: bool,
}

/// Undirected key for an association edge; `low < high` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub low: Uuid,
    pub high: Uuid,
}

impl EdgeKey {
    /// Build a key from two ids in any order, or `None` for a self-loop
    pub fn new(a: Uuid, b: Uuid) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { low: a, high: b }),
            std::cmp::Ordering::Greater => Some(Self { low: b, high: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Stable id for this pair, distinct from either endpoint's id
    pub fn row_id(&self) -> Uuid {
        let mut bytes = [0u8; 32];
        bytes[..16].copy_from_slice(self.low.as_bytes());
        bytes[16..].copy_from_slice(self.high.as_bytes());
        Uuid::new_v5(&EDGE_NAMESPACE, &bytes)
    }

    /// The endpoint opposite `id`, if `id` is an endpoint
    pub fn other(&self, id: Uuid) -> Option<Uuid> {
        if self.low == id {
            Some(self.high)
        } else if self.high == id {
            Some(self.low)
        } else {
            None
        }
    }
}

/// Weighted link between two memories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationEdge {
    pub key: EdgeKey,
    pub strength: f32,
    pub co_activation_count: u32,
    pub last_activated_at: DateTime<Utc>,
}

/// Maturity of a long-term memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationState {
    Episodic,
    Consolidating,
    Schematized,
}

/// Elapsed time since creation, bucketed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeBucket {
    Recent,
    WeekOld,
    MonthOld,
    Remote,
}

/// Bounded graph-importance sub-scores and their composite
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CentralityScores {
    pub degree: f32,
    pub betweenness: f32,
    pub closeness: f32,
    pub eigenvector: f32,
    pub composite: f32,
}

/// Long-term representation of a consolidated memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticNode {
    pub record_id: Uuid,
    /// 1-based address in the categorical space
    pub address: u32,
    /// 1-based region containing `address`
    pub region_id: u32,
    pub semantic_category: String,
    pub centrality: CentralityScores,
    pub synaptic_efficacy: f32,
    pub consolidation_state: ConsolidationState,
    pub retrieval_strength: f32,
    pub age_bucket: AgeBucket,
    /// Position in the materialized network; `None` below the retrieval floor
    pub network_rank: Option<usize>,
}
