//! The four-stage memory pipeline
//!
//! Working memory → STM episodes → consolidation → LTM semantic network.
//! Each stage is a batch pass over the previous stage's rows plus its own
//! earlier output, driven by a [`PassContext`] and reported as a
//! [`PassSummary`].

pub mod consolidation;
pub mod engine;
pub mod ltm;
pub mod stm;
pub mod working_memory;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;

pub use engine::Engine;

/// Pipeline stage identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    WorkingMemory,
    Stm,
    Consolidation,
    Ltm,
}

impl Stage {
    /// All stages in execution order
    pub const ALL: [Stage; 4] = [
        Stage::WorkingMemory,
        Stage::Stm,
        Stage::Consolidation,
        Stage::Ltm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::WorkingMemory => "working_memory",
            Stage::Stm => "stm",
            Stage::Consolidation => "consolidation",
            Stage::Ltm => "ltm",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation shared between a pass and its caller
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a pass needs besides the store
///
/// All time arithmetic inside a pass uses `cutoff`; the wall clock is never
/// consulted, which is what makes reruns reproducible.
#[derive(Debug, Clone)]
pub struct PassContext {
    pub cutoff: DateTime<Utc>,
    pub config: Arc<Config>,
    /// Identifies this invocation in logs only; never persisted
    pub run_id: Uuid,
    pub cancel: CancelFlag,
}

impl PassContext {
    pub fn new(cutoff: DateTime<Utc>, config: Arc<Config>) -> Self {
        Self {
            cutoff,
            config,
            run_id: Uuid::new_v4(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Counters reported by every pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassSummary {
    pub stage: Stage,
    /// Rows read as input
    pub records_in: usize,
    /// Rows written
    pub records_out: usize,
    /// Per-record failures (each also dead-lettered or skipped)
    pub errors: usize,
    /// Input fields defaulted at the boundary
    pub repaired: usize,
    /// Inputs intentionally not processed (ineligible, excluded, missing)
    pub skipped: usize,
    pub dead_lettered: usize,
    /// Oracle fallbacks
    pub degraded: usize,
    /// Working memory contention above the configured utilization
    pub overloaded: bool,
    pub cancelled: bool,
}

impl PassSummary {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            records_in: 0,
            records_out: 0,
            errors: 0,
            repaired: 0,
            skipped: 0,
            dead_lettered: 0,
            degraded: 0,
            overloaded: false,
            cancelled: false,
        }
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: in={} out={} errors={} repaired={} skipped={} dead_lettered={} degraded={}",
            self.stage,
            self.records_in,
            self.records_out,
            self.errors,
            self.repaired,
            self.skipped,
            self.dead_lettered,
            self.degraded
        )?;
        if self.overloaded {
            f.write_str(" overloaded")?;
        }
        if self.cancelled {
            f.write_str(" cancelled")?;
        }
        Ok(())
    }
}
