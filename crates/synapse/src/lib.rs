//! Synapse - Four-stage memory consolidation pipeline
//!
//! Records move from a capacity-bounded working memory, through goal-scoped
//! short-term episodes and a consolidation replay, into a long-term semantic
//! network. Each stage runs as a deterministic pass over a record store.

pub mod config;
pub mod error;
pub mod memory;
pub mod oracle;
pub mod pipeline;
pub mod storage;
pub mod testing;

pub use error::{Result, SynapseError};
