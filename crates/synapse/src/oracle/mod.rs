//! Enrichment oracle adapter
//!
//! The only place the pipeline touches an external text-analysis service.
//! Everything here degrades to the deterministic rule book.

pub mod guarded;
pub mod prompts;
pub mod provider;
pub mod remote;
pub mod rules;
pub mod types;

pub use guarded::{Enrichment, GuardedOracle};
pub use provider::EnrichmentOracle;
pub use remote::RemoteOracle;
pub use rules::{GENERAL_GOAL, GOAL_TAG_PREFIX, RuleBook, RuleBookOracle};
pub use types::{ActionTag, Directive, OracleError, StructuredExtraction};
