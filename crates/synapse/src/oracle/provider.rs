//! Enrichment oracle trait
//!
//! Abstracts the external text-analysis capability (remote LLM, rule book)
//! behind one narrow call.

use async_trait::async_trait;

use crate::oracle::types::{Directive, OracleError, StructuredExtraction};

/// Trait for enrichment oracles
///
/// Implementations are stateless from the caller's point of view and may fail
/// or hang; callers wrap them in [`GuardedOracle`](crate::oracle::GuardedOracle)
/// for timeouts, retries and the rule fallback.
#[async_trait]
pub trait EnrichmentOracle: Send + Sync {
    /// Extract structured information from `text` according to `directive`
    async fn extract(
        &self,
        text: &str,
        directive: Directive,
    ) -> Result<StructuredExtraction, OracleError>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}
