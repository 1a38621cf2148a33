//! Guarded oracle access
//!
//! Wraps an optional [`EnrichmentOracle`] with a per-call timeout, bounded
//! retries, an LRU cache of successful answers and the deterministic
//! [`RuleBook`] fallback. Callers always get an extraction back.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use tracing::{debug, info, warn};

use crate::config::OracleConfig;
use crate::error::{Result, SynapseError};
use crate::oracle::provider::EnrichmentOracle;
use crate::oracle::remote::RemoteOracle;
use crate::oracle::rules::RuleBook;
use crate::oracle::types::{Directive, OracleError, StructuredExtraction};

/// An extraction plus where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub extraction: StructuredExtraction,
    /// True when the oracle failed and the rule book answered instead
    pub degraded: bool,
    pub source: &'static str,
}

type CacheKey = (Directive, String);

/// Oracle wrapper that never fails
pub struct GuardedOracle {
    inner: Option<Arc<dyn EnrichmentOracle>>,
    rules: RuleBook,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
    cache: Option<Mutex<LruCache<CacheKey, StructuredExtraction>>>,
}

impl std::fmt::Debug for GuardedOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedOracle")
            .field("inner", &self.inner.as_ref().map(|o| o.name()))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl GuardedOracle {
    /// Guard `inner` with the given timeout. No retries, no cache.
    pub fn new(inner: Option<Arc<dyn EnrichmentOracle>>, timeout: Duration) -> Self {
        Self {
            inner,
            rules: RuleBook::new(),
            timeout,
            max_retries: 0,
            backoff: Duration::ZERO,
            cache: None,
        }
    }

    /// Rule book only; nothing is ever degraded.
    pub fn rules_only() -> Self {
        Self::new(None, Duration::from_secs(1))
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.backoff = backoff;
        self
    }

    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.cache = NonZeroUsize::new(capacity).map(|c| Mutex::new(LruCache::new(c)));
        self
    }

    /// Build from configuration.
    ///
    /// `provider = "rules"` uses the rule book alone, `provider = "remote"`
    /// talks to an OpenAI-compatible endpoint.
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let inner: Option<Arc<dyn EnrichmentOracle>> = match config.provider.as_str() {
            "rules" => None,
            "remote" => Some(Arc::new(RemoteOracle::new(&config.remote, timeout)?)),
            other => {
                return Err(SynapseError::Config(format!(
                    "Unknown oracle provider: {other}"
                )));
            }
        };

        info!(
            "Enrichment oracle: {} (timeout {}s, {} retries)",
            inner.as_ref().map(|o| o.name()).unwrap_or("rules"),
            config.timeout_secs,
            config.max_retries
        );

        Ok(Self::new(inner, timeout)
            .with_retries(
                config.max_retries,
                Duration::from_millis(config.retry_backoff_ms),
            )
            .with_cache(config.cache_capacity))
    }

    pub fn rules(&self) -> &RuleBook {
        &self.rules
    }

    /// Extract from `text`, falling back to the rule book keyed on `goal`
    /// whenever the oracle times out, is unavailable or answers badly.
    pub async fn extract_or_fallback(
        &self,
        text: &str,
        goal: &str,
        directive: Directive,
    ) -> Enrichment {
        let Some(oracle) = &self.inner else {
            return Enrichment {
                extraction: self.rules.extract(text, goal, directive),
                degraded: false,
                source: "rules",
            };
        };

        let key: CacheKey = (directive, text.to_string());
        if let Some(hit) = self.cache_get(&key) {
            debug!("Oracle cache hit for {} directive", directive.as_str());
            return Enrichment {
                extraction: hit,
                degraded: false,
                source: oracle.name(),
            };
        }

        match self.call_with_retries(oracle.as_ref(), text, directive).await {
            Ok(extraction) => {
                self.cache_put(key, extraction.clone());
                Enrichment {
                    extraction,
                    degraded: false,
                    source: oracle.name(),
                }
            }
            Err(e) => {
                warn!(
                    "Oracle {} failed ({}), using rule book for goal '{}'",
                    oracle.name(),
                    e,
                    goal
                );
                Enrichment {
                    extraction: self.rules.extract(text, goal, directive),
                    degraded: true,
                    source: "rules",
                }
            }
        }
    }

    async fn call_with_retries(
        &self,
        oracle: &dyn EnrichmentOracle,
        text: &str,
        directive: Directive,
    ) -> std::result::Result<StructuredExtraction, OracleError> {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.timeout, oracle.extract(text, directive))
                .await
            {
                Ok(Ok(extraction)) => extraction.validate(directive).map(|_| extraction),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(OracleError::Timeout),
            };

            match result {
                Ok(extraction) => return Ok(extraction),
                // A malformed answer will not improve on retry.
                Err(e @ OracleError::InvalidResponse(_)) => return Err(e),
                Err(e) if attempt >= self.max_retries => return Err(e),
                Err(e) => {
                    let delay = self.backoff.saturating_mul(2u32.saturating_pow(attempt));
                    debug!(
                        "Oracle attempt {} failed ({}), retrying in {:?}",
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn cache_get(&self, key: &CacheKey) -> Option<StructuredExtraction> {
        let mut guard = self.cache.as_ref()?.lock().ok()?;
        guard.get(key).cloned()
    }

    fn cache_put(&self, key: CacheKey, value: StructuredExtraction) {
        if let Some(Ok(mut guard)) = self.cache.as_ref().map(|c| c.lock()) {
            guard.put(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockOracle, MockOracleMode};

    #[tokio::test]
    async fn test_rules_only_is_not_degraded() {
        let guarded = GuardedOracle::rules_only();
        let e = guarded
            .extract_or_fallback("plan the sprint", "planning", Directive::Associations)
            .await;
        assert!(!e.degraded);
        assert_eq!(e.source, "rules");
        assert_eq!(e.extraction.goal, "planning");
    }

    #[tokio::test]
    async fn test_successful_oracle_passes_through() {
        let mock = Arc::new(MockOracle::new(MockOracleMode::Ok));
        let guarded = GuardedOracle::new(Some(mock.clone()), Duration::from_secs(1));
        let e = guarded
            .extract_or_fallback("anything", "general", Directive::Associations)
            .await;
        assert!(!e.degraded);
        assert_eq!(e.source, "mock");
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_hanging_oracle_falls_back_after_timeout() {
        let mock = Arc::new(MockOracle::new(MockOracleMode::Hang));
        let guarded = GuardedOracle::new(Some(mock), Duration::from_millis(20));
        let e = guarded
            .extract_or_fallback("fix the bug", "building", Directive::Gist)
            .await;
        assert!(e.degraded);
        assert_eq!(e.extraction.goal, "building");
        assert!(e.extraction.summary.is_some());
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let mock = Arc::new(MockOracle::new(MockOracleMode::Unavailable));
        let guarded = GuardedOracle::new(Some(mock.clone()), Duration::from_secs(1))
            .with_retries(2, Duration::from_millis(1));
        let e = guarded
            .extract_or_fallback("text", "general", Directive::Associations)
            .await;
        assert!(e.degraded);
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_invalid_response_is_not_retried() {
        let mock = Arc::new(MockOracle::new(MockOracleMode::Invalid));
        let guarded = GuardedOracle::new(Some(mock.clone()), Duration::from_secs(1))
            .with_retries(3, Duration::from_millis(1));
        let e = guarded
            .extract_or_fallback("text", "general", Directive::Associations)
            .await;
        assert!(e.degraded);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_avoids_repeat_calls() {
        let mock = Arc::new(MockOracle::new(MockOracleMode::Ok));
        let guarded =
            GuardedOracle::new(Some(mock.clone()), Duration::from_secs(1)).with_cache(8);
        for _ in 0..3 {
            guarded
                .extract_or_fallback("same text", "general", Directive::Associations)
                .await;
        }
        assert_eq!(mock.calls(), 1);
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let config = OracleConfig {
            provider: "psychic".to_string(),
            ..OracleConfig::default()
        };
        assert!(GuardedOracle::from_config(&config).is_err());
    }
}
