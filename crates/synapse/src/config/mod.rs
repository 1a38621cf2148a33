use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Result, SynapseError};

/// Current configuration schema version.
pub const CONFIG_VERSION: u32 = 1;

/// Upper bound on any oracle timeout, in seconds.
pub const MAX_ORACLE_TIMEOUT_SECS: u64 = 300;

/// Main configuration structure for Synapse
///
/// Every threshold used by a stage lives here. Stages receive the config by
/// reference through their pass context and never read ambient state.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Schema version of this config
    #[serde(default = "default_version")]
    pub version: u32,
    /// Working memory window and ranking
    #[serde(default)]
    pub working_memory: WorkingMemoryConfig,
    /// Short-term episode organization
    #[serde(default)]
    pub stm: StmConfig,
    /// Replay, strengthening and fate thresholds
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    /// Long-term semantic network
    #[serde(default)]
    pub ltm: LtmConfig,
    /// Enrichment oracle access
    #[serde(default)]
    pub oracle: OracleConfig,
    /// Store write retries
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Pass execution settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            working_memory: WorkingMemoryConfig::default(),
            stm: StmConfig::default(),
            consolidation: ConsolidationConfig::default(),
            ltm: LtmConfig::default(),
            oracle: OracleConfig::default(),
            persistence: PersistenceConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

impl Config {
    /// Parse a config from TOML text and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| SynapseError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        tracing::info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            SynapseError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from an explicit path, else the first default location that
    /// exists, else built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        for path in default_paths().iter().flatten() {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.version != CONFIG_VERSION {
            return Err(SynapseError::Config(format!(
                "Unsupported config version {} (expected {CONFIG_VERSION})",
                self.version
            )));
        }

        let wm = &self.working_memory;
        if wm.capacity == 0 || wm.capacity_ceiling == 0 {
            return Err(SynapseError::Config(
                "working_memory capacity and capacity_ceiling must be at least 1".to_string(),
            ));
        }
        check_unit("working_memory.overload_utilization", wm.overload_utilization)?;
        check_weights(
            "working_memory",
            &[wm.activation_weight, wm.recency_weight, wm.frequency_weight],
        )?;

        let stm = &self.stm;
        if stm.capacity == 0 {
            return Err(SynapseError::Config(
                "stm.capacity must be at least 1".to_string(),
            ));
        }
        check_weights(
            "stm coherence",
            &[
                stm.temporal_weight,
                stm.overlap_weight,
                stm.context_weight,
                stm.goal_weight,
            ],
        )?;
        if stm.medium_coherence > stm.high_coherence {
            return Err(SynapseError::Config(
                "stm.medium_coherence must not exceed stm.high_coherence".to_string(),
            ));
        }
        if stm.strength_epsilon <= 0.0 || stm.strength_epsilon >= 1.0 {
            return Err(SynapseError::Config(
                "stm.strength_epsilon must be in (0, 1)".to_string(),
            ));
        }

        let c = &self.consolidation;
        if c.hebbian_boost <= 1.0 || c.strong_boost <= 1.0 {
            return Err(SynapseError::Config(
                "consolidation boost factors must be greater than 1".to_string(),
            ));
        }
        if c.weak_decay >= 1.0 || c.mild_decay >= 1.0 || c.weak_decay <= 0.0 {
            return Err(SynapseError::Config(
                "consolidation decay factors must be in (0, 1)".to_string(),
            ));
        }
        if !(c.exclusion_floor < c.forgetting_floor
            && c.forgetting_floor <= c.retained_strength
            && c.retained_strength <= c.transfer_strength)
        {
            return Err(SynapseError::Config(
                "consolidation strength tiers must be ordered: exclusion < forgetting <= retained <= transfer"
                    .to_string(),
            ));
        }

        let ltm = &self.ltm;
        if ltm.region_size == 0 || ltm.address_space == 0 || ltm.address_space % ltm.region_size != 0
        {
            return Err(SynapseError::Config(format!(
                "ltm.address_space ({}) must be a positive multiple of ltm.region_size ({})",
                ltm.address_space, ltm.region_size
            )));
        }
        check_unit("ltm.retrieval_floor", ltm.retrieval_floor)?;
        check_weights(
            "ltm retrieval",
            &[
                ltm.efficacy_weight,
                ltm.centrality_weight,
                ltm.recency_weight,
                ltm.frequency_weight,
                ltm.state_weight,
            ],
        )?;

        if self.oracle.timeout_secs == 0 || self.oracle.timeout_secs > MAX_ORACLE_TIMEOUT_SECS {
            return Err(SynapseError::Config(format!(
                "oracle.timeout_secs must be in 1..={MAX_ORACLE_TIMEOUT_SECS}"
            )));
        }
        if self.persistence.max_attempts == 0 {
            return Err(SynapseError::Config(
                "persistence.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.pipeline.concurrency == 0 {
            return Err(SynapseError::Config(
                "pipeline.concurrency must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn default_paths() -> [Option<PathBuf>; 3] {
    [
        dirs::home_dir().map(|h| h.join(".synapse").join("config.toml")),
        dirs::config_dir().map(|c| c.join("synapse").join("config.toml")),
        Some(PathBuf::from("config.toml")),
    ]
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SynapseError::Config(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

fn check_weights(name: &str, weights: &[f32]) -> Result<()> {
    if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
        return Err(SynapseError::Config(format!(
            "{name} weights must be finite and non-negative"
        )));
    }
    let sum: f32 = weights.iter().sum();
    if (sum - 1.0).abs() > 1e-3 {
        return Err(SynapseError::Config(format!(
            "{name} weights must sum to 1.0, got {sum}"
        )));
    }
    Ok(())
}

/// Working memory window configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkingMemoryConfig {
    /// Trailing window before the cutoff in which records contend
    pub window_minutes: i64,
    /// Target number of slots (Miller's 7 ± 2)
    pub capacity: usize,
    /// Hard ceiling on slots regardless of `capacity`
    pub capacity_ceiling: usize,
    pub activation_weight: f32,
    pub recency_weight: f32,
    pub frequency_weight: f32,
    /// Time constant for recency decay in minutes
    pub recency_tau_minutes: f32,
    /// Access count at which frequency saturates to 1.0
    pub frequency_saturation: u32,
    /// Contending/ceiling ratio above which the window reports overload
    pub overload_utilization: f32,
}

impl Default for WorkingMemoryConfig {
    fn default() -> Self {
        Self {
            window_minutes: 30,
            capacity: 7,
            capacity_ceiling: 9,
            activation_weight: 0.5,
            recency_weight: 0.3,
            frequency_weight: 0.2,
            recency_tau_minutes: 15.0,
            frequency_saturation: 20,
            overload_utilization: 0.85,
        }
    }
}

impl WorkingMemoryConfig {
    /// Slots actually available in a refresh cycle
    pub fn effective_capacity(&self) -> usize {
        self.capacity.min(self.capacity_ceiling)
    }
}

/// Short-term episode organizer configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StmConfig {
    /// Minimum time in working memory before graduating
    pub min_dwell_secs: i64,
    /// Minimum activation to graduate after dwelling
    pub min_activation: f32,
    /// Activation that graduates regardless of dwell time
    pub bypass_activation: f32,
    pub capacity: usize,
    /// Extra admissions allowed above `capacity`
    pub capacity_margin: usize,
    /// Gap that closes the current episode
    pub episode_gap_minutes: i64,
    pub temporal_weight: f32,
    pub overlap_weight: f32,
    pub context_weight: f32,
    pub goal_weight: f32,
    pub high_coherence: f32,
    pub medium_coherence: f32,
    pub proactive_weight: f32,
    pub retroactive_weight: f32,
    /// Fraction of activation interference may remove
    pub interference_weight: f32,
    /// Floor for interference-adjusted strength
    pub strength_epsilon: f32,
    pub salience_threshold: f32,
    pub min_co_activation: u32,
    pub strong_strength: f32,
    pub strong_recency: f32,
    pub min_competition_share: f32,
}

impl Default for StmConfig {
    fn default() -> Self {
        Self {
            min_dwell_secs: 60,
            min_activation: 0.3,
            bypass_activation: 0.8,
            capacity: 7,
            capacity_margin: 2,
            episode_gap_minutes: 30,
            temporal_weight: 0.4,
            overlap_weight: 0.3,
            context_weight: 0.2,
            goal_weight: 0.1,
            high_coherence: 0.7,
            medium_coherence: 0.4,
            proactive_weight: 0.6,
            retroactive_weight: 0.4,
            interference_weight: 0.5,
            strength_epsilon: 0.01,
            salience_threshold: 0.5,
            min_co_activation: 2,
            strong_strength: 0.6,
            strong_recency: 0.5,
            min_competition_share: 0.2,
        }
    }
}

impl StmConfig {
    /// Maximum admissions per pass
    pub fn admission_limit(&self) -> usize {
        self.capacity + self.capacity_margin
    }
}

/// Consolidation engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub hebbian_boost: f32,
    pub weak_threshold: f32,
    pub weak_decay: f32,
    pub strong_threshold: f32,
    pub strong_boost: f32,
    pub mild_decay: f32,
    pub transfer_strength: f32,
    pub transfer_replay: f32,
    pub retained_strength: f32,
    pub retained_replay: f32,
    /// Strength above which a record is at least gradually forgotten
    pub forgetting_floor: f32,
    /// Strength below which a record is dropped from output entirely
    pub exclusion_floor: f32,
    pub ltp_transfer: f32,
    pub ltp_retained: f32,
    pub ltp_gradual: f32,
    pub ltp_rapid: f32,
    /// Longest rule-based gist, in words
    pub gist_max_words: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            hebbian_boost: 1.2,
            weak_threshold: 0.3,
            weak_decay: 0.7,
            strong_threshold: 0.6,
            strong_boost: 1.1,
            mild_decay: 0.95,
            transfer_strength: 0.7,
            transfer_replay: 0.6,
            retained_strength: 0.3,
            retained_replay: 0.4,
            forgetting_floor: 0.1,
            exclusion_floor: 0.06,
            ltp_transfer: 1.15,
            ltp_retained: 1.05,
            ltp_gradual: 0.9,
            ltp_rapid: 0.7,
            gist_max_words: 16,
        }
    }
}

/// Long-term semantic network configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LtmConfig {
    pub address_space: u32,
    pub region_size: u32,
    /// Edge count at which the degree score saturates
    pub degree_saturation: u32,
    pub potentiation_window_days: i64,
    pub depression_window_days: i64,
    /// Idle days past the depression window until depression is total
    pub depression_ramp_days: f32,
    pub frequency_saturation: u32,
    pub metaplasticity_rate: f32,
    pub recency_tau_days: f32,
    pub efficacy_weight: f32,
    pub centrality_weight: f32,
    pub recency_weight: f32,
    pub frequency_weight: f32,
    pub state_weight: f32,
    pub retrieval_floor: f32,
    pub episodic_min_strength: f32,
    pub consolidating_min_association: f32,
    pub schematized_min_efficacy: f32,
}

impl Default for LtmConfig {
    fn default() -> Self {
        Self {
            address_space: 1000,
            region_size: 20,
            degree_saturation: 10,
            potentiation_window_days: 7,
            depression_window_days: 30,
            depression_ramp_days: 60.0,
            frequency_saturation: 100,
            metaplasticity_rate: 0.1,
            recency_tau_days: 7.0,
            efficacy_weight: 0.30,
            centrality_weight: 0.25,
            recency_weight: 0.20,
            frequency_weight: 0.15,
            state_weight: 0.10,
            retrieval_floor: 0.1,
            episodic_min_strength: 0.6,
            consolidating_min_association: 0.5,
            schematized_min_efficacy: 0.6,
        }
    }
}

impl LtmConfig {
    /// Number of categorical regions in the address space
    pub fn region_count(&self) -> u32 {
        self.address_space / self.region_size.max(1)
    }
}

/// Enrichment oracle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Provider type: rules or remote
    #[serde(default = "default_oracle_provider")]
    pub provider: String,
    /// Per-call timeout in seconds
    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries after the first failed call
    #[serde(default = "default_oracle_max_retries")]
    pub max_retries: u32,
    /// Delay between retries in milliseconds
    #[serde(default = "default_oracle_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Successful extractions kept in memory
    #[serde(default = "default_oracle_cache_capacity")]
    pub cache_capacity: usize,
    /// Remote API configuration
    #[serde(default)]
    pub remote: RemoteOracleConfig,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: default_oracle_provider(),
            timeout_secs: default_oracle_timeout_secs(),
            max_retries: default_oracle_max_retries(),
            retry_backoff_ms: default_oracle_retry_backoff_ms(),
            cache_capacity: default_oracle_cache_capacity(),
            remote: RemoteOracleConfig::default(),
        }
    }
}

fn default_oracle_provider() -> String {
    "rules".to_string()
}

fn default_oracle_timeout_secs() -> u64 {
    30
}

fn default_oracle_max_retries() -> u32 {
    2
}

fn default_oracle_retry_backoff_ms() -> u64 {
    200
}

fn default_oracle_cache_capacity() -> usize {
    512
}

/// Remote API configuration for the oracle
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteOracleConfig {
    /// API endpoint URL
    #[serde(default)]
    pub api_url: String,
    /// Environment variable name for API key
    #[serde(default = "default_remote_api_key_env")]
    pub api_key_env: String,
    /// Model identifier for remote API
    #[serde(default = "default_remote_model")]
    pub model: String,
}

impl Default for RemoteOracleConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key_env: default_remote_api_key_env(),
            model: default_remote_model(),
        }
    }
}

fn default_remote_api_key_env() -> String {
    "SYNAPSE_ORACLE_API_KEY".to_string()
}

fn default_remote_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Record store write retry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Total write attempts before a record is dead-lettered
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay in milliseconds
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Backoff cap in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_backoff_ms() -> u64 {
    50
}

fn default_max_backoff_ms() -> u64 {
    2000
}

/// Pass execution configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Records processed concurrently within a pass
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Base directory for snapshots
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".synapse"))
        .unwrap_or_else(|| PathBuf::from(".synapse"))
}
