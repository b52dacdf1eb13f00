//! Configuration management for Strata.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`STRATA__` prefix, `__` separator,
//!    e.g. `STRATA__SEARCH__RRF_K=40`)
//! 2. Config file (`strata.toml` by default)
//! 3. Defaults

use serde::Deserialize;

use crate::error::{Result, StrataError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrataConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub traversal: TraversalConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

/// Versioned store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Upper bound on waiting for an entity lock before failing with
    /// `StorageUnavailable`.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Page size for history and listings when the caller gives none.
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Largest page size a caller may request.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// Snapshot file used by the CLI.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
}

/// Traversal engine settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TraversalConfig {
    /// Ceiling on requested `max_depth`.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// Discovery stops once this many nodes have been found.
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
}

/// Search fusion settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// RRF damping constant `k`.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,

    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,

    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,

    /// Candidates retrieved per channel before fusion.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,

    #[serde(default = "default_search_limit")]
    pub default_limit: usize,

    #[serde(default = "default_max_page_size")]
    pub max_limit: usize,

    /// Results that get neighbor expansion when the request asks for it
    /// without saying how many.
    #[serde(default = "default_neighbor_top_k")]
    pub neighbor_top_k: usize,

    /// Neighbor cap per expanded result.
    #[serde(default = "default_max_neighbors")]
    pub max_neighbors: usize,
}

fn default_lock_timeout_ms() -> u64 {
    2_000
}

fn default_page_size() -> usize {
    50
}

fn default_max_page_size() -> usize {
    500
}

fn default_snapshot_path() -> String {
    "./strata-snapshot.json".to_string()
}

fn default_max_depth() -> u32 {
    8
}

fn default_max_nodes() -> usize {
    50_000
}

fn default_rrf_k() -> f64 {
    60.0
}

fn default_lexical_weight() -> f64 {
    0.4
}

fn default_vector_weight() -> f64 {
    0.6
}

fn default_candidate_limit() -> usize {
    200
}

fn default_search_limit() -> usize {
    20
}

fn default_neighbor_top_k() -> usize {
    5
}

fn default_max_neighbors() -> usize {
    10
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            snapshot_path: default_snapshot_path(),
        }
    }
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_page_size: default_max_page_size(),
            max_nodes: default_max_nodes(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            lexical_weight: default_lexical_weight(),
            vector_weight: default_vector_weight(),
            candidate_limit: default_candidate_limit(),
            default_limit: default_search_limit(),
            max_limit: default_max_page_size(),
            neighbor_top_k: default_neighbor_top_k(),
            max_neighbors: default_max_neighbors(),
        }
    }
}

impl SearchConfig {
    /// Reject values that would make fused scores non-finite. Cursors carry
    /// the score, so a non-finite one would silently reset paging.
    pub fn validate(&self) -> Result<()> {
        if !self.rrf_k.is_finite() || self.rrf_k <= 0.0 {
            return Err(StrataError::Config(format!(
                "search.rrf_k must be a positive number, got {}",
                self.rrf_k
            )));
        }
        for (name, weight) in [
            ("lexical_weight", self.lexical_weight),
            ("vector_weight", self.vector_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(StrataError::Config(format!(
                    "search.{name} must be finite and non-negative, got {weight}"
                )));
            }
        }
        Ok(())
    }
}

impl StrataConfig {
    /// Load from `<file_prefix>.toml` (optional) and `STRATA__*` variables.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("STRATA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: StrataConfig = cfg.try_deserialize()?;
        loaded.search.validate()?;
        tracing::debug!(
            lock_timeout_ms = loaded.store.lock_timeout_ms,
            rrf_k = loaded.search.rrf_k,
            "Configuration loaded"
        );
        Ok(loaded)
    }
}
