//! Retrieval configuration.
//!
//! Controls backend selection, embedding model, artifact paths, the adaptive
//! candidate pool, and the runtime safety knobs. All fields have serde
//! defaults so partial configuration files and env overlays work.

use civica_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Semantic retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    /// Whether semantic search is enabled at all.
    pub enabled: bool,

    /// Backend selector: "local" or "relational".
    pub backend: String,

    /// Embedding provider: "fastembed" or "mock".
    pub provider: String,

    /// Embedding model name (e.g., "bge-small-en-v1.5").
    pub model: String,

    /// Embedding dimension (auto-detected if 0; mock provider default 384).
    pub dimension: usize,

    /// Directory holding the local index artifact set.
    pub index_path: Option<String>,

    /// Cache directory for embedding model downloads.
    pub cache_path: Option<String>,

    /// Postgres connection URL for the relational backend.
    pub database_url: Option<String>,

    /// Maximum characters embedded per content chunk.
    pub chunk_max_chars: usize,

    /// Minimum normalized text length for a row to be embedded.
    pub min_content_chars: usize,

    /// Batch size for embedding operations.
    pub batch_size: usize,

    /// Base candidate pool size for the adaptive orchestrator.
    pub pool_base: usize,

    /// Maximum candidate pool size.
    pub pool_max: usize,

    /// Pool expansion factor applied when post-filter results run short.
    pub pool_expansion_factor: usize,

    /// Maximum candidates passed to the relational reranker.
    pub rerank_candidate_cap: usize,

    /// Fail instead of degrading to brute-force when the native ANN
    /// library is unavailable.
    pub require_ann: bool,

    /// Explicit override acknowledging a multi-process deployment.
    pub allow_multi_process: bool,

    /// Worker process count declared by the deployment. Injected, never
    /// inferred from process introspection.
    pub worker_processes: usize,
}

fn default_backend() -> String {
    "local".to_string()
}

fn default_provider() -> String {
    "fastembed".to_string()
}

fn default_model() -> String {
    "bge-small-en-v1.5".to_string()
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: default_backend(),
            provider: default_provider(),
            model: default_model(),
            dimension: 0,
            index_path: None,
            cache_path: None,
            database_url: None,
            chunk_max_chars: 2000,
            min_content_chars: 25,
            batch_size: 64,
            pool_base: 200,
            pool_max: 3200,
            pool_expansion_factor: 4,
            rerank_candidate_cap: 200,
            require_ann: false,
            allow_multi_process: false,
            worker_processes: 1,
        }
    }
}

impl SemanticConfig {
    /// Validate values that have no sensible fallback.
    pub fn validate(&self) -> Result<()> {
        if self.backend != "local" && self.backend != "relational" {
            return Err(Error::config(format!(
                "Unknown backend '{}'. Supported: local, relational",
                self.backend
            )));
        }
        if self.pool_base == 0 {
            return Err(Error::config("pool_base must be at least 1"));
        }
        if self.pool_expansion_factor < 2 {
            return Err(Error::config("pool_expansion_factor must be at least 2"));
        }
        if self.pool_max < self.pool_base {
            return Err(Error::config("pool_max must be >= pool_base"));
        }
        if self.chunk_max_chars < self.min_content_chars {
            return Err(Error::config(
                "chunk_max_chars must be >= min_content_chars",
            ));
        }
        Ok(())
    }

    /// Directory for the local artifact set, erroring when unset.
    pub fn index_dir(&self) -> Result<std::path::PathBuf> {
        self.index_path
            .as_ref()
            .map(std::path::PathBuf::from)
            .ok_or_else(|| Error::config("index_path is not configured"))
    }
}

// ============================================================================
// Tests
// ============================================================================
