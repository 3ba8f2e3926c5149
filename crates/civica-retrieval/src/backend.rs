//! Backend abstraction over the concrete index stores.
//!
//! Two implementations exist:
//!
//! - [`crate::local::LocalIndexBackend`] — artifact files on local disk,
//!   searched ANN-first with a brute-force matrix fallback
//! - `RelationalBackend` — pgvector rows in Postgres, rerank-only
//!   (feature `relational`)
//!
//! The orchestrator talks to this trait only; backend selection happens once
//! in [`create_backend`].

use async_trait::async_trait;
use civica_core::{Error, Result};
use std::sync::Arc;

use crate::config::SemanticConfig;
use crate::corpus::CorpusSource;
use crate::embedding::SharedEmbedder;
use crate::types::{
    BuildReport, EngineKind, IndexHealth, LexicalCandidate, RerankedDocument, SemanticCandidate,
};

/// A semantic index store: build, query, rerank, health.
#[async_trait]
pub trait SemanticBackend: Send + Sync {
    /// Engine variant this backend serves queries with.
    fn engine(&self) -> EngineKind;

    /// Whether the backend can answer open-corpus queries on its own.
    ///
    /// Backends that only rescore externally supplied candidate sets
    /// return false; the orchestrator refuses bare searches against them.
    fn supports_bare_query(&self) -> bool {
        true
    }

    /// (Re)build the index from the corpus source.
    ///
    /// Implementations detect an unchanged corpus via its fingerprint and
    /// skip re-embedding, reporting `from_cache`.
    async fn build_index(&self, source: &dyn CorpusSource) -> Result<BuildReport>;

    /// Top-`limit` rows most similar to the query text, best first.
    async fn query(&self, query: &str, limit: usize) -> Result<Vec<SemanticCandidate>>;

    /// Reorder lexically matched documents by vector similarity, best first.
    ///
    /// Only meeting-kind candidates with a catalog id participate; the set
    /// is capped by configuration before scoring.
    async fn rerank(
        &self,
        query: &str,
        candidates: &[LexicalCandidate],
    ) -> Result<Vec<RerankedDocument>>;

    /// Backend health without loading the embedding model.
    async fn health(&self) -> Result<IndexHealth>;
}

/// Catalog ids eligible for reranking: meeting-kind candidates carrying a
/// catalog id, deduplicated in first-seen order, capped at `cap`.
pub(crate) fn eligible_catalog_ids(candidates: &[LexicalCandidate], cap: usize) -> Vec<i64> {
    let mut seen = std::collections::HashSet::new();
    candidates
        .iter()
        .filter(|c| c.result_kind == crate::types::ResultKind::Meeting)
        .filter_map(|c| c.catalog_id)
        .filter(|id| seen.insert(*id))
        .take(cap)
        .collect()
}

/// Construct the configured backend.
pub fn create_backend(
    config: &SemanticConfig,
    embedder: SharedEmbedder,
) -> Result<Arc<dyn SemanticBackend>> {
    config.validate()?;
    match config.backend.as_str() {
        "local" => Ok(Arc::new(crate::local::LocalIndexBackend::new(
            config.clone(),
            embedder,
        )?)),
        #[cfg(feature = "relational")]
        "relational" => Ok(Arc::new(crate::relational::RelationalBackend::new(
            config.clone(),
            embedder,
        )?)),
        #[cfg(not(feature = "relational"))]
        "relational" => Err(Error::config(
            "Backend 'relational' requires the 'relational' feature",
        )),
        other => Err(Error::config(format!(
            "Unknown backend '{other}'. Supported: local, relational"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
