//! Adaptive retrieval orchestrator.
//!
//! Drives a backend query through dedup, hydration, and post-filtering,
//! growing the candidate pool geometrically until enough filtered hits
//! survive or the pool is exhausted:
//!
//! ```text
//! pool = max(pool_base, limit)
//! loop {
//!     candidates = backend.query(query, pool)
//!     hits = filter(hydrate(dedup(candidates)))
//!     enough, or backend exhausted, or pool at cap ──► done
//!     pool *= pool_expansion_factor
//! }
//! ```
//!
//! Metadata filters apply to hydrated hits only: the document store is
//! authoritative for city, organization, category, and date, never the
//! possibly stale copies embedded in the index rows.

use async_trait::async_trait;
use civica_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::SemanticBackend;
use crate::config::SemanticConfig;
use crate::types::{
    LexicalCandidate, RerankedDocument, ResultKind, SearchDiagnostics, SearchFilters, SearchHit,
    SearchResponse, SemanticCandidate,
};

/// Resolves deduplicated candidates against the authoritative document
/// store, producing display-ready hits.
///
/// Implementations return at most one hit per input candidate, in input
/// order, carrying the candidate's score as `semantic_score`. Candidates
/// whose entity no longer exists are silently dropped.
#[async_trait]
pub trait DocumentHydrator: Send + Sync {
    /// Hydrate candidates into ranked hits.
    async fn hydrate(&self, candidates: &[SemanticCandidate]) -> Result<Vec<SearchHit>>;
}

/// Keep the best-scoring row per parent entity.
///
/// Ties prefer the lower row id, and the output is re-sorted by score
/// descending then row id ascending, so the result is independent of the
/// input order.
pub fn dedup_by_parent(candidates: Vec<SemanticCandidate>) -> Vec<SemanticCandidate> {
    let mut best: HashMap<(ResultKind, i64), SemanticCandidate> = HashMap::new();
    for candidate in candidates {
        match best.entry(candidate.row.parent_key()) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(candidate);
            }
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                let held = slot.get();
                if candidate.score > held.score
                    || (candidate.score == held.score && candidate.row_id < held.row_id)
                {
                    slot.insert(candidate);
                }
            }
        }
    }

    let mut deduped: Vec<_> = best.into_values().collect();
    deduped.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.row_id.cmp(&b.row_id))
    });
    deduped
}

/// The retrieval entry point: adaptive search plus hybrid rerank.
pub struct Orchestrator {
    config: SemanticConfig,
    backend: Arc<dyn SemanticBackend>,
    hydrator: Arc<dyn DocumentHydrator>,
}

impl Orchestrator {
    /// Wire an orchestrator over a backend and a hydrator.
    pub fn new(
        config: SemanticConfig,
        backend: Arc<dyn SemanticBackend>,
        hydrator: Arc<dyn DocumentHydrator>,
    ) -> Self {
        Self {
            config,
            backend,
            hydrator,
        }
    }

    /// The backend in use.
    pub fn backend(&self) -> &Arc<dyn SemanticBackend> {
        &self.backend
    }

    /// Adaptive open-corpus search.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<SearchResponse> {
        if !self.config.enabled {
            return Err(Error::config("semantic search is disabled"));
        }
        if !self.backend.supports_bare_query() {
            return Err(Error::config(format!(
                "backend '{}' cannot answer open-corpus queries",
                self.backend.engine()
            )));
        }

        let mut pool = self.config.pool_base.max(limit).min(self.config.pool_max);
        let mut expansion_steps = 0u32;

        loop {
            let candidates = self.backend.query(query, pool).await?;
            let fetched = candidates.len();

            let deduped = dedup_by_parent(candidates);
            let hydrated = self.hydrator.hydrate(&deduped).await?;
            let mut hits: Vec<SearchHit> = hydrated
                .into_iter()
                .filter(|hit| filters.matches(hit))
                .collect();

            // A short backend return means the corpus is exhausted; growing
            // the pool cannot surface anything new.
            let exhausted = fetched < pool;
            if hits.len() >= limit || exhausted || pool >= self.config.pool_max {
                let estimated_total_hits = hits.len();
                hits.truncate(limit);
                log::debug!(
                    "search '{query}': {estimated_total_hits} hits after {expansion_steps} \
                     expansions (pool {pool})"
                );
                return Ok(SearchResponse {
                    hits,
                    estimated_total_hits,
                    diagnostics: SearchDiagnostics {
                        engine: self.backend.engine(),
                        expansion_steps,
                        pool_size: pool,
                    },
                });
            }

            pool = pool
                .saturating_mul(self.config.pool_expansion_factor)
                .min(self.config.pool_max);
            expansion_steps += 1;
        }
    }

    /// Reorder lexically matched documents by vector similarity.
    ///
    /// The caller already holds the hydrated lexical results; only the new
    /// ordering comes back.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: &[LexicalCandidate],
    ) -> Result<Vec<RerankedDocument>> {
        if !self.config.enabled {
            return Err(Error::config("semantic search is disabled"));
        }
        self.backend.rerank(query, candidates).await
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("engine", &self.backend.engine())
            .field("pool_base", &self.config.pool_base)
            .field("pool_max", &self.config.pool_max)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusSource;
    use crate::types::{
        BuildReport, EngineKind, IndexHealth, IndexedRow, SourceKind,
    };

    fn row(row_id: usize, catalog_id: i64, city: &str) -> IndexedRow {
        IndexedRow {
            row_id,
            result_kind: ResultKind::Meeting,
            source_db_id: catalog_id,
            event_id: 100 + catalog_id,
            catalog_id: Some(catalog_id),
            agenda_item_id: None,
            source_kind: SourceKind::Summary,
            city: city.to_string(),
            meeting_category: "council".to_string(),
            organization: "City Council".to_string(),
            date: Some("2025-03-12".to_string()),
        }
    }

    fn candidate(row_id: usize, catalog_id: i64, score: f32, city: &str) -> SemanticCandidate {
        SemanticCandidate {
            row_id,
            score,
            row: row(row_id, catalog_id, city),
        }
    }

    /// Backend serving a fixed, pre-sorted candidate list.
    struct StubBackend {
        ranked: Vec<SemanticCandidate>,
        bare_query: bool,
    }

    #[async_trait]
    impl SemanticBackend for StubBackend {
        fn engine(&self) -> EngineKind {
            EngineKind::LocalBruteforce
        }

        fn supports_bare_query(&self) -> bool {
            self.bare_query
        }

        async fn build_index(&self, _source: &dyn CorpusSource) -> Result<BuildReport> {
            unimplemented!("not exercised")
        }

        async fn query(&self, _query: &str, limit: usize) -> Result<Vec<SemanticCandidate>> {
            Ok(self.ranked.iter().take(limit).cloned().collect())
        }

        async fn rerank(
            &self,
            _query: &str,
            candidates: &[LexicalCandidate],
        ) -> Result<Vec<RerankedDocument>> {
            let ids: Vec<i64> = candidates.iter().filter_map(|c| c.catalog_id).collect();
            let mut best: std::collections::HashMap<i64, f32> = std::collections::HashMap::new();
            for c in &self.ranked {
                if let Some(id) = c.row.catalog_id.filter(|id| ids.contains(id)) {
                    let entry = best.entry(id).or_insert(f32::NEG_INFINITY);
                    if c.score > *entry {
                        *entry = c.score;
                    }
                }
            }
            let mut out: Vec<RerankedDocument> = best
                .into_iter()
                .map(|(catalog_id, score)| RerankedDocument { catalog_id, score })
                .collect();
            out.sort_by(|a, b| b.score.total_cmp(&a.score));
            Ok(out)
        }

        async fn health(&self) -> Result<IndexHealth> {
            Ok(IndexHealth::absent())
        }
    }

    /// Hydrator echoing index-row metadata into hits.
    struct EchoHydrator;

    #[async_trait]
    impl DocumentHydrator for EchoHydrator {
        async fn hydrate(&self, candidates: &[SemanticCandidate]) -> Result<Vec<SearchHit>> {
            Ok(candidates
                .iter()
                .map(|c| SearchHit {
                    result_kind: c.row.result_kind,
                    source_db_id: c.row.source_db_id,
                    event_id: c.row.event_id,
                    catalog_id: c.row.catalog_id,
                    agenda_item_id: c.row.agenda_item_id,
                    title: format!("Document {}", c.row.source_db_id),
                    snippet: String::new(),
                    city: c.row.city.clone(),
                    organization: c.row.organization.clone(),
                    meeting_category: c.row.meeting_category.clone(),
                    date: c.row.date.clone(),
                    semantic_score: c.score,
                })
                .collect())
        }
    }

    fn orchestrator(ranked: Vec<SemanticCandidate>, config: SemanticConfig) -> Orchestrator {
        Orchestrator::new(
            config,
            Arc::new(StubBackend {
                ranked,
                bare_query: true,
            }),
            Arc::new(EchoHydrator),
        )
    }

    fn small_pool_config() -> SemanticConfig {
        SemanticConfig {
            pool_base: 2,
            pool_max: 8,
            pool_expansion_factor: 2,
            ..Default::default()
        }
    }

    // ------------------------------------------------------------------------
    // Dedup tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_dedup_keeps_best_row_per_parent() {
        let deduped = dedup_by_parent(vec![
            candidate(0, 1, 0.9, "A"),
            candidate(1, 1, 0.7, "A"),
            candidate(2, 2, 0.8, "A"),
        ]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].row_id, 0);
        assert_eq!(deduped[1].row_id, 2);
    }

    #[test]
    fn test_dedup_tie_prefers_lower_row_id() {
        let forward = dedup_by_parent(vec![candidate(0, 1, 0.5, "A"), candidate(1, 1, 0.5, "A")]);
        let reverse = dedup_by_parent(vec![candidate(1, 1, 0.5, "A"), candidate(0, 1, 0.5, "A")]);
        assert_eq!(forward[0].row_id, 0);
        assert_eq!(reverse[0].row_id, 0);
    }

    #[test]
    fn test_dedup_output_sorted_by_score() {
        let deduped = dedup_by_parent(vec![
            candidate(0, 1, 0.2, "A"),
            candidate(1, 2, 0.9, "A"),
            candidate(2, 3, 0.5, "A"),
        ]);
        let scores: Vec<f32> = deduped.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.2]);
    }

    // ------------------------------------------------------------------------
    // Search tests
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_search_no_filters_no_expansion() {
        let ranked = vec![
            candidate(0, 1, 0.9, "A"),
            candidate(1, 2, 0.8, "A"),
            candidate(2, 3, 0.7, "A"),
        ];
        let orch = orchestrator(ranked, small_pool_config());

        let response = orch.search("q", 2, &SearchFilters::default()).await.unwrap();
        assert_eq!(response.hits.len(), 2);
        assert_eq!(response.diagnostics.expansion_steps, 0);
        assert_eq!(response.diagnostics.pool_size, 2);
        assert_eq!(response.hits[0].catalog_id, Some(1));
    }

    #[tokio::test]
    async fn test_search_expands_pool_when_filters_starve_results() {
        // First pool of 2 yields only city-B rows; the city-A rows sit
        // deeper in the ranking and need an expansion to surface.
        let ranked = vec![
            candidate(0, 1, 0.9, "B"),
            candidate(1, 2, 0.8, "B"),
            candidate(2, 3, 0.7, "A"),
            candidate(3, 4, 0.6, "A"),
        ];
        let orch = orchestrator(ranked, small_pool_config());
        let filters = SearchFilters {
            city: Some("A".to_string()),
            ..Default::default()
        };

        let response = orch.search("q", 2, &filters).await.unwrap();
        assert_eq!(response.hits.len(), 2);
        assert_eq!(response.hits[0].catalog_id, Some(3));
        assert_eq!(response.diagnostics.expansion_steps, 1);
        assert_eq!(response.diagnostics.pool_size, 4);
    }

    #[tokio::test]
    async fn test_search_stops_when_corpus_exhausted() {
        // Only 3 rows exist; a short return ends expansion even though the
        // filter leaves fewer hits than requested.
        let ranked = vec![
            candidate(0, 1, 0.9, "B"),
            candidate(1, 2, 0.8, "B"),
            candidate(2, 3, 0.7, "A"),
        ];
        let orch = orchestrator(ranked, small_pool_config());
        let filters = SearchFilters {
            city: Some("A".to_string()),
            ..Default::default()
        };

        let response = orch.search("q", 5, &filters).await.unwrap();
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.estimated_total_hits, 1);
    }

    #[tokio::test]
    async fn test_search_pool_cap_bounds_expansion() {
        // Nothing matches; the pool starts at the limit (5), expands once to
        // the cap of 8, and stops there.
        let ranked: Vec<_> = (0..20)
            .map(|i| candidate(i, i as i64 + 1, 1.0 - i as f32 * 0.01, "B"))
            .collect();
        let orch = orchestrator(ranked, small_pool_config());
        let filters = SearchFilters {
            city: Some("A".to_string()),
            ..Default::default()
        };

        let response = orch.search("q", 5, &filters).await.unwrap();
        assert!(response.hits.is_empty());
        assert_eq!(response.diagnostics.pool_size, 8);
        assert_eq!(response.diagnostics.expansion_steps, 1);
    }

    #[tokio::test]
    async fn test_search_estimated_total_exceeds_limit() {
        let ranked: Vec<_> = (0..4)
            .map(|i| candidate(i, i as i64 + 1, 0.9 - i as f32 * 0.1, "A"))
            .collect();
        let orch = orchestrator(ranked, small_pool_config());

        let response = orch.search("q", 1, &SearchFilters::default()).await.unwrap();
        assert_eq!(response.hits.len(), 1);
        assert!(response.estimated_total_hits >= 1);
    }

    #[tokio::test]
    async fn test_search_disabled_is_config_error() {
        let config = SemanticConfig {
            enabled: false,
            ..small_pool_config()
        };
        let orch = orchestrator(vec![], config);
        let err = orch
            .search("q", 5, &SearchFilters::default())
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("disabled"));
    }

    #[tokio::test]
    async fn test_search_refuses_rerank_only_backend() {
        let orch = Orchestrator::new(
            small_pool_config(),
            Arc::new(StubBackend {
                ranked: vec![],
                bare_query: false,
            }),
            Arc::new(EchoHydrator),
        );
        let err = orch
            .search("q", 5, &SearchFilters::default())
            .await
            .unwrap_err();
        assert!(err.is_config());
    }

    // ------------------------------------------------------------------------
    // Rerank tests
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_rerank_passes_through_backend_ordering() {
        let ranked = vec![
            candidate(0, 1, 0.9, "A"),
            candidate(1, 1, 0.8, "A"),
            candidate(2, 2, 0.7, "A"),
            candidate(3, 3, 0.6, "A"),
        ];
        let orch = orchestrator(ranked, small_pool_config());

        let docs = orch
            .rerank("q", &[LexicalCandidate::meeting(1), LexicalCandidate::meeting(2)])
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].catalog_id, 1);
        assert!((docs[0].score - 0.9).abs() < 1e-6);
        assert_eq!(docs[1].catalog_id, 2);
    }

    #[tokio::test]
    async fn test_rerank_disabled_is_config_error() {
        let config = SemanticConfig {
            enabled: false,
            ..small_pool_config()
        };
        let orch = orchestrator(vec![], config);
        let err = orch
            .rerank("q", &[LexicalCandidate::meeting(1)])
            .await
            .unwrap_err();
        assert!(err.is_config());
    }
}
