//! Semantic retrieval for civic-meeting documents.
//!
//! This crate turns derived meeting text (summaries, agenda items, content
//! chunks) into vectors, persists a queryable index, and serves similarity
//! queries — including the adaptive query layer that reconciles semantic
//! recall with hard metadata filters.
//!
//! # Features
//!
//! - `vector-fastembed`: local embedding generation via fastembed
//! - `vector-lancedb`: native ANN engine for the local backend
//! - `relational`: pgvector-backed store for incremental upsert and
//!   hybrid reranking
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     civica-retrieval                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider trait                                    │
//! │  ├── MockEmbeddingProvider (always available)               │
//! │  └── FastEmbedProvider (feature: vector-fastembed)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CorpusSource trait → collect_corpus (priority-ordered rows)│
//! ├─────────────────────────────────────────────────────────────┤
//! │  SemanticBackend trait                                      │
//! │  ├── LocalIndexBackend (ANN or brute-force, atomic swap)    │
//! │  └── RelationalBackend (feature: relational, rerank-only)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Runtime guard (topology + strict-ANN preflight)            │
//! │  Orchestrator (pool expansion, dedup, hydration, filters)   │
//! │  ServiceStatus (disabled / not built / stale / ready)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use civica_retrieval::{
//!     create_backend, JsonCorpusSource, Orchestrator, SearchFilters,
//!     SemanticConfig, SharedEmbedder,
//! };
//!
//! let config = SemanticConfig::default();
//! let embedder = SharedEmbedder::new(config.clone());
//! let backend = create_backend(&config, embedder)?;
//!
//! backend.build_index(&JsonCorpusSource::new("corpus.json")).await?;
//!
//! let orchestrator = Orchestrator::new(config, backend, hydrator);
//! let response = orchestrator
//!     .search("playground funding", 10, &SearchFilters::default())
//!     .await?;
//! for hit in response.hits {
//!     println!("{}: {:.3}", hit.title, hit.semantic_score);
//! }
//! ```

// Core modules (always available)
pub mod artifacts;
pub mod backend;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod guard;
pub mod local;
pub mod orchestrator;
pub mod status;
pub mod types;

// Feature-gated backend modules
#[cfg(feature = "vector-fastembed")]
pub mod fastembed;

#[cfg(feature = "vector-lancedb")]
pub mod lancedb;

#[cfg(feature = "relational")]
pub mod relational;

// Re-exports — core types
pub use types::{
    BuildMetadata, BuildReport, EngineKind, IndexHealth, IndexedRow, LexicalCandidate,
    RerankedDocument, ResultKind, SearchDiagnostics, SearchFilters, SearchHit, SearchResponse,
    SemanticCandidate, SourceKind,
};

// Re-exports — configuration
pub use config::SemanticConfig;

// Re-exports — embedding
pub use embedding::{EmbeddingProvider, MockEmbeddingProvider, SharedEmbedder};

// Re-exports — corpus
pub use corpus::{collect_corpus, corpus_hash, CatalogRecord, CorpusSource, JsonCorpusSource};

// Re-exports — backends
pub use backend::{create_backend, SemanticBackend};
pub use local::LocalIndexBackend;

// Re-exports — orchestration and status
pub use orchestrator::{DocumentHydrator, Orchestrator};
pub use status::{service_status, ServiceStatus};

// Feature-gated re-exports
#[cfg(feature = "vector-fastembed")]
pub use fastembed::FastEmbedProvider;

#[cfg(feature = "relational")]
pub use relational::RelationalBackend;
