//! Embedding provider trait, shared lazy holder, and mock implementation.
//!
//! The provider contract: one vector per input text, L2-normalized to unit
//! length, so inner product equals cosine similarity downstream.
//!
//! # Providers
//!
//! - `MockEmbeddingProvider`: deterministic unit vectors for testing
//! - `FastEmbedProvider`: local embedding via fastembed (feature `vector-fastembed`)
//!
//! # Process residency
//!
//! [`SharedEmbedder`] holds the provider behind a `tokio::sync::OnceCell`:
//! the first caller loads the model while later callers block on the same
//! initialization; once loaded, access is a lock-free read. A failed load
//! surfaces as a configuration error and leaves the cell empty, so nothing
//! can proceed with a partially initialized provider.

use async_trait::async_trait;
use civica_core::{Error, Result};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::SemanticConfig;

/// Trait for generating text embeddings.
///
/// Implementations wrap specific embedding libraries and provide a uniform
/// async interface. All returned vectors must be unit-normalized.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for a batch of texts, one vector per input,
    /// in input order.
    ///
    /// Default implementation calls `embed` sequentially. Backends with
    /// native batching should override this.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// The embedding dimension.
    fn dimension(&self) -> usize;

    /// The provider name for diagnostics.
    fn name(&self) -> &str;
}

/// Scale a vector to unit L2 norm in place. Zero vectors are left as-is.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}

/// Inner product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// ============================================================================
// Shared lazy holder
// ============================================================================

/// Lazily constructed, process-resident embedding provider.
///
/// Cloning shares the underlying cell, so every component in the process
/// observes the same model load.
#[derive(Clone)]
pub struct SharedEmbedder {
    config: SemanticConfig,
    cell: Arc<OnceCell<Arc<dyn EmbeddingProvider>>>,
}

impl SharedEmbedder {
    /// Create a holder; no model is loaded until [`SharedEmbedder::get`].
    pub fn new(config: SemanticConfig) -> Self {
        Self {
            config,
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// Create a holder pre-populated with a provider, bypassing lazy load.
    pub fn with_provider(config: SemanticConfig, provider: Arc<dyn EmbeddingProvider>) -> Self {
        let cell = OnceCell::new();
        // A fresh cell cannot already be set.
        let _ = cell.set(provider);
        Self {
            config,
            cell: Arc::new(cell),
        }
    }

    /// Whether the model has already been loaded.
    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// Get the provider, loading the model on first call.
    pub async fn get(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let provider = self
            .cell
            .get_or_try_init(|| async { create_provider(&self.config).await })
            .await?;
        Ok(Arc::clone(provider))
    }
}

impl std::fmt::Debug for SharedEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEmbedder")
            .field("provider", &self.config.provider)
            .field("model", &self.config.model)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Construct the configured provider.
async fn create_provider(config: &SemanticConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "mock" => {
            let dimension = if config.dimension == 0 {
                384
            } else {
                config.dimension
            };
            Ok(Arc::new(MockEmbeddingProvider::new(dimension)))
        }
        #[cfg(feature = "vector-fastembed")]
        "fastembed" => {
            let model = config.model.clone();
            let cache = config.cache_path.clone();
            // Model load is blocking (file I/O plus ONNX session setup).
            let provider = tokio::task::spawn_blocking(move || {
                crate::fastembed::FastEmbedProvider::new(&model, cache.as_deref())
            })
            .await
            .map_err(|e| Error::operation(format!("spawn_blocking failed: {e}")))??;
            Ok(Arc::new(provider))
        }
        #[cfg(not(feature = "vector-fastembed"))]
        "fastembed" => Err(Error::config(
            "Provider 'fastembed' requires the 'vector-fastembed' feature",
        )),
        other => Err(Error::config(format!(
            "Unknown embedding provider: '{other}'. Supported: fastembed, mock"
        ))),
    }
}

// ============================================================================
// Mock provider
// ============================================================================

/// A mock embedding provider for testing.
///
/// Generates deterministic unit vectors derived from the input bytes, with
/// a small vocabulary-sensitive twist so that texts sharing words score
/// higher against each other than unrelated texts.
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    /// Create a new mock provider with the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn deterministic_embedding(&self, text: &str) -> Vec<f32> {
        if self.dimension == 0 {
            return Vec::new();
        }
        let mut embedding = vec![0.0f32; self.dimension];

        // Hash each whitespace token into a handful of components so that
        // shared vocabulary produces overlapping mass. Each probe index is
        // derived through a full avalanche mix; without it the probe indices
        // of distinct tokens collide often enough at small dimensions to
        // swamp the shared-vocabulary signal.
        for token in text.split_whitespace() {
            let mut h: u64 = 1469598103934665603;
            for b in token.to_lowercase().bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(1099511628211);
            }
            for probe in 0..4u64 {
                let idx = (mix64(h ^ probe) % self.dimension as u64) as usize;
                embedding[idx] += 1.0;
            }
        }

        l2_normalize(&mut embedding);
        embedding
    }
}

/// 64-bit finalizer (murmur3 constants): every input bit affects every
/// output bit.
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;
    x
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.deterministic_embedding(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| self.deterministic_embedding(t))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Tests
// ============================================================================
