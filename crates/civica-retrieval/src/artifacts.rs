//! Persisted local-index artifact set.
//!
//! One logical unit of three files sharing a directory:
//!
//! - `vectors.f32` — raw row-major little-endian float32 matrix (or a native
//!   ANN table directory alongside it when the ANN engine is active)
//! - `rows.json` — JSON array of row metadata, index-aligned with the matrix
//!   (array position == `row_id`)
//! - `build_meta.json` — the [`BuildMetadata`] document
//!
//! Every file is written to a temporary name and atomically renamed into
//! place; an existing artifact is never overwritten in place. Readers
//! therefore observe either the fully-old or the fully-new set.

use civica_core::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{BuildMetadata, IndexHealth, IndexedRow};

/// Resolved locations of the artifact files.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    dir: PathBuf,
}

impl ArtifactPaths {
    /// Artifact paths rooted at the given directory.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// The artifact directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the raw vector matrix.
    pub fn vectors(&self) -> PathBuf {
        self.dir.join("vectors.f32")
    }

    /// Path of the row metadata array.
    pub fn rows(&self) -> PathBuf {
        self.dir.join("rows.json")
    }

    /// Path of the build metadata document.
    pub fn metadata(&self) -> PathBuf {
        self.dir.join("build_meta.json")
    }

    /// Directory of the native ANN table, when the engine is active.
    pub fn ann_dir(&self) -> PathBuf {
        self.dir.join("ann.lance")
    }

    /// Whether all three required files exist.
    pub fn all_present(&self) -> bool {
        self.vectors().is_file() && self.rows().is_file() && self.metadata().is_file()
    }
}

// ============================================================================
// Vector matrix
// ============================================================================

/// Dense row-major float32 matrix of unit-normalized embeddings.
#[derive(Debug, Clone)]
pub struct VectorMatrix {
    dim: usize,
    data: Vec<f32>,
}

impl VectorMatrix {
    /// Build a matrix from per-row vectors, validating uniform dimension.
    pub fn from_rows(vectors: Vec<Vec<f32>>) -> Result<Self> {
        let dim = vectors
            .first()
            .map(Vec::len)
            .ok_or_else(|| Error::invalid_data("cannot build a matrix from zero vectors"))?;
        let mut data = Vec::with_capacity(dim * vectors.len());
        for (i, v) in vectors.into_iter().enumerate() {
            if v.len() != dim {
                return Err(Error::invalid_data(format!(
                    "vector {i} has dimension {} but expected {dim}",
                    v.len()
                )));
            }
            data.extend(v);
        }
        Ok(Self { dim, data })
    }

    /// Embedding dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.data.len() / self.dim
    }

    /// One row as a slice.
    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    /// Raw little-endian byte encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() * 4);
        for value in &self.data {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Decode from raw little-endian bytes; `dim` comes from build metadata.
    pub fn from_bytes(bytes: &[u8], dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::invalid_data("embedding dimension of 0 in metadata"));
        }
        if bytes.len() % 4 != 0 || (bytes.len() / 4) % dim != 0 {
            return Err(Error::invalid_data(format!(
                "vector file length {} is not a multiple of dimension {dim}",
                bytes.len()
            )));
        }
        let data = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self { dim, data })
    }
}

// ============================================================================
// Atomic writes
// ============================================================================

/// Temporary sibling name on the same filesystem, so the final rename is
/// atomic.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Persist a complete artifact set.
///
/// All three files are staged under temporary names first; only when every
/// write has succeeded are they renamed into place. A failure mid-stage
/// leaves the previous artifact set untouched.
pub fn save_artifacts(
    paths: &ArtifactPaths,
    matrix: &VectorMatrix,
    rows: &[IndexedRow],
    metadata: &BuildMetadata,
) -> Result<()> {
    fs::create_dir_all(paths.dir()).map_err(|e| Error::io_with_path(e, paths.dir()))?;

    let staged = [
        (paths.vectors(), matrix.to_bytes()),
        (paths.rows(), serde_json::to_vec(rows)?),
        (paths.metadata(), serde_json::to_vec_pretty(metadata)?),
    ];

    // Stage everything before the first rename.
    for (path, bytes) in &staged {
        let tmp = tmp_path(path);
        fs::write(&tmp, bytes).map_err(|e| Error::io_with_path(e, &tmp))?;
    }
    for (path, _) in &staged {
        fs::rename(tmp_path(path), path).map_err(|e| Error::io_with_path(e, path))?;
    }

    log::info!(
        "persisted index artifacts: {} rows, dim {}, hash {}",
        metadata.row_count,
        metadata.embedding_dim,
        &metadata.corpus_hash[..12.min(metadata.corpus_hash.len())]
    );
    Ok(())
}

// ============================================================================
// Loading
// ============================================================================

/// A fully loaded, mutually consistent artifact set.
#[derive(Debug)]
pub struct LoadedArtifacts {
    /// The vector matrix.
    pub matrix: VectorMatrix,
    /// Row metadata, position == `row_id`.
    pub rows: Vec<IndexedRow>,
    /// Build metadata.
    pub metadata: BuildMetadata,
}

/// Load only the build metadata, when present.
pub fn load_metadata(paths: &ArtifactPaths) -> Result<BuildMetadata> {
    let raw = fs::read_to_string(paths.metadata())
        .map_err(|e| Error::io_with_path(e, paths.metadata()))?;
    let metadata: BuildMetadata = serde_json::from_str(&raw)?;
    Ok(metadata)
}

/// Load and cross-check the full artifact set.
///
/// Absent files yield [`civica_core::Error::NotBuilt`]; present but
/// mutually inconsistent files yield an invalid-data error so callers can
/// distinguish "never built" from "stale artifacts".
pub fn load_artifacts(paths: &ArtifactPaths) -> Result<LoadedArtifacts> {
    if !paths.all_present() {
        return Err(Error::not_built(format!(
            "no index artifacts under {}",
            paths.dir().display()
        )));
    }

    let metadata = load_metadata(paths)?;

    let rows_raw =
        fs::read_to_string(paths.rows()).map_err(|e| Error::io_with_path(e, paths.rows()))?;
    let rows: Vec<IndexedRow> = serde_json::from_str(&rows_raw)?;

    let vec_bytes =
        fs::read(paths.vectors()).map_err(|e| Error::io_with_path(e, paths.vectors()))?;
    let matrix = VectorMatrix::from_bytes(&vec_bytes, metadata.embedding_dim)?;

    if rows.len() != metadata.row_count || matrix.row_count() != metadata.row_count {
        return Err(Error::invalid_data(format!(
            "stale artifacts: metadata claims {} rows, rows.json has {}, matrix has {}",
            metadata.row_count,
            rows.len(),
            matrix.row_count()
        )));
    }

    Ok(LoadedArtifacts {
        matrix,
        rows,
        metadata,
    })
}

/// Inspect artifact health without loading the vector matrix.
///
/// Consistency is checked against file sizes and the rows array length,
/// never by loading the model or the full matrix.
pub fn inspect(paths: &ArtifactPaths) -> IndexHealth {
    if !paths.all_present() {
        return IndexHealth::absent();
    }

    let Ok(metadata) = load_metadata(paths) else {
        return IndexHealth {
            artifacts_present: true,
            consistent: false,
            row_count: None,
            model_name: None,
            built_at: None,
            engine: None,
        };
    };

    let rows_len = fs::read_to_string(paths.rows())
        .ok()
        .and_then(|raw| serde_json::from_str::<Vec<IndexedRow>>(&raw).ok())
        .map(|rows| rows.len());

    let expected_bytes = (metadata.row_count * metadata.embedding_dim * 4) as u64;
    let vectors_bytes = fs::metadata(paths.vectors()).map(|m| m.len()).ok();

    let consistent =
        rows_len == Some(metadata.row_count) && vectors_bytes == Some(expected_bytes);

    IndexHealth {
        artifacts_present: true,
        consistent,
        row_count: Some(metadata.row_count),
        model_name: Some(metadata.model_name.clone()),
        built_at: Some(metadata.built_at.clone()),
        engine: Some(metadata.engine),
    }
}

// ============================================================================
// Tests
// ============================================================================
