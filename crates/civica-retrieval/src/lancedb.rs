//! Native ANN table for the local backend.
//!
//! Stores the row vectors in a LanceDB table next to the raw artifact files
//! and serves approximate nearest neighbor queries over them. Row metadata
//! stays in `rows.json`; the table carries only the row id and the vector.
//!
//! # Schema
//!
//! | Column | Type | Purpose |
//! |--------|------|---------|
//! | `row_id` | Int64 | Position in the artifact row set |
//! | `vector` | FixedSizeList<Float32> | Unit-normalized embedding |
//!
//! Cosine distance over unit vectors, reported back as `score = 1 - distance`
//! so it matches the brute-force inner-product scores exactly.
//!
//! # Feature Gate
//!
//! This module requires the `vector-lancedb` feature.

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
};
use arrow_schema::{DataType, Field, Schema};
use civica_core::{Error, Result};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;
use std::sync::Arc;

use crate::artifacts::{ArtifactPaths, VectorMatrix};
use crate::corpus::CorpusRow;
use crate::types::{IndexedRow, SemanticCandidate};

const TABLE_NAME: &str = "rows";

/// Create (or replace) the ANN table from a freshly embedded matrix.
pub async fn build_table(
    paths: &ArtifactPaths,
    matrix: &VectorMatrix,
    rows: &[CorpusRow],
) -> Result<()> {
    let db_path = paths.ann_dir();
    let db_str = db_path
        .to_str()
        .ok_or_else(|| Error::config("index_path is not valid UTF-8"))?;

    let connection = lancedb::connect(db_str)
        .execute()
        .await
        .map_err(|e| Error::operation(format!("Failed to connect to LanceDB: {e}")))?;

    let batch = build_record_batch(matrix, rows)?;
    let schema = batch.schema();
    let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

    connection
        .create_table(TABLE_NAME, Box::new(batches))
        .mode(lancedb::database::CreateTableMode::Overwrite)
        .execute()
        .await
        .map_err(|e| Error::operation(format!("Failed to create LanceDB table: {e}")))?;

    log::info!("built ANN table: {} rows, dim {}", rows.len(), matrix.dim());
    Ok(())
}

/// Top-`limit` rows nearest to the query vector.
///
/// `rows` is the artifact row set; results join back to it by row id.
pub async fn search(
    paths: &ArtifactPaths,
    query_vec: &[f32],
    limit: usize,
    rows: &[IndexedRow],
) -> Result<Vec<SemanticCandidate>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let db_path = paths.ann_dir();
    let db_str = db_path
        .to_str()
        .ok_or_else(|| Error::config("index_path is not valid UTF-8"))?;

    let connection = lancedb::connect(db_str)
        .execute()
        .await
        .map_err(|e| Error::operation(format!("Failed to connect to LanceDB: {e}")))?;

    let table = connection
        .open_table(TABLE_NAME)
        .execute()
        .await
        .map_err(|e| Error::operation(format!("Failed to open ANN table: {e}")))?;

    let results = table
        .vector_search(query_vec.to_vec())
        .map_err(|e| Error::operation(format!("Failed to create vector search: {e}")))?
        .distance_type(DistanceType::Cosine)
        .limit(limit)
        .execute()
        .await
        .map_err(|e| Error::operation(format!("Vector search failed: {e}")))?;

    let batches: Vec<RecordBatch> = results
        .try_collect()
        .await
        .map_err(|e| Error::operation(format!("Failed to collect results: {e}")))?;

    let mut candidates = Vec::new();
    for batch in &batches {
        candidates.extend(parse_batch(batch, rows)?);
    }

    // Same ordering contract as the brute-force path.
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.row_id.cmp(&b.row_id))
    });
    candidates.truncate(limit);
    Ok(candidates)
}

// ============================================================================
// Arrow schema and batch construction
// ============================================================================

fn make_schema(dimension: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("row_id", DataType::Int64, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension,
            ),
            false,
        ),
    ]))
}

fn build_record_batch(matrix: &VectorMatrix, rows: &[CorpusRow]) -> Result<RecordBatch> {
    let dimension = matrix.dim() as i32;
    let schema = make_schema(dimension);

    let row_ids: Vec<i64> = rows.iter().map(|r| r.row.row_id as i64).collect();
    let all_values: Vec<f32> = (0..matrix.row_count())
        .flat_map(|i| matrix.row(i).iter().copied())
        .collect();

    let vector_array = FixedSizeListArray::try_new(
        Arc::new(Field::new("item", DataType::Float32, true)),
        dimension,
        Arc::new(Float32Array::from(all_values)),
        None,
    )
    .map_err(|e| Error::operation(format!("Failed to create vector array: {e}")))?;

    RecordBatch::try_new(
        schema,
        vec![Arc::new(Int64Array::from(row_ids)), Arc::new(vector_array)],
    )
    .map_err(|e| Error::operation(format!("Failed to create RecordBatch: {e}")))
}

fn parse_batch(batch: &RecordBatch, rows: &[IndexedRow]) -> Result<Vec<SemanticCandidate>> {
    let id_col = batch
        .column_by_name("row_id")
        .ok_or_else(|| Error::operation("Missing 'row_id' column in results"))?
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| Error::operation("'row_id' column is not Int64Array"))?;

    let distance_col = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    let mut candidates = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let row_id = id_col.value(i) as usize;
        let row = rows.get(row_id).ok_or_else(|| {
            Error::invalid_data(format!(
                "ANN table returned row id {row_id} beyond the artifact row set"
            ))
        })?;

        // Cosine distance over unit vectors; invert back to similarity.
        let distance = distance_col.map(|c| c.value(i)).unwrap_or(0.0);
        candidates.push(SemanticCandidate {
            row_id,
            score: 1.0 - distance,
            row: row.clone(),
        });
    }
    Ok(candidates)
}

// ============================================================================
// Tests
// ============================================================================
