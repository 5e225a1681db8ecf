//! Arrow schemas and record batch builders for the persisted index tables.

use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{FixedSizeListArray, Int32Array, Int64Array, RecordBatch, StringArray, TimestampMillisecondArray};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use chrono::Utc;

use lexidb_core::error::{Error, Result};
use lexidb_core::types::ChunkMeta;

use crate::index::VectorIndex;

pub const VECTORS_TABLE: &str = "vectors";
pub const CHUNKS_TABLE: &str = "chunks";
pub const META_TABLE: &str = "meta";

pub fn build_vectors_schema(dim: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), false),
    ]))
}

pub fn build_chunks_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("chunk_index", DataType::Int32, false),
        Field::new("page", DataType::Int32, true),
        Field::new("text", DataType::Utf8, false),
    ]))
}

pub fn build_meta_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, false),
        Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
    ]))
}

fn to_i64(n: usize) -> Result<i64> {
    i64::try_from(n).map_err(|_| Error::InvalidParameter(format!("{n} does not fit a 64-bit id")))
}

fn to_i32(n: usize, what: &str) -> Result<i32> {
    i32::try_from(n).map_err(|_| Error::InvalidParameter(format!("{what} {n} does not fit Int32")))
}

pub fn vectors_batch(index: &VectorIndex) -> Result<RecordBatch> {
    let dim = to_i32(index.dim().unwrap_or(0), "dimension")?;
    let mut ids = Vec::with_capacity(index.len());
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(index.len());
    for (id, v, _) in index.iter() {
        ids.push(to_i64(id)?);
        vectors.push(Some(v.iter().map(|&x| Some(x)).collect()));
    }
    RecordBatch::try_new(
        build_vectors_schema(dim),
        vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, dim)),
        ],
    )
    .map_err(Error::storage)
}

/// Chunk metadata rows with ids starting at `first_id`.
pub fn chunks_batch(first_id: usize, metas: &[ChunkMeta]) -> Result<RecordBatch> {
    let mut ids = Vec::with_capacity(metas.len());
    let mut sources = Vec::with_capacity(metas.len());
    let mut chunk_indices = Vec::with_capacity(metas.len());
    let mut pages: Vec<Option<i32>> = Vec::with_capacity(metas.len());
    let mut texts = Vec::with_capacity(metas.len());
    for (offset, m) in metas.iter().enumerate() {
        ids.push(to_i64(first_id + offset)?);
        sources.push(m.source.as_str());
        chunk_indices.push(to_i32(m.chunk_index, "chunk_index")?);
        pages.push(m.page.map(|p| i32::try_from(p).map_err(|_| Error::InvalidParameter(format!("page {p} does not fit Int32")))).transpose()?);
        texts.push(m.text.as_str());
    }
    RecordBatch::try_new(
        build_chunks_schema(),
        vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(StringArray::from(sources)),
            Arc::new(Int32Array::from(chunk_indices)),
            Arc::new(Int32Array::from(pages)),
            Arc::new(StringArray::from(texts)),
        ],
    )
    .map_err(Error::storage)
}

pub fn meta_batch(pairs: &[(&str, String)]) -> Result<RecordBatch> {
    let now = Utc::now().timestamp_millis();
    RecordBatch::try_new(
        build_meta_schema(),
        vec![
            Arc::new(StringArray::from(pairs.iter().map(|(k, _)| *k).collect::<Vec<_>>())),
            Arc::new(StringArray::from(pairs.iter().map(|(_, v)| v.as_str()).collect::<Vec<_>>())),
            Arc::new(TimestampMillisecondArray::from(vec![now; pairs.len()])),
        ],
    )
    .map_err(Error::storage)
}
