//! LanceDB persistence for [`VectorIndex`].
//!
//! An index directory holds three tables: `vectors` and `chunks` aligned by id,
//! and a key/value `meta` table (`entries`, `dim`, `built_at`, `content_hash`).
//! Saves are full rewrites staged in a sibling directory and renamed into place;
//! the replaced generation is moved aside first and deleted last.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Int32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::ExecutableQuery;
use lancedb::{connect, Connection};
use tracing::{debug, info};

use lexidb_core::error::{Error, Result};
use lexidb_core::types::ChunkMeta;

use crate::index::VectorIndex;
use crate::schema::{chunks_batch, meta_batch, vectors_batch, CHUNKS_TABLE, META_TABLE, VECTORS_TABLE};

/// Summary of a persisted index as recorded in its `meta` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    pub entries: usize,
    pub dim: Option<usize>,
    pub built_at: String,
    pub content_hash: String,
}

pub fn content_hash(metas: &[ChunkMeta]) -> String {
    let mut hasher = blake3::Hasher::new();
    for m in metas {
        hasher.update(m.text.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

pub async fn open_db(dir: &Path) -> Result<Connection> {
    connect(dir.to_string_lossy().as_ref()).execute().await.map_err(Error::storage)
}

async fn write_table(conn: &Connection, name: &str, batch: RecordBatch) -> Result<()> {
    let schema = batch.schema();
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
    conn.create_table(name, reader).execute().await.map_err(Error::storage)?;
    Ok(())
}

async fn read_table(conn: &Connection, name: &str) -> Result<Vec<RecordBatch>> {
    let table = conn.open_table(name).execute().await.map_err(Error::storage)?;
    let stream = table.query().execute().await.map_err(Error::storage)?;
    stream.try_collect().await.map_err(Error::storage)
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, table: &str, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::CorruptIndex(format!("{table}.{name} column missing or mistyped")))
}

fn row_id(value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::CorruptIndex(format!("negative id {value}")))
}

pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }

    pub fn dir(&self) -> &Path { &self.dir }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.dir.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(suffix);
        self.dir.with_file_name(name)
    }

    fn staging_dir(&self) -> PathBuf { self.sibling(".staging") }

    fn previous_dir(&self) -> PathBuf { self.sibling(".previous") }

    /// Directory holding the live index. A save interrupted between its two
    /// renames leaves only the previous generation, which is still valid.
    fn persisted_dir(&self) -> Option<PathBuf> {
        if self.dir.exists() { return Some(self.dir.clone()); }
        let previous = self.previous_dir();
        previous.exists().then_some(previous)
    }

    /// Persist `index`, replacing whatever the directory held before.
    pub async fn save(&self, index: &VectorIndex) -> Result<IndexMeta> {
        let staging = self.staging_dir();
        if staging.exists() { tokio::fs::remove_dir_all(&staging).await?; }
        tokio::fs::create_dir_all(&staging).await?;

        let meta = IndexMeta {
            entries: index.len(),
            dim: index.dim(),
            built_at: Utc::now().to_rfc3339(),
            content_hash: content_hash(index.metas()),
        };
        let conn = open_db(&staging).await?;
        if !index.is_empty() {
            write_table(&conn, VECTORS_TABLE, vectors_batch(index)?).await?;
            write_table(&conn, CHUNKS_TABLE, chunks_batch(0, index.metas())?).await?;
        }
        let pairs = [
            ("entries", meta.entries.to_string()),
            ("dim", meta.dim.unwrap_or(0).to_string()),
            ("built_at", meta.built_at.clone()),
            ("content_hash", meta.content_hash.clone()),
        ];
        write_table(&conn, META_TABLE, meta_batch(&pairs)?).await?;
        drop(conn);

        let previous = self.previous_dir();
        if self.dir.exists() {
            if previous.exists() { tokio::fs::remove_dir_all(&previous).await?; }
            tokio::fs::rename(&self.dir, &previous).await?;
        }
        tokio::fs::rename(&staging, &self.dir).await?;
        if previous.exists() { tokio::fs::remove_dir_all(&previous).await?; }
        info!(dir = %self.dir.display(), entries = meta.entries, "index saved");
        Ok(meta)
    }

    /// Meta of the persisted index, `None` when nothing has been built yet.
    pub async fn read_meta(&self) -> Result<Option<IndexMeta>> {
        let Some(dir) = self.persisted_dir() else { return Ok(None) };
        let conn = open_db(&dir).await?;
        self.read_meta_from(&conn).await
    }

    async fn read_meta_from(&self, conn: &Connection) -> Result<Option<IndexMeta>> {
        let names = conn.table_names().execute().await.map_err(Error::storage)?;
        if !names.iter().any(|n| n == META_TABLE) { return Ok(None); }
        let mut kv = HashMap::new();
        for batch in read_table(conn, META_TABLE).await? {
            let keys = column::<StringArray>(&batch, META_TABLE, "key")?;
            let values = column::<StringArray>(&batch, META_TABLE, "value")?;
            for i in 0..batch.num_rows() { kv.insert(keys.value(i).to_string(), values.value(i).to_string()); }
        }
        let number = |key: &str| -> Result<usize> {
            kv.get(key)
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| Error::CorruptIndex(format!("meta.{key} missing or not a number")))
        };
        let entries = number("entries")?;
        let dim = Some(number("dim")?).filter(|d| *d > 0);
        Ok(Some(IndexMeta {
            entries,
            dim,
            built_at: kv.get("built_at").cloned().unwrap_or_default(),
            content_hash: kv.get("content_hash").cloned().unwrap_or_default(),
        }))
    }

    /// Load the persisted index. `Ok(None)` means "not built".
    pub async fn load(&self) -> Result<Option<VectorIndex>> {
        let Some(dir) = self.persisted_dir() else { return Ok(None) };
        let conn = open_db(&dir).await?;
        let Some(meta) = self.read_meta_from(&conn).await? else { return Ok(None) };
        if meta.entries == 0 { return Ok(Some(VectorIndex::new())); }

        let names = conn.table_names().execute().await.map_err(Error::storage)?;
        for table in [VECTORS_TABLE, CHUNKS_TABLE] {
            if !names.iter().any(|n| n == table) { return Err(Error::CorruptIndex(format!("table `{table}` missing"))); }
        }

        let mut vectors: Vec<(usize, Vec<f32>)> = Vec::with_capacity(meta.entries);
        for batch in read_table(&conn, VECTORS_TABLE).await? {
            let ids = column::<Int64Array>(&batch, VECTORS_TABLE, "id")?;
            let lists = column::<FixedSizeListArray>(&batch, VECTORS_TABLE, "vector")?;
            for i in 0..batch.num_rows() {
                let values = lists.value(i);
                vectors.push((row_id(ids.value(i))?, values.as_primitive::<Float32Type>().values().to_vec()));
            }
        }
        let mut chunks: Vec<(usize, ChunkMeta)> = Vec::with_capacity(meta.entries);
        for batch in read_table(&conn, CHUNKS_TABLE).await? {
            let ids = column::<Int64Array>(&batch, CHUNKS_TABLE, "id")?;
            let sources = column::<StringArray>(&batch, CHUNKS_TABLE, "source")?;
            let chunk_indices = column::<Int32Array>(&batch, CHUNKS_TABLE, "chunk_index")?;
            let pages = column::<Int32Array>(&batch, CHUNKS_TABLE, "page")?;
            let texts = column::<StringArray>(&batch, CHUNKS_TABLE, "text")?;
            for i in 0..batch.num_rows() {
                let page = if pages.is_null(i) {
                    None
                } else {
                    let p = pages.value(i);
                    Some(u32::try_from(p).map_err(|_| Error::CorruptIndex(format!("negative page {p}")))?)
                };
                let chunk_index = chunk_indices.value(i);
                let meta = ChunkMeta {
                    source: sources.value(i).to_string(),
                    chunk_index: usize::try_from(chunk_index)
                        .map_err(|_| Error::CorruptIndex(format!("negative chunk_index {chunk_index}")))?,
                    page,
                    text: texts.value(i).to_string(),
                };
                chunks.push((row_id(ids.value(i))?, meta));
            }
        }

        if vectors.len() != chunks.len() || vectors.len() != meta.entries {
            return Err(Error::CorruptIndex(format!(
                "row counts disagree: vectors={}, chunks={}, meta.entries={}",
                vectors.len(),
                chunks.len(),
                meta.entries
            )));
        }
        vectors.sort_by_key(|(id, _)| *id);
        chunks.sort_by_key(|(id, _)| *id);
        let aligned = vectors.iter().zip(&chunks).enumerate().all(|(row, ((vid, _), (cid, _)))| *vid == row && *cid == row);
        if !aligned { return Err(Error::CorruptIndex("ids are not aligned 0..n across tables".into())); }

        let mut index = VectorIndex::new();
        let entries: Vec<(Vec<f32>, ChunkMeta)> = vectors.into_iter().zip(chunks).map(|((_, v), (_, m))| (v, m)).collect();
        index.insert(entries).map_err(|e| Error::CorruptIndex(format!("stored vectors are inconsistent: {e}")))?;
        if meta.dim.is_some() && index.dim() != meta.dim {
            return Err(Error::CorruptIndex(format!("meta.dim {:?} but vectors have {:?}", meta.dim, index.dim())));
        }
        if !meta.content_hash.is_empty() && content_hash(index.metas()) != meta.content_hash {
            return Err(Error::CorruptIndex("content hash does not match stored chunks".into()));
        }
        debug!(entries = index.len(), dim = ?index.dim(), "index loaded from {}", dir.display());
        Ok(Some(index))
    }
}
