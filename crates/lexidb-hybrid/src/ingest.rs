//! Batched ingestion: chunk, embed (concurrently, order preserved), insert.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{info, warn};

use lexidb_core::chunker::Chunker;
use lexidb_core::config::Settings;
use lexidb_core::error::{Error, Result};
use lexidb_core::traits::Embedder;
use lexidb_core::types::{Chunk, Document};
use lexidb_vector::VectorIndex;

use crate::external::embed_bounded;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub batch_size: usize,
    pub concurrency: usize,
    pub show_progress: bool,
}

impl IngestOptions {
    pub fn new(max_tokens: usize, overlap_tokens: usize, batch_size: usize) -> Self {
        Self { max_tokens, overlap_tokens, batch_size, concurrency: 1, show_progress: false }
    }
}

impl From<&Settings> for IngestOptions {
    fn from(s: &Settings) -> Self {
        Self {
            max_tokens: s.chunking.max_tokens,
            overlap_tokens: s.chunking.overlap_tokens,
            batch_size: s.ingest.batch_size,
            concurrency: s.ingest.concurrency,
            show_progress: s.ingest.show_progress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedBatch {
    /// 0-based position of the batch in the run.
    pub batch: usize,
    pub chunks: usize,
    pub first_source: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub inserted: usize,
    pub skipped: Vec<SkippedBatch>,
}

fn progress_bar(len: usize, enabled: bool) -> ProgressBar {
    if !enabled { return ProgressBar::hidden(); }
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({percent}%) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

pub struct IngestionPipeline {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
}

impl IngestionPipeline {
    pub fn new(chunker: Chunker, embedder: Arc<dyn Embedder>, timeout: Duration) -> Self { Self { chunker, embedder, timeout } }

    /// Append every document's chunks to `index`.
    ///
    /// A batch whose embedding call fails is skipped and reported; the run goes
    /// on. Invalid chunking parameters and dimension mismatches abort it.
    /// Re-running on a populated index appends duplicates.
    pub async fn ingest(&self, index: &mut VectorIndex, documents: &[Document], opts: &IngestOptions) -> Result<IngestReport> {
        if opts.batch_size == 0 { return Err(Error::Config("ingest.batch_size must be > 0".into())); }
        let mut chunks: Vec<Chunk> = Vec::new();
        for doc in documents {
            chunks.extend(self.chunker.chunk_document(doc, opts.max_tokens, opts.overlap_tokens)?);
        }
        let mut report = IngestReport { documents: documents.len(), chunks: chunks.len(), ..IngestReport::default() };
        if chunks.is_empty() {
            info!(documents = documents.len(), "nothing to ingest");
            return Ok(report);
        }

        let batches: Vec<&[Chunk]> = chunks.chunks(opts.batch_size).collect();
        let pb = progress_bar(batches.len(), opts.show_progress);
        let embedder = self.embedder.as_ref();
        let timeout = self.timeout;
        let batches_ref = &batches;
        let mut embedded = stream::iter(0..batches.len())
            .map(move |n| {
                let batch: &[Chunk] = batches_ref[n];
                async move {
                    let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
                    (n, batch, embed_bounded(embedder, &texts, timeout).await)
                }
            })
            .buffered(opts.concurrency.max(1));

        while let Some((n, batch, outcome)) = embedded.next().await {
            match outcome {
                Ok(vectors) => {
                    let entries = vectors.into_iter().zip(batch).map(|(v, c)| (v, c.meta())).collect();
                    let ids = index.insert(entries)?;
                    report.inserted += ids.len();
                }
                Err(e) => {
                    let first_source = batch.first().map(|c| c.source.clone()).unwrap_or_default();
                    warn!(batch = n, chunks = batch.len(), source = %first_source, error = %e, "skipping batch");
                    report.skipped.push(SkippedBatch { batch: n, chunks: batch.len(), first_source, error: e.to_string() });
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();
        info!(
            documents = report.documents,
            chunks = report.chunks,
            inserted = report.inserted,
            skipped = report.skipped.len(),
            "ingestion finished"
        );
        Ok(report)
    }
}
