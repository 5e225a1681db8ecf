//! Retrieval strategies over a [`VectorIndex`] snapshot.
//!
//! Scores are higher-is-better within each strategy: `1 / (1 + distance)` for
//! similarity, reciprocal rank for multi-query MMR and BM25 for keywords.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use lexidb_core::error::{Error, Result};
use lexidb_core::traits::Embedder;
use lexidb_core::types::{EntryId, RetrievalResult, SearchHit, StrategyKind};
use lexidb_text::KeywordIndex;
use lexidb_vector::VectorIndex;

use crate::expander::QueryExpander;
use crate::external::embed_bounded;

fn hit(index: &VectorIndex, id: EntryId, score: f32, strategy: StrategyKind) -> Result<SearchHit> {
    let meta = index.meta(id).ok_or_else(|| Error::CorruptIndex(format!("no metadata for entry {id}")))?;
    Ok(SearchHit { id, score, strategy, meta: meta.clone() })
}

pub struct SimilarityStrategy {
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
}

impl SimilarityStrategy {
    pub fn new(embedder: Arc<dyn Embedder>, timeout: Duration) -> Self { Self { embedder, timeout } }

    pub async fn retrieve(&self, index: &VectorIndex, query: &str, k: usize) -> Result<RetrievalResult> {
        if index.is_empty() || k == 0 { return Ok(Vec::new()); }
        let mut vectors = embed_bounded(self.embedder.as_ref(), &[query.to_string()], self.timeout).await?;
        let q = vectors.pop().unwrap_or_default();
        index
            .search_nearest(&q, k)?
            .into_iter()
            .map(|(id, d)| hit(index, id, 1.0 / (1.0 + d), StrategyKind::Similarity))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MmrParams {
    pub k: usize,
    pub fetch_k: usize,
    pub lambda_diversity: f32,
    pub n_expansions: usize,
}

/// MMR search for the query and each of its expansions, unioned in first-seen order.
pub struct MultiQueryMmrStrategy {
    embedder: Arc<dyn Embedder>,
    expander: QueryExpander,
    timeout: Duration,
}

impl MultiQueryMmrStrategy {
    pub fn new(embedder: Arc<dyn Embedder>, expander: QueryExpander, timeout: Duration) -> Self {
        Self { embedder, expander, timeout }
    }

    pub async fn retrieve(&self, index: &VectorIndex, query: &str, params: MmrParams) -> Result<RetrievalResult> {
        if index.is_empty() || params.k == 0 { return Ok(Vec::new()); }
        let expansions = match self.expander.expand(query, params.n_expansions).await {
            Ok(v) => v,
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "query expansion failed, searching with the original query only");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let mut queries = Vec::with_capacity(expansions.len() + 1);
        queries.push(query.to_string());
        queries.extend(expansions);
        let vectors = embed_bounded(self.embedder.as_ref(), &queries, self.timeout).await?;

        let mut seen = HashSet::new();
        let mut order = Vec::new();
        for q in &vectors {
            for id in index.search_mmr(q, params.k, params.fetch_k, params.lambda_diversity)? {
                if seen.insert(id) { order.push(id); }
            }
        }
        debug!(queries = queries.len(), unioned = order.len(), "multi-query mmr");
        order.truncate(params.k);
        order
            .into_iter()
            .enumerate()
            .map(|(rank, id)| {
                #[allow(clippy::cast_precision_loss)]
                let score = 1.0 / (rank + 1) as f32;
                hit(index, id, score, StrategyKind::MultiQueryMmr)
            })
            .collect()
    }
}

/// BM25 over the keyword index built alongside the vector index.
pub struct KeywordStrategy;

impl KeywordStrategy {
    pub fn retrieve(index: &VectorIndex, keywords: &KeywordIndex, query: &str, k: usize) -> Result<RetrievalResult> {
        keywords.search(query, k)?.into_iter().map(|(id, score)| hit(index, id, score, StrategyKind::Keyword)).collect()
    }
}
