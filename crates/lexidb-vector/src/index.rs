use std::cmp::Ordering;
use std::ops::Range;

use lexidb_core::error::{Error, Result};
use lexidb_core::types::{ChunkMeta, EntryId};

/// Squared Euclidean distance.
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn similarity(distance: f32) -> f32 { 1.0 / (1.0 + distance) }

/// Append-only flat index. Vectors are stored row-major in one buffer; entry
/// `i` owns `data[i * dim..(i + 1) * dim]` and `metas[i]`.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    dim: Option<usize>,
    data: Vec<f32>,
    metas: Vec<ChunkMeta>,
}

impl VectorIndex {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.metas.len() }

    pub fn is_empty(&self) -> bool { self.metas.is_empty() }

    /// Dimension established by the first insert, `None` while empty.
    pub fn dim(&self) -> Option<usize> { self.dim }

    pub fn meta(&self, id: EntryId) -> Option<&ChunkMeta> { self.metas.get(id) }

    pub fn vector(&self, id: EntryId) -> Option<&[f32]> {
        let dim = self.dim?;
        self.data.get(id * dim..(id + 1) * dim)
    }

    pub fn metas(&self) -> &[ChunkMeta] { &self.metas }

    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &[f32], &ChunkMeta)> + '_ {
        let dim = self.dim.unwrap_or(1);
        self.data.chunks_exact(dim).zip(&self.metas).enumerate().map(|(id, (v, m))| (id, v, m))
    }

    /// Append entries in order and return the ids they were assigned.
    ///
    /// The whole batch is validated before anything is appended, so a
    /// mismatching vector leaves the index untouched.
    pub fn insert(&mut self, entries: Vec<(Vec<f32>, ChunkMeta)>) -> Result<Range<EntryId>> {
        let start = self.len();
        let Some(first) = entries.first() else { return Ok(start..start) };
        let dim = match self.dim {
            Some(d) => d,
            None if first.0.is_empty() => return Err(Error::InvalidParameter("cannot index zero-length vectors".into())),
            None => first.0.len(),
        };
        if let Some((v, _)) = entries.iter().find(|(v, _)| v.len() != dim) {
            return Err(Error::DimensionMismatch { expected: dim, actual: v.len() });
        }
        self.dim = Some(dim);
        self.data.reserve(entries.len() * dim);
        self.metas.reserve(entries.len());
        for (v, meta) in entries {
            self.data.extend_from_slice(&v);
            self.metas.push(meta);
        }
        Ok(start..self.len())
    }

    fn check_query(&self, query: &[f32]) -> Result<usize> {
        let dim = match self.dim {
            Some(d) if !self.is_empty() => d,
            _ => return Err(Error::EmptyIndex),
        };
        if query.len() != dim { return Err(Error::DimensionMismatch { expected: dim, actual: query.len() }); }
        Ok(dim)
    }

    /// `k` nearest entries by squared L2 distance, ascending; ties go to the lower id.
    pub fn search_nearest(&self, query: &[f32], k: usize) -> Result<Vec<(EntryId, f32)>> {
        let dim = self.check_query(query)?;
        let mut scored: Vec<(EntryId, f32)> =
            self.data.chunks_exact(dim).enumerate().map(|(id, v)| (id, l2_squared(query, v))).collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k.min(self.len()));
        Ok(scored)
    }

    /// Maximal marginal relevance over the `fetch_k` nearest candidates.
    ///
    /// Relevance is `1 / (1 + d(candidate, query))` and redundancy the largest
    /// `1 / (1 + d(candidate, selected))`. On equal scores the nearer candidate wins.
    pub fn search_mmr(&self, query: &[f32], k: usize, fetch_k: usize, lambda_diversity: f32) -> Result<Vec<EntryId>> {
        if fetch_k < k {
            return Err(Error::InvalidParameter(format!("fetch_k ({fetch_k}) must be >= k ({k})")));
        }
        if !(0.0..=1.0).contains(&lambda_diversity) {
            return Err(Error::InvalidParameter(format!("lambda_diversity must be in [0,1], got {lambda_diversity}")));
        }
        let candidates = self.search_nearest(query, fetch_k)?;
        let take = k.min(candidates.len());
        let mut selected: Vec<EntryId> = Vec::with_capacity(take);
        let mut remaining: Vec<(EntryId, f32)> = candidates.into_iter().map(|(id, d)| (id, similarity(d))).collect();
        // running max similarity of each remaining candidate to the selected set
        let mut redundancy = vec![0f32; remaining.len()];

        while selected.len() < take {
            let mut best: Option<(usize, f32)> = None;
            for (pos, &(_, relevance)) in remaining.iter().enumerate() {
                let score = lambda_diversity * relevance - (1.0 - lambda_diversity) * redundancy[pos];
                if best.map_or(true, |(_, s)| score.total_cmp(&s) == Ordering::Greater) { best = Some((pos, score)); }
            }
            let Some((pos, _)) = best else { break };
            let (id, _) = remaining.remove(pos);
            redundancy.remove(pos);
            if let Some(picked) = self.vector(id) {
                for (slot, &(other, _)) in redundancy.iter_mut().zip(&remaining) {
                    if let Some(v) = self.vector(other) { *slot = slot.max(similarity(l2_squared(picked, v))); }
                }
            }
            selected.push(id);
        }
        Ok(selected)
    }
}
