use std::collections::{BTreeMap, HashSet};

use lexidb_core::config::{RetrievalSettings, TextSimilarityKind};
use lexidb_core::types::{ChunkMeta, EntryId, FusedEntry, FusionWeight, RetrievalResult, StrategyKind};

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Similarity of two fragments in [0, 1] over lower-cased word sets.
pub fn text_similarity(kind: TextSimilarityKind, a: &str, b: &str) -> f32 {
    let (a, b) = (words(a), words(b));
    if a.is_empty() && b.is_empty() { return 1.0; }
    let shared = a.intersection(&b).count();
    let denom = match kind {
        TextSimilarityKind::Jaccard => a.union(&b).count(),
        TextSimilarityKind::Overlap => a.len().min(b.len()),
    };
    if denom == 0 { return 0.0; }
    #[allow(clippy::cast_precision_loss)]
    let sim = shared as f32 / denom as f32;
    sim
}

/// Weighted score fusion with near-duplicate suppression.
///
/// Each strategy's scores are divided by that list's best score, scaled by
/// the strategy weight and summed per entry. A strategy without a weight
/// contributes nothing.
#[derive(Debug, Clone)]
pub struct EnsembleFusion {
    weights: Vec<FusionWeight>,
    similarity_threshold: f32,
    text_similarity: TextSimilarityKind,
}

impl EnsembleFusion {
    pub fn new(weights: Vec<FusionWeight>, similarity_threshold: f32) -> Self {
        Self { weights, similarity_threshold, text_similarity: TextSimilarityKind::default() }
    }

    #[must_use]
    pub fn with_text_similarity(mut self, kind: TextSimilarityKind) -> Self {
        self.text_similarity = kind;
        self
    }

    /// Weights for the configured strategy mix; without hybrid search MMR stands alone.
    pub fn from_settings(settings: &RetrievalSettings) -> Self {
        let weights = if settings.hybrid {
            vec![
                FusionWeight { strategy: StrategyKind::MultiQueryMmr, weight: settings.mmr_weight },
                FusionWeight { strategy: StrategyKind::Similarity, weight: settings.similarity_weight },
                FusionWeight { strategy: StrategyKind::Keyword, weight: settings.keyword_weight },
            ]
        } else {
            vec![FusionWeight { strategy: StrategyKind::MultiQueryMmr, weight: 1.0 }]
        };
        Self::new(weights, settings.similarity_threshold).with_text_similarity(settings.text_similarity)
    }

    pub fn weights(&self) -> &[FusionWeight] { &self.weights }

    pub fn weight(&self, strategy: StrategyKind) -> f32 {
        self.weights.iter().find(|w| w.strategy == strategy).map_or(0.0, |w| w.weight)
    }

    /// Combined score of every entry present in any result list.
    pub fn combined_scores(&self, results: &BTreeMap<StrategyKind, RetrievalResult>) -> BTreeMap<EntryId, (f32, ChunkMeta)> {
        let mut combined: BTreeMap<EntryId, (f32, ChunkMeta)> = BTreeMap::new();
        for (strategy, hits) in results {
            let weight = self.weight(*strategy);
            let best = hits.iter().map(|h| h.score).fold(0f32, f32::max);
            let mut counted = HashSet::new();
            for h in hits {
                // an id repeated inside one list counts once, at its first position
                if !counted.insert(h.id) { continue; }
                let normalized = if best > 0.0 { h.score / best } else { 0.0 };
                let slot = combined.entry(h.id).or_insert_with(|| (0.0, h.meta.clone()));
                slot.0 += weight * normalized;
            }
        }
        combined
    }

    /// Top `k` entries by combined score, ties by lower id, after dropping any
    /// entry whose text is more similar than the threshold to a better one.
    pub fn fuse(&self, results: &BTreeMap<StrategyKind, RetrievalResult>, k: usize) -> Vec<FusedEntry> {
        let mut ranked: Vec<FusedEntry> =
            self.combined_scores(results).into_iter().map(|(id, (score, meta))| FusedEntry { id, score, meta }).collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));

        let mut kept: Vec<FusedEntry> = Vec::with_capacity(k.min(ranked.len()));
        for entry in ranked {
            if kept.len() == k { break; }
            let duplicate = kept
                .iter()
                .any(|s| text_similarity(self.text_similarity, &s.meta.text, &entry.meta.text) > self.similarity_threshold);
            if !duplicate { kept.push(entry); }
        }
        kept
    }
}
