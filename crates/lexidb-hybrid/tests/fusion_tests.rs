use std::collections::BTreeMap;

use lexidb_core::config::{RetrievalSettings, TextSimilarityKind};
use lexidb_core::types::{ChunkMeta, FusionWeight, RetrievalResult, SearchHit, StrategyKind};
use lexidb_hybrid::fusion::text_similarity;
use lexidb_hybrid::EnsembleFusion;

fn hit(id: usize, score: f32, strategy: StrategyKind, text: &str) -> SearchHit {
    SearchHit { id, score, strategy, meta: ChunkMeta { source: "gramatica.pdf".into(), chunk_index: id, page: Some(1), text: text.into() } }
}

fn weights(mmr: f32, sim: f32) -> Vec<FusionWeight> {
    vec![
        FusionWeight { strategy: StrategyKind::MultiQueryMmr, weight: mmr },
        FusionWeight { strategy: StrategyKind::Similarity, weight: sim },
    ]
}

fn disjoint_results() -> BTreeMap<StrategyKind, RetrievalResult> {
    let mut results = BTreeMap::new();
    results.insert(
        StrategyKind::MultiQueryMmr,
        vec![
            hit(1, 1.0, StrategyKind::MultiQueryMmr, "che aguata kokuépe"),
            hit(2, 0.5, StrategyKind::MultiQueryMmr, "sustantivo posesivo ñande"),
        ],
    );
    results.insert(
        StrategyKind::Similarity,
        vec![
            hit(3, 0.8, StrategyKind::Similarity, "verbos areales y aireales"),
            hit(4, 0.4, StrategyKind::Similarity, "pronombres personales oré"),
        ],
    );
    results
}

#[test]
fn disjoint_strategies_keep_every_entry_in_weighted_order() {
    let fusion = EnsembleFusion::new(weights(0.7, 0.3), 0.7);
    let fused = fusion.fuse(&disjoint_results(), 10);
    let ids: Vec<usize> = fused.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    let scores: Vec<f32> = fused.iter().map(|e| e.score).collect();
    for (got, want) in scores.iter().zip([0.7f32, 0.35, 0.3, 0.15]) {
        assert!((got - want).abs() < 1e-6, "got {got}, want {want}");
    }
}

#[test]
fn shared_entries_accumulate_and_k_truncates() {
    let mut results = disjoint_results();
    results.get_mut(&StrategyKind::Similarity).unwrap().push(hit(2, 0.2, StrategyKind::Similarity, "sustantivo posesivo ñande"));
    let fused = EnsembleFusion::new(weights(0.7, 0.3), 0.7).fuse(&results, 2);
    assert_eq!(fused.len(), 2);
    assert_eq!(fused[0].id, 1);
    assert_eq!(fused[1].id, 2, "0.35 + 0.3 * 0.25 beats entry 3");
}

#[test]
fn raising_a_weight_never_lowers_its_entries() {
    let results = disjoint_results();
    let low = EnsembleFusion::new(weights(0.7, 0.3), 0.7).combined_scores(&results);
    let high = EnsembleFusion::new(weights(0.7, 0.9), 0.7).combined_scores(&results);
    for hit in &results[&StrategyKind::Similarity] {
        assert!(high[&hit.id].0 >= low[&hit.id].0);
    }
    for hit in &results[&StrategyKind::MultiQueryMmr] {
        assert!((high[&hit.id].0 - low[&hit.id].0).abs() < 1e-6);
    }
}

#[test]
fn near_duplicates_collapse_to_the_better_entry() {
    let text = "Ñe'ẽ: palabra, idioma, voz del pueblo";
    let mut results = BTreeMap::new();
    results.insert(StrategyKind::MultiQueryMmr, vec![hit(5, 1.0, StrategyKind::MultiQueryMmr, text)]);
    results.insert(
        StrategyKind::Similarity,
        vec![hit(2, 1.0, StrategyKind::Similarity, text), hit(7, 0.9, StrategyKind::Similarity, "jagua: perro")],
    );
    let fused = EnsembleFusion::new(weights(0.7, 0.3), 0.7).fuse(&results, 5);
    let ids: Vec<usize> = fused.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![5, 7], "id 2 duplicates the higher-scored id 5");
}

#[test]
fn equal_scores_keep_the_earlier_entry() {
    let mut results = BTreeMap::new();
    results.insert(
        StrategyKind::Similarity,
        vec![hit(9, 0.5, StrategyKind::Similarity, "mba'e cosa"), hit(4, 0.5, StrategyKind::Similarity, "Mba'e: cosa.")],
    );
    let fused = EnsembleFusion::new(weights(0.7, 0.3), 0.5).fuse(&results, 5);
    assert_eq!(fused.iter().map(|e| e.id).collect::<Vec<_>>(), vec![4]);
}

#[test]
fn threshold_of_one_disables_dedup() {
    let mut results = BTreeMap::new();
    results.insert(
        StrategyKind::Similarity,
        vec![hit(0, 0.9, StrategyKind::Similarity, "ka'a yerba"), hit(1, 0.8, StrategyKind::Similarity, "ka'a yerba")],
    );
    assert_eq!(EnsembleFusion::new(weights(0.7, 0.3), 1.0).fuse(&results, 5).len(), 2);
}

#[test]
fn empty_results_fuse_to_nothing() {
    let mut results: BTreeMap<StrategyKind, RetrievalResult> = BTreeMap::new();
    let fusion = EnsembleFusion::new(weights(0.7, 0.3), 0.7);
    assert!(fusion.fuse(&results, 8).is_empty());
    results.insert(StrategyKind::MultiQueryMmr, Vec::new());
    results.insert(StrategyKind::Similarity, Vec::new());
    assert!(fusion.fuse(&results, 8).is_empty());
}

#[test]
fn text_similarity_measures() {
    let a = "che ha'e mbo'ehára";
    let b = "Che ha'e tembiapo";
    assert!((text_similarity(TextSimilarityKind::Jaccard, a, b) - 0.5).abs() < 1e-6);
    assert!((text_similarity(TextSimilarityKind::Overlap, "che ha'e", b) - 1.0).abs() < 1e-6);
    assert_eq!(text_similarity(TextSimilarityKind::Jaccard, "pira", "jagua"), 0.0);
}

#[test]
fn settings_drive_the_strategy_mix() {
    let hybrid = EnsembleFusion::from_settings(&RetrievalSettings::default());
    assert!((hybrid.weight(StrategyKind::MultiQueryMmr) - 0.7).abs() < 1e-6);
    assert!((hybrid.weight(StrategyKind::Similarity) - 0.3).abs() < 1e-6);
    assert_eq!(hybrid.weight(StrategyKind::Keyword), 0.0);

    let mmr_only = EnsembleFusion::from_settings(&RetrievalSettings { hybrid: false, ..RetrievalSettings::default() });
    assert_eq!(mmr_only.weights().len(), 1);
    assert_eq!(mmr_only.weight(StrategyKind::Similarity), 0.0);
}
