use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lexidb_core::chunker::CharTokenizer;
use lexidb_core::config::Settings;
use lexidb_core::error::{Error, Result};
use lexidb_core::traits::{Embedder, Generator};
use lexidb_core::types::{ChatMessage, Document, FragmentRecord};
use lexidb_embed::FakeEmbedder;
use lexidb_hybrid::service::NO_RELEVANT_INFORMATION;
use lexidb_hybrid::{format_context, RetrievalService};
use lexidb_vector::IndexStore;

struct CountingEmbedder {
    inner: FakeEmbedder,
    calls: AtomicUsize,
}

impl CountingEmbedder {
    fn new() -> Arc<Self> { Arc::new(Self { inner: FakeEmbedder::new(256), calls: AtomicUsize::new(0) }) }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn id(&self) -> &str { self.inner.id() }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // widen the window for racing initializers
        tokio::task::yield_now().await;
        self.inner.embed(texts).await
    }
}

struct Scripted(Option<&'static str>);

#[async_trait]
impl Generator for Scripted {
    async fn complete(&self, _system: &str, messages: &[ChatMessage]) -> Result<String> {
        match self.0 {
            Some(reply) if messages[0].content.starts_with("CONTEXTO") => Ok(format!("{reply} ({} chars of context)", messages[0].content.len())),
            Some(_) => Ok("guata significado\ncaminar en guaraní".to_string()),
            None => Err(Error::GenerationService("offline".into())),
        }
    }
}

fn write_corpus(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("a.txt"), "guata caminar andar a pie").unwrap();
    std::fs::write(dir.join("b.txt"), "pira pescado del río").unwrap();
    std::fs::write(dir.join("c.txt"), "jagua perro animal doméstico").unwrap();
    std::fs::write(dir.join("d.txt"), "mba'e cosa objeto\u{c}segunda página del objeto").unwrap();
}

fn settings(docs: &Path) -> Settings {
    let mut s = Settings::default();
    s.data.documents_dir = docs.to_string_lossy().to_string();
    s.chunking.max_tokens = 200;
    s.chunking.overlap_tokens = 20;
    s.ingest.batch_size = 2;
    s.ingest.concurrency = 2;
    s.ingest.show_progress = false;
    s.retrieval.k = 3;
    s.retrieval.fetch_k = 4;
    s.retrieval.n_expansions = 2;
    s
}

fn service(settings: Settings, store_dir: &Path, embedder: Arc<dyn Embedder>, generator: Scripted) -> RetrievalService {
    RetrievalService::new(settings, Arc::new(CharTokenizer), embedder, Arc::new(generator), IndexStore::new(store_dir)).unwrap()
}

#[tokio::test]
async fn concurrent_first_access_initializes_once() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("docs");
    write_corpus(&docs);
    let embedder = CountingEmbedder::new();
    let svc = Arc::new(service(settings(&docs), &tmp.path().join("store"), embedder.clone(), Scripted(Some("ok"))));

    let tasks: Vec<_> = (0..8).map(|_| { let svc = Arc::clone(&svc); tokio::spawn(async move { svc.ensure_ready().await }) }).collect();
    for t in tasks { t.await.unwrap().unwrap(); }

    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2, "4 chunks in batches of 2, embedded exactly once");
    assert_eq!(svc.snapshot().index.len(), 4);
    let status = svc.status().await.unwrap();
    assert_eq!(status.entries, 4);
    assert_eq!(status.dim, Some(256));
    assert!(status.built_at.is_some());
}

#[tokio::test]
async fn persisted_index_is_reused_by_a_new_service() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("docs");
    write_corpus(&docs);
    let store = tmp.path().join("store");
    service(settings(&docs), &store, CountingEmbedder::new(), Scripted(Some("ok"))).ensure_ready().await.unwrap();

    let embedder = CountingEmbedder::new();
    let mut s = settings(&tmp.path().join("missing"));
    s.ingest.auto_ingest = false;
    let reloaded = service(s, &store, embedder.clone(), Scripted(Some("ok")));
    reloaded.ensure_ready().await.unwrap();
    assert_eq!(reloaded.snapshot().index.len(), 4);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn context_is_ranked_and_carries_metadata() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("docs");
    write_corpus(&docs);
    let svc = service(settings(&docs), &tmp.path().join("store"), CountingEmbedder::new(), Scripted(Some("ok")));

    let fragments = svc.answerable_context("guata caminar").await.unwrap();
    assert!(!fragments.is_empty() && fragments.len() <= 3);
    assert_eq!(fragments[0].source, "a.txt");
    assert_eq!(fragments[0].page, Some(1));
    let ranks: Vec<usize> = fragments.iter().map(|f| f.rank).collect();
    assert_eq!(ranks, (1..=fragments.len()).collect::<Vec<_>>());
}

#[tokio::test]
async fn generator_outage_degrades_instead_of_failing() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("docs");
    write_corpus(&docs);
    let svc = service(settings(&docs), &tmp.path().join("store"), CountingEmbedder::new(), Scripted(None));
    let fragments = svc.answerable_context("pira pescado").await.unwrap();
    assert_eq!(fragments.first().map(|f| f.source.as_str()), Some("b.txt"));
}

#[tokio::test]
async fn empty_corpus_yields_no_fragments() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    let svc = service(settings(&docs), &tmp.path().join("store"), CountingEmbedder::new(), Scripted(Some("ok")))
        .with_answerer(Arc::new(Scripted(Some("respuesta"))));

    assert!(svc.answerable_context("¿qué es guata?").await.unwrap().is_empty());
    let report = svc.rebuild_index(&[]).await.unwrap();
    assert_eq!(report.inserted, 0);
    let answer = svc.answer("¿qué es guata?").await.unwrap();
    assert_eq!(answer.text, NO_RELEVANT_INFORMATION);
    assert!(answer.fragments.is_empty());
}

#[tokio::test]
async fn rebuild_swaps_in_the_new_index() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("docs");
    write_corpus(&docs);
    let store = tmp.path().join("store");
    let svc = service(settings(&docs), &store, CountingEmbedder::new(), Scripted(Some("ok")));
    svc.ensure_ready().await.unwrap();
    let before = svc.snapshot();

    let report = svc.rebuild_index(&[Document::single_page("nuevo.txt", "ka'aguy bosque selva")]).await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(before.index.len(), 4, "earlier snapshots stay intact");
    assert_eq!(svc.snapshot().index.len(), 1);
    assert_eq!(IndexStore::new(&store).load().await.unwrap().unwrap().len(), 1);
    let fragments = svc.answerable_context("bosque").await.unwrap();
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0].source, "nuevo.txt");
}

#[tokio::test]
async fn rebuild_before_first_access_counts_as_initialization() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("docs");
    write_corpus(&docs);
    let embedder = CountingEmbedder::new();
    let svc = service(settings(&docs), &tmp.path().join("store"), embedder.clone(), Scripted(Some("ok")));

    svc.rebuild_index(&[Document::single_page("nuevo.txt", "ka'aguy bosque selva")]).await.unwrap();
    svc.ensure_ready().await.unwrap();
    assert_eq!(svc.snapshot().index.len(), 1, "auto-ingest of the documents directory is skipped");
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

    // a second rebuild after initialization is a plain swap
    svc.rebuild_index(&[Document::single_page("otro.txt", "y agua")]).await.unwrap();
    assert_eq!(svc.snapshot().index.meta(0).unwrap().source, "otro.txt");
}

#[tokio::test]
async fn answer_passes_context_to_the_generator() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("docs");
    write_corpus(&docs);
    let svc = service(settings(&docs), &tmp.path().join("store"), CountingEmbedder::new(), Scripted(Some("ok")))
        .with_answerer(Arc::new(Scripted(Some("Guata significa caminar"))));
    let answer = svc.answer("guata caminar").await.unwrap();
    assert!(answer.text.starts_with("Guata significa caminar"));
    assert!(!answer.fragments.is_empty());
}

#[tokio::test]
async fn keyword_strategy_joins_when_weighted() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("docs");
    write_corpus(&docs);
    let mut s = settings(&docs);
    s.retrieval.keyword_weight = 0.5;
    let svc = service(s, &tmp.path().join("store"), CountingEmbedder::new(), Scripted(Some("ok")));
    let fragments = svc.answerable_context("doméstico").await.unwrap();
    assert!(fragments.iter().any(|f| f.source == "c.txt"));
    assert!(svc.status().await.unwrap().keyword_index);
    assert!(svc.retriever_info().strategy.contains("Keyword"));
}

#[test]
fn retriever_info_reflects_settings() {
    let tmp = tempfile::tempdir().unwrap();
    let mut s = settings(tmp.path());
    s.retrieval.hybrid = false;
    let info = service(s, &tmp.path().join("store"), CountingEmbedder::new(), Scripted(None)).retriever_info();
    assert_eq!(info.strategy, "MMR + MultiQuery");
    assert_eq!((info.k, info.fetch_k), (3, 4));
    assert!(info.similarity_threshold.is_none());
}

#[test]
fn invalid_settings_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let mut s = settings(tmp.path());
    s.retrieval.fetch_k = 1;
    let res = RetrievalService::new(s, Arc::new(CharTokenizer), CountingEmbedder::new(), Arc::new(Scripted(None)), IndexStore::new(tmp.path()));
    assert!(matches!(res, Err(Error::Config(_))));
}

#[test]
fn context_block_format() {
    let records = vec![
        FragmentRecord { rank: 1, source: "dic.pdf".into(), page: Some(12), text: "  guata: caminar \n".into() },
        FragmentRecord { rank: 2, source: "notas.txt".into(), page: None, text: "jagua".into() },
    ];
    assert_eq!(
        format_context(&records),
        "[Fragment 1] - Source: dic.pdf - Page: 12\nguata: caminar\n\n[Fragment 2] - Source: notas.txt\njagua"
    );
}
