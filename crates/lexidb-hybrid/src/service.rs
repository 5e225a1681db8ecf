//! The retrieval core's public call surface.
//!
//! `RetrievalService` owns the live knowledge base behind a copy-on-swap
//! `RwLock<Arc<_>>`: queries clone the `Arc` and release the lock before any
//! await, rebuilds construct a fresh base and swap it in. Initialization runs
//! at most once per service through a `OnceCell`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, OnceCell, SetError};
use tracing::{debug, info, warn};

use lexidb_core::chunker::Chunker;
use lexidb_core::config::{expand_path, Settings};
use lexidb_core::documents::load_documents;
use lexidb_core::error::{Error, Result};
use lexidb_core::traits::{Embedder, Generator, Tokenizer};
use lexidb_core::types::{ChatMessage, Document, FragmentRecord, RetrievalResult, StrategyKind};
use lexidb_text::KeywordIndex;
use lexidb_vector::{IndexStore, VectorIndex};

use crate::expander::QueryExpander;
use crate::external::{call_with_timeout, Service};
use crate::fusion::EnsembleFusion;
use crate::ingest::{IngestOptions, IngestReport, IngestionPipeline};
use crate::strategies::{KeywordStrategy, MmrParams, MultiQueryMmrStrategy, SimilarityStrategy};

pub const NO_RELEVANT_INFORMATION: &str = "No se encontró información relevante en los documentos.";

const ANSWER_INSTRUCTIONS: &str = "Eres un asistente experto en lengua guaraní (traducción, gramática y cultura). \
Responde ÚNICAMENTE con base en los fragmentos del diccionario y la gramática que siguen. Si es una traducción, \
da el término en guaraní y su uso cuando el texto lo muestre; si es una duda gramatical, explica la regla citando \
los ejemplos disponibles. Si la información no está en los fragmentos, dilo claramente.";

/// A vector index plus the keyword index derived from it.
pub struct KnowledgeBase {
    pub index: VectorIndex,
    pub keywords: Option<KeywordIndex>,
}

impl KnowledgeBase {
    pub fn new(index: VectorIndex, with_keywords: bool) -> Result<Self> {
        let keywords = if with_keywords {
            Some(KeywordIndex::build(index.metas().iter().enumerate().map(|(id, m)| (id, m.text.as_str())))?)
        } else {
            None
        };
        Ok(Self { index, keywords })
    }

    pub fn empty() -> Self { Self { index: VectorIndex::new(), keywords: None } }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrieverInfo {
    pub strategy: String,
    pub k: usize,
    pub lambda_diversity: f32,
    pub fetch_k: usize,
    pub n_expansions: usize,
    /// Only meaningful when fusion runs.
    pub similarity_threshold: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    pub entries: usize,
    pub dim: Option<usize>,
    pub built_at: Option<String>,
    pub keyword_index: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub text: String,
    pub fragments: Vec<FragmentRecord>,
}

/// Render fragments as the context block handed to the answer generator.
pub fn format_context(records: &[FragmentRecord]) -> String {
    records
        .iter()
        .map(|r| {
            let mut header = format!("[Fragment {}] - Source: {}", r.rank, r.source);
            if let Some(page) = r.page { header.push_str(&format!(" - Page: {page}")); }
            format!("{header}\n{}", r.text.trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct RetrievalService {
    settings: Settings,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    similarity: SimilarityStrategy,
    mmr: MultiQueryMmrStrategy,
    fusion: EnsembleFusion,
    store: IndexStore,
    answerer: Option<Arc<dyn Generator>>,
    ready: OnceCell<()>,
    current: RwLock<Arc<KnowledgeBase>>,
    // serializes ingestion and persistence
    writer: Mutex<()>,
}

impl RetrievalService {
    /// `generator` paraphrases queries; attach an answer model with [`Self::with_answerer`].
    pub fn new(
        settings: Settings,
        tokenizer: Arc<dyn Tokenizer>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        store: IndexStore,
    ) -> Result<Self> {
        settings.validate()?;
        let embed_timeout = settings.embedding.call_budget();
        let expander = QueryExpander::new(generator, settings.generation.call_budget());
        Ok(Self {
            similarity: SimilarityStrategy::new(Arc::clone(&embedder), embed_timeout),
            mmr: MultiQueryMmrStrategy::new(Arc::clone(&embedder), expander, embed_timeout),
            fusion: EnsembleFusion::from_settings(&settings.retrieval),
            chunker: Chunker::new(tokenizer),
            embedder,
            store,
            answerer: None,
            ready: OnceCell::new(),
            current: RwLock::new(Arc::new(KnowledgeBase::empty())),
            writer: Mutex::new(()),
            settings,
        })
    }

    #[must_use]
    pub fn with_answerer(mut self, generator: Arc<dyn Generator>) -> Self {
        self.answerer = Some(generator);
        self
    }

    pub fn settings(&self) -> &Settings { &self.settings }

    fn keywords_enabled(&self) -> bool {
        let r = &self.settings.retrieval;
        r.hybrid && r.keyword_weight > 0.0
    }

    /// Current knowledge base; the lock is released before this returns.
    pub fn snapshot(&self) -> Arc<KnowledgeBase> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn install(&self, kb: KnowledgeBase) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(kb);
    }

    /// Load the persisted index, or build it from `data.documents_dir` when
    /// none exists and auto-ingest is on. Runs at most once; concurrent
    /// callers wait for and share the single initialization.
    pub async fn ensure_ready(&self) -> Result<()> {
        self.ready.get_or_try_init(|| self.initialize()).await.map(|_| ())
    }

    async fn initialize(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        if let Some(index) = self.store.load().await? {
            info!(entries = index.len(), dir = %self.store.dir().display(), "index loaded");
            self.install(KnowledgeBase::new(index, self.keywords_enabled())?);
            return Ok(());
        }
        let docs_dir = expand_path(&self.settings.data.documents_dir);
        if !self.settings.ingest.auto_ingest || !docs_dir.is_dir() {
            info!(dir = %docs_dir.display(), "no persisted index and nothing to ingest, starting empty");
            return Ok(());
        }
        info!(dir = %docs_dir.display(), "no persisted index, ingesting documents");
        let documents = read_documents(docs_dir).await?;
        self.rebuild_locked(&documents).await?;
        Ok(())
    }

    /// Ingest `documents` into a fresh index, persist it and swap it in.
    pub async fn rebuild_index(&self, documents: &[Document]) -> Result<IngestReport> {
        let report = {
            let _writer = self.writer.lock().await;
            self.rebuild_locked(documents).await?
        };
        // a later ensure_ready must not replace the fresh index
        match self.ready.set(()) {
            Ok(()) => debug!("rebuild completed initialization"),
            // already initialized (or initializing, which holds the writer lock we just released)
            Err(SetError::AlreadyInitializedError(())) | Err(SetError::InitializingError(())) => {}
        }
        Ok(report)
    }

    /// [`Self::rebuild_index`] over the loadable files of `dir`.
    pub async fn rebuild_from_dir(&self, dir: PathBuf) -> Result<IngestReport> {
        let documents = read_documents(dir).await?;
        self.rebuild_index(&documents).await
    }

    async fn rebuild_locked(&self, documents: &[Document]) -> Result<IngestReport> {
        let pipeline = IngestionPipeline::new(self.chunker.clone(), Arc::clone(&self.embedder), self.settings.embedding.call_budget());
        let mut index = VectorIndex::new();
        let report = pipeline.ingest(&mut index, documents, &IngestOptions::from(&self.settings)).await?;
        self.store.save(&index).await?;
        self.install(KnowledgeBase::new(index, self.keywords_enabled())?);
        Ok(report)
    }

    fn degrade(results: &mut BTreeMap<StrategyKind, RetrievalResult>, strategy: StrategyKind, outcome: Result<RetrievalResult>) -> Result<()> {
        match outcome {
            Ok(hits) => { results.insert(strategy, hits); }
            Err(e) if e.is_recoverable() => {
                warn!(%strategy, error = %e, "strategy failed, continuing without it");
                results.insert(strategy, Vec::new());
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Ranked, deduplicated fragments for `question`. An empty list means
    /// nothing relevant was found; external-service failures degrade to it.
    pub async fn answerable_context(&self, question: &str) -> Result<Vec<FragmentRecord>> {
        self.ensure_ready().await?;
        let kb = self.snapshot();
        if kb.index.is_empty() { return Ok(Vec::new()); }
        let r = &self.settings.retrieval;
        let params = MmrParams { k: r.k, fetch_k: r.fetch_k, lambda_diversity: r.lambda_diversity, n_expansions: r.n_expansions };

        let mmr = self.mmr.retrieve(&kb.index, question, params);
        let similarity = async {
            if r.hybrid { Some(self.similarity.retrieve(&kb.index, question, r.k).await) } else { None }
        };
        let (mmr, similarity) = tokio::join!(mmr, similarity);

        let mut results = BTreeMap::new();
        Self::degrade(&mut results, StrategyKind::MultiQueryMmr, mmr)?;
        if let Some(outcome) = similarity { Self::degrade(&mut results, StrategyKind::Similarity, outcome)?; }
        if let Some(keywords) = kb.keywords.as_ref().filter(|_| self.keywords_enabled()) {
            results.insert(StrategyKind::Keyword, KeywordStrategy::retrieve(&kb.index, keywords, question, r.k)?);
        }

        let fused = self.fusion.fuse(&results, r.k);
        debug!(question, fragments = fused.len(), "retrieved context");
        Ok(fused
            .into_iter()
            .enumerate()
            .map(|(i, e)| FragmentRecord { rank: i + 1, source: e.meta.source, page: e.meta.page, text: e.meta.text })
            .collect())
    }

    /// Retrieve context and ask the answer generator about it.
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let generator = self.answerer.as_ref().ok_or_else(|| Error::Config("no answer generator configured".into()))?;
        let fragments = self.answerable_context(question).await?;
        if fragments.is_empty() {
            return Ok(Answer { text: NO_RELEVANT_INFORMATION.to_string(), fragments });
        }
        let prompt = format!("CONTEXTO:\n{}\n\nPREGUNTA: {question}", format_context(&fragments));
        let timeout: Duration = self.settings.generation.call_budget();
        let text = call_with_timeout(Service::Generation, timeout, generator.complete(ANSWER_INSTRUCTIONS, &[ChatMessage::user(prompt)])).await?;
        Ok(Answer { text, fragments })
    }

    pub fn retriever_info(&self) -> RetrieverInfo {
        let r = &self.settings.retrieval;
        let mut strategy = "MMR + MultiQuery".to_string();
        if r.hybrid { strategy.push_str(" + Similarity"); }
        if self.keywords_enabled() { strategy.push_str(" + Keyword"); }
        RetrieverInfo {
            strategy,
            k: r.k,
            lambda_diversity: r.lambda_diversity,
            fetch_k: r.fetch_k,
            n_expansions: r.n_expansions,
            similarity_threshold: r.hybrid.then_some(r.similarity_threshold),
        }
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        let meta = self.store.read_meta().await?;
        let kb = self.snapshot();
        let (entries, dim) = match (&meta, self.ready.initialized()) {
            (_, true) | (None, false) => (kb.index.len(), kb.index.dim()),
            (Some(m), false) => (m.entries, m.dim),
        };
        Ok(IndexStatus { entries, dim, built_at: meta.map(|m| m.built_at), keyword_index: kb.keywords.is_some() })
    }
}

async fn read_documents(dir: PathBuf) -> Result<Vec<Document>> {
    tokio::task::spawn_blocking(move || load_documents(&dir))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(format!("document loading task failed: {e}"))))?
}
