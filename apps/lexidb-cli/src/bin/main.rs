//! lexidb: build and query the dictionary/grammar knowledge base.
//!
//! ```bash
//! lexidb ingest docs/              # rebuild the index from a directory
//! lexidb query "¿qué significa guata?"
//! lexidb ask "¿cómo se conjuga guata?"
//! lexidb status
//! ```
//!
//! Configuration comes from `lexidb.toml` and `APP_*` variables; set
//! `APP_USE_FAKE_EMBEDDINGS=1` to run without an embedding service.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use lexidb_core::config::{resolve_with_base, Config, Settings};
use lexidb_core::traits::Generator;
use lexidb_core::types::{ChatMessage, FragmentRecord};
use lexidb_embed::{answer_generator, get_default_embedder, get_default_tokenizer, query_generator};
use lexidb_hybrid::RetrievalService;
use lexidb_vector::IndexStore;

#[derive(Parser)]
#[command(name = "lexidb", version, about = "Hybrid retrieval over a dictionary and grammar corpus")]
struct Cli {
    /// Directory holding lexidb.toml (default: current directory)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rebuild the index from a documents directory
    Ingest {
        /// Defaults to data.documents_dir
        dir: Option<PathBuf>,
    },
    /// Print the ranked fragments retrieved for a question
    Query {
        question: String,
        /// Output fragments as JSON
        #[arg(long)]
        json: bool,
    },
    /// Answer a question from the retrieved fragments
    Ask { question: String },
    /// Show index size and retriever configuration
    Status,
}

/// Stands in for the query model when none can be built; expansion then
/// degrades to the original query.
struct NoGenerator(String);

#[async_trait]
impl Generator for NoGenerator {
    async fn complete(&self, _system: &str, _messages: &[ChatMessage]) -> lexidb_core::Result<String> {
        Err(lexidb_core::Error::GenerationService(self.0.clone()))
    }
}

fn build_service(settings: Settings, base: &std::path::Path) -> Result<RetrievalService> {
    let tokenizer = get_default_tokenizer(&settings.chunking).context("loading tokenizer")?;
    let embedder = get_default_embedder(&settings.embedding).context("building embedder")?;
    let generator: Arc<dyn Generator> = match query_generator(&settings.generation) {
        Ok(g) => g,
        Err(e) => {
            warn!(error = %e, "query expansion disabled");
            Arc::new(NoGenerator(e.to_string()))
        }
    };
    let store = IndexStore::new(resolve_with_base(base, &settings.data.index_dir));
    Ok(RetrievalService::new(settings, tokenizer, embedder, generator, store)?)
}

fn print_fragments(fragments: &[FragmentRecord]) {
    if fragments.is_empty() {
        println!("No relevant information found.");
        return;
    }
    for f in fragments {
        let page = f.page.map_or_else(|| "-".to_string(), |p| p.to_string());
        println!("#{} {} (page {})", f.rank, f.source, page);
        println!("{}\n", f.text.trim());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let base = match cli.config_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolving current directory")?,
    };
    let mut settings = Config::load_from(&base)?.settings().context("invalid configuration")?;
    let docs_default = resolve_with_base(&base, &settings.data.documents_dir);
    settings.data.documents_dir = docs_default.to_string_lossy().into_owned();
    let generation = settings.generation.clone();
    let service = build_service(settings, &base)?;

    match cli.command {
        Command::Ingest { dir } => {
            let dir = dir.unwrap_or(docs_default);
            println!("Ingesting from {}", dir.display());
            let report = service.rebuild_from_dir(dir).await?;
            println!("✅ Indexed {} of {} chunks from {} documents", report.inserted, report.chunks, report.documents);
            for s in &report.skipped {
                println!("⚠️  batch {} ({} chunks, starting in {}) skipped: {}", s.batch, s.chunks, s.first_source, s.error);
            }
        }
        Command::Query { question, json } => {
            let fragments = service.answerable_context(&question).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&fragments)?);
            } else {
                print_fragments(&fragments);
            }
        }
        Command::Ask { question } => {
            let answerer = answer_generator(&generation).context("answering needs a generation model")?;
            let answer = service.with_answerer(answerer).answer(&question).await?;
            println!("{}\n", answer.text);
            print_fragments(&answer.fragments);
        }
        Command::Status => {
            let status = service.status().await?;
            let info = service.retriever_info();
            println!("Index: {} entries, dim {}", status.entries, status.dim.map_or_else(|| "-".to_string(), |d| d.to_string()));
            if let Some(built) = &status.built_at { println!("Built at: {built}"); }
            println!("Retriever: {}", info.strategy);
            println!("k={} fetch_k={} lambda={} expansions={}", info.k, info.fetch_k, info.lambda_diversity, info.n_expansions);
            if let Some(t) = info.similarity_threshold { println!("Dedup threshold: {t}"); }
        }
    }
    Ok(())
}
