//! lexidb-hybrid
//!
//! Query-time composition of the retrieval core: query expansion, the
//! similarity / multi-query MMR / keyword strategies, weighted ensemble fusion,
//! the batched ingestion pipeline and the `RetrievalService` that owns the
//! live knowledge base.

pub mod expander;
pub mod external;
pub mod fusion;
pub mod ingest;
pub mod service;
pub mod strategies;

pub use expander::QueryExpander;
pub use fusion::EnsembleFusion;
pub use ingest::{IngestOptions, IngestReport, IngestionPipeline, SkippedBatch};
pub use service::{format_context, Answer, IndexStatus, KnowledgeBase, RetrievalService, RetrieverInfo};
pub use strategies::{KeywordStrategy, MmrParams, MultiQueryMmrStrategy, SimilarityStrategy};
