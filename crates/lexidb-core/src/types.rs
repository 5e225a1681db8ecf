//! Domain types shared by the chunker, the vector index and the retrieval strategies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Positional id assigned by the vector index at insertion time.
pub type EntryId = usize;

/// A source document as delivered by the document loader.
///
/// `source` is the file name and the identity of the document; `pages` keeps the
/// extracted text of every page in order, empty for pages without text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub source: String,
    pub pages: Vec<String>,
}

impl Document {
    pub fn new(source: impl Into<String>, pages: Vec<String>) -> Self {
        Self { source: source.into(), pages }
    }

    pub fn single_page(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(source, vec![text.into()])
    }
}

/// A token-bounded fragment of a document.
///
/// - `chunk_index`: position within the parent document, starting at 0
/// - `page`: 1-based page holding the first token of the chunk
/// - `tokens`: token span of the chunk within the document's token stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub source: String,
    pub chunk_index: usize,
    pub page: Option<u32>,
    pub tokens: Range<usize>,
}

impl Chunk {
    pub fn meta(&self) -> ChunkMeta {
        ChunkMeta { source: self.source.clone(), chunk_index: self.chunk_index, page: self.page, text: self.text.clone() }
    }
}

/// Metadata stored next to every vector in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub source: String,
    pub chunk_index: usize,
    pub page: Option<u32>,
    pub text: String,
}

/// Identifies the retrieval strategy that produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    MultiQueryMmr,
    Similarity,
    Keyword,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MultiQueryMmr => "multi_query_mmr",
            Self::Similarity => "similarity",
            Self::Keyword => "keyword",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scored entry of a retrieval result.
///
/// `score` is strategy-specific but higher is always better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: EntryId,
    pub score: f32,
    pub strategy: StrategyKind,
    pub meta: ChunkMeta,
}

pub type RetrievalResult = Vec<SearchHit>;

/// Relative contribution of a strategy to the fused ranking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeight {
    pub strategy: StrategyKind,
    pub weight: f32,
}

/// A fused entry, ready to be ranked.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedEntry {
    pub id: EntryId,
    pub score: f32,
    pub meta: ChunkMeta,
}

/// Fragment handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentRecord {
    pub rank: usize,
    pub source: String,
    pub page: Option<u32>,
    pub text: String,
}

/// Chat message passed to a text-generation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}
