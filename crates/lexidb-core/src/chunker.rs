//! Token-window chunking.
//!
//! Text is tokenized into one linear stream and cut into windows of
//! `max_tokens` that advance by `max_tokens - overlap_tokens`. Every window
//! start below the stream length emits a chunk, so trailing windows may be
//! shorter than the overlap. Windows holding only whitespace are dropped.

use std::ops::Range;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::traits::Tokenizer;
use crate::types::{Chunk, Document};

const PAGE_SEPARATOR: &str = "\n";

/// One token per Unicode scalar value. Round-trips any text exactly; used when
/// no tokenizer file is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.chars().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        ids.iter()
            .map(|&id| char::from_u32(id).ok_or_else(|| Error::InvalidParameter(format!("token {id} is not a scalar value"))))
            .collect()
    }
}

/// Token ranges of consecutive windows over a stream of `len` tokens.
pub fn windows(len: usize, max_tokens: usize, overlap_tokens: usize) -> Result<Vec<Range<usize>>> {
    validate(max_tokens, overlap_tokens)?;
    let step = max_tokens - overlap_tokens;
    let mut out = Vec::new();
    let mut start = 0usize;
    while start < len {
        out.push(start..(start + max_tokens).min(len));
        start += step;
    }
    Ok(out)
}

fn validate(max_tokens: usize, overlap_tokens: usize) -> Result<()> {
    if max_tokens == 0 { return Err(Error::Config("max_tokens must be > 0".into())); }
    if overlap_tokens >= max_tokens {
        return Err(Error::Config(format!("overlap_tokens ({overlap_tokens}) must be < max_tokens ({max_tokens})")));
    }
    Ok(())
}

#[derive(Clone)]
pub struct Chunker {
    tokenizer: Arc<dyn Tokenizer>,
}

impl Chunker {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self { Self { tokenizer } }

    /// Chunk a bare text. Chunks carry no source and no page.
    pub fn chunk(&self, text: &str, max_tokens: usize, overlap_tokens: usize) -> Result<Vec<Chunk>> {
        validate(max_tokens, overlap_tokens)?;
        let ids = self.tokenizer.encode(text)?;
        self.cut(&ids, &[], "", max_tokens, overlap_tokens)
    }

    /// Chunk a whole document. Pages are tokenized in order into a single stream
    /// (a newline separates pages) and each chunk is tagged with the 1-based page
    /// holding its first token.
    pub fn chunk_document(&self, doc: &Document, max_tokens: usize, overlap_tokens: usize) -> Result<Vec<Chunk>> {
        validate(max_tokens, overlap_tokens)?;
        let mut ids = Vec::new();
        let mut page_starts = Vec::with_capacity(doc.pages.len());
        let last = doc.pages.len().saturating_sub(1);
        for (i, page) in doc.pages.iter().enumerate() {
            page_starts.push(ids.len());
            ids.extend(self.tokenizer.encode(page)?);
            if i < last { ids.extend(self.tokenizer.encode(PAGE_SEPARATOR)?); }
        }
        self.cut(&ids, &page_starts, &doc.source, max_tokens, overlap_tokens)
    }

    fn cut(&self, ids: &[u32], page_starts: &[usize], source: &str, max_tokens: usize, overlap_tokens: usize) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for range in windows(ids.len(), max_tokens, overlap_tokens)? {
            let text = self.tokenizer.decode(&ids[range.clone()])?;
            if text.trim().is_empty() { continue; }
            let chunk_index = chunks.len();
            let page = if page_starts.is_empty() {
                None
            } else {
                // number of pages starting at or before the chunk start
                u32::try_from(page_starts.partition_point(|&s| s <= range.start)).ok()
            };
            chunks.push(Chunk { text, source: source.to_string(), chunk_index, page, tokens: range });
        }
        Ok(chunks)
    }
}
