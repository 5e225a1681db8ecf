//! lexidb-text: BM25 keyword search over index entries, backed by Tantivy.

pub mod analyzer;
pub mod keyword;

pub use keyword::KeywordIndex;
