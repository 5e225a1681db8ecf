use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, TantivyDocument};
use tracing::debug;

use lexidb_core::error::{Error, Result};
use lexidb_core::types::EntryId;

use crate::analyzer::{build_schema, register_analyzer};

/// In-memory BM25 index keyed by vector index entry id.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    id_field: Field,
    text_field: Field,
    len: usize,
}

impl KeywordIndex {
    pub fn build<'a>(entries: impl IntoIterator<Item = (EntryId, &'a str)>) -> Result<Self> {
        let schema = build_schema();
        let index = Index::create_in_ram(schema.clone());
        register_analyzer(&index);
        let id_field = schema.get_field("id").map_err(Error::storage)?;
        let text_field = schema.get_field("text").map_err(Error::storage)?;

        let mut writer: IndexWriter = index.writer_with_num_threads(1, 20_000_000).map_err(Error::storage)?;
        let mut len = 0usize;
        for (id, text) in entries {
            let id = u64::try_from(id).map_err(|_| Error::InvalidParameter(format!("entry id {id} out of range")))?;
            writer.add_document(doc!(id_field => id, text_field => text)).map_err(Error::storage)?;
            len += 1;
        }
        writer.commit().map_err(Error::storage)?;
        let reader = index.reader().map_err(Error::storage)?;
        debug!(entries = len, "keyword index built");
        Ok(Self { index, reader, id_field, text_field, len })
    }

    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Top `k` entries by BM25, best first; equal scores go to the lower id.
    /// Syntax errors in `query` are tolerated rather than reported.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<(EntryId, f32)>> {
        if k == 0 || self.is_empty() || query.trim().is_empty() { return Ok(Vec::new()); }
        let parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let (parsed, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() { debug!(count = errors.len(), "lenient query parse dropped clauses"); }
        let searcher = self.reader.searcher();
        let top = searcher.search(&parsed, &TopDocs::with_limit(k)).map_err(Error::storage)?;
        let mut hits = Vec::with_capacity(top.len());
        for (score, addr) in top {
            let doc: TantivyDocument = searcher.doc(addr).map_err(Error::storage)?;
            let Some(id) = doc.get_first(self.id_field).and_then(|v| v.as_u64()) else { continue };
            let id = usize::try_from(id).map_err(|_| Error::CorruptIndex(format!("keyword id {id} out of range")))?;
            hits.push((id, score));
        }
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(hits)
    }
}
