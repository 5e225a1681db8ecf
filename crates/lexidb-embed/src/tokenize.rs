use std::path::Path;
use std::sync::Arc;

use lexidb_core::chunker::CharTokenizer;
use lexidb_core::config::{expand_path, ChunkingSettings};
use lexidb_core::error::{Error, Result};
use lexidb_core::traits::Tokenizer;
use tracing::info;

/// HuggingFace tokenizer loaded from a `tokenizer.json`.
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| Error::Config(format!("Failed to load tokenizer from {}: {}", path.display(), e)))?;
        Ok(Self { inner })
    }
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let enc = self.inner.encode(text, false).map_err(|e| Error::InvalidParameter(format!("Tokenization failed: {e}")))?;
        Ok(enc.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner.decode(ids, false).map_err(|e| Error::InvalidParameter(format!("Detokenization failed: {e}")))
    }
}

/// Tokenizer named by `chunking.tokenizer_path`, or the character tokenizer.
pub fn get_default_tokenizer(settings: &ChunkingSettings) -> Result<Arc<dyn Tokenizer>> {
    match settings.tokenizer_path.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(p) => {
            let path = expand_path(p);
            info!(path = %path.display(), "using HuggingFace tokenizer");
            Ok(Arc::new(HfTokenizer::from_file(&path)?))
        }
        None => {
            info!("no tokenizer configured, chunking by characters");
            Ok(Arc::new(CharTokenizer))
        }
    }
}
