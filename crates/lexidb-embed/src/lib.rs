//! lexidb-embed
//!
//! Model providers for the retrieval core: tokenizers used by the chunker,
//! embedders (OpenAI-compatible, deterministic fake, optional local BGE-M3)
//! and the chat-completion generator.

pub mod fake;
pub mod openai;
pub mod tokenize;
#[cfg(feature = "local-model")]
pub mod bge;

use std::sync::Arc;

use lexidb_core::config::{EmbeddingProvider, EmbeddingSettings, GenerationSettings};
use lexidb_core::error::Result;
use lexidb_core::traits::{Embedder, Generator};
use tracing::info;

pub use fake::FakeEmbedder;
pub use openai::{OpenAiChat, OpenAiEmbedder};
pub use tokenize::{get_default_tokenizer, HfTokenizer};

fn fake_forced() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Embedder selected by `embedding.provider`; `APP_USE_FAKE_EMBEDDINGS=1` forces the fake one.
pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    let provider = if fake_forced() { EmbeddingProvider::Fake } else { settings.provider };
    match provider {
        EmbeddingProvider::Fake => {
            info!(dim = settings.fake_dim, "using FakeEmbedder");
            Ok(Arc::new(FakeEmbedder::new(settings.fake_dim)))
        }
        EmbeddingProvider::Openai => {
            info!(model = %settings.model, "using OpenAI embeddings");
            Ok(Arc::new(OpenAiEmbedder::new(settings)?))
        }
        EmbeddingProvider::Local => local_embedder(),
    }
}

#[cfg(feature = "local-model")]
fn local_embedder() -> Result<Arc<dyn Embedder>> {
    Ok(Arc::new(bge::BgeM3Embedder::new()?))
}

#[cfg(not(feature = "local-model"))]
fn local_embedder() -> Result<Arc<dyn Embedder>> {
    Err(lexidb_core::error::Error::Config("embedding.provider = \"local\" requires the `local-model` feature".into()))
}

/// Chat generator for query expansion (`query_model`).
pub fn query_generator(settings: &GenerationSettings) -> Result<Arc<dyn Generator>> {
    Ok(Arc::new(OpenAiChat::new(settings, &settings.query_model)?))
}

/// Chat generator for answer synthesis (`answer_model`).
pub fn answer_generator(settings: &GenerationSettings) -> Result<Arc<dyn Generator>> {
    Ok(Arc::new(OpenAiChat::new(settings, &settings.answer_model)?))
}
