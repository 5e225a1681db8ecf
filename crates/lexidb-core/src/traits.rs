use async_trait::async_trait;

use crate::error::Result;
use crate::types::ChatMessage;

/// Fixed, deterministic tokenizer used to bound chunk sizes.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
    fn decode(&self, ids: &[u32]) -> Result<String>;
}

/// Maps texts to fixed-dimension vectors, same length and order as the input.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `openai:text-embedding-3-small`).
    fn id(&self) -> &str;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Text-completion collaborator used for query expansion and answer synthesis.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, system: &str, messages: &[ChatMessage]) -> Result<String>;
}
