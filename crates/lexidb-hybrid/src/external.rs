use std::future::Future;
use std::time::Duration;

use lexidb_core::error::{Error, Result};
use lexidb_core::traits::Embedder;

#[derive(Debug, Clone, Copy)]
pub enum Service {
    Embedding,
    Generation,
}

impl Service {
    fn error(self, msg: String) -> Error {
        match self {
            Self::Embedding => Error::EmbeddingService(msg),
            Self::Generation => Error::GenerationService(msg),
        }
    }
}

/// Await an external call for at most `limit`; expiry maps to the service's error.
pub async fn call_with_timeout<T, F>(service: Service, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(service.error(format!("timed out after {}ms", limit.as_millis()))),
    }
}

/// Embed `texts`, bounded by `limit`, checking the reply has one vector per text.
pub async fn embed_bounded(embedder: &dyn Embedder, texts: &[String], limit: Duration) -> Result<Vec<Vec<f32>>> {
    let vectors = call_with_timeout(Service::Embedding, limit, embedder.embed(texts)).await?;
    if vectors.len() != texts.len() {
        return Err(Error::EmbeddingService(format!("{} returned {} vectors for {} texts", embedder.id(), vectors.len(), texts.len())));
    }
    Ok(vectors)
}
