use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Embedding service failed: {0}")]
    EmbeddingService(String),

    #[error("Generation service failed: {0}")]
    GenerationService(String),

    #[error("Vector dimension mismatch: index holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    #[error("Index holds no entries")]
    EmptyIndex,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// External-service failures may be retried or degraded to an empty result.
    /// Everything else is either caller misuse or a data-integrity problem.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::EmbeddingService(_) | Self::GenerationService(_))
    }

    pub fn storage<E: std::fmt::Display>(e: E) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
