//! Configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge `lexidb.toml` + `lexidb.<env>.toml` + `APP_*` env vars
//! (`__` separates nested keys, e.g. `APP_RETRIEVAL__K=4`). Every setting has a
//! default so an empty environment yields a working configuration.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Load `lexidb.toml` and the env-specific overlay from `dir`.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file(dir.join("lexidb.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("lexidb.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("lexidb.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("lexidb.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Ok(Self { figment })
    }

    /// Extract and validate the full settings tree.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self.figment.extract().map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub chunking: ChunkingSettings,
    pub ingest: IngestSettings,
    pub retrieval: RetrievalSettings,
    pub embedding: EmbeddingSettings,
    pub generation: GenerationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// Directory scanned for `.pdf`/`.txt` sources.
    pub documents_dir: String,
    /// Directory holding the persisted vector index.
    pub index_dir: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self { documents_dir: "docs".to_string(), index_dir: "vector_store".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    /// HuggingFace `tokenizer.json`; the character tokenizer is used when unset.
    pub tokenizer_path: Option<String>,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { max_tokens: 500, overlap_tokens: 50, tokenizer_path: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub batch_size: usize,
    /// Embedding batches allowed in flight at once.
    pub concurrency: usize,
    pub show_progress: bool,
    /// Ingest `data.documents_dir` on first start when no index is persisted.
    pub auto_ingest: bool,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self { batch_size: 50, concurrency: 4, show_progress: true, auto_ingest: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSimilarityKind {
    #[default]
    Jaccard,
    Overlap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub k: usize,
    pub fetch_k: usize,
    pub lambda_diversity: f32,
    pub n_expansions: usize,
    /// When false only the multi-query MMR strategy runs.
    pub hybrid: bool,
    pub mmr_weight: f32,
    pub similarity_weight: f32,
    /// Keyword (BM25) strategy is skipped while this is 0.
    pub keyword_weight: f32,
    pub similarity_threshold: f32,
    pub text_similarity: TextSimilarityKind,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            k: 8,
            fetch_k: 20,
            lambda_diversity: 0.7,
            n_expansions: 3,
            hybrid: true,
            mmr_weight: 0.7,
            similarity_weight: 0.3,
            keyword_weight: 0.0,
            similarity_threshold: 0.70,
            text_similarity: TextSimilarityKind::Jaccard,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    #[default]
    Openai,
    Fake,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub dimensions: Option<usize>,
    /// Dimension produced by the fake provider.
    pub fake_dim: usize,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Openai,
            model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            dimensions: None,
            fake_dim: 256,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl EmbeddingSettings {
    /// Per-request timeout of the HTTP client.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Outer bound on one logical call: every attempt plus the backoff between them.
    pub fn call_budget(&self) -> Duration {
        call_budget(self.timeout(), self.max_retries)
    }

    pub fn api_key(&self) -> Option<String> {
        self.api_key.clone().filter(|k| !k.trim().is_empty()).or_else(|| env::var("OPENAI_API_KEY").ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Model used to paraphrase queries.
    pub query_model: String,
    /// Model used to write the final answer.
    pub answer_model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            query_model: "gpt-4o-mini".to_string(),
            answer_model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            temperature: 0.0,
            timeout_secs: 60,
            max_retries: 3,
        }
    }
}

impl GenerationSettings {
    /// Per-request timeout of the HTTP client.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Outer bound on one logical call: every attempt plus the backoff between them.
    pub fn call_budget(&self) -> Duration {
        call_budget(self.timeout(), self.max_retries)
    }

    pub fn api_key(&self) -> Option<String> {
        self.api_key.clone().filter(|k| !k.trim().is_empty()).or_else(|| env::var("OPENAI_API_KEY").ok())
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.max_tokens == 0 { return Err(Error::Config("chunking.max_tokens must be > 0".into())); }
        if c.overlap_tokens >= c.max_tokens {
            return Err(Error::Config(format!("chunking.overlap_tokens ({}) must be < max_tokens ({})", c.overlap_tokens, c.max_tokens)));
        }
        if self.ingest.batch_size == 0 { return Err(Error::Config("ingest.batch_size must be > 0".into())); }
        if self.ingest.concurrency == 0 { return Err(Error::Config("ingest.concurrency must be > 0".into())); }
        let r = &self.retrieval;
        if r.k == 0 { return Err(Error::Config("retrieval.k must be > 0".into())); }
        if r.fetch_k < r.k { return Err(Error::Config(format!("retrieval.fetch_k ({}) must be >= k ({})", r.fetch_k, r.k))); }
        for (name, v) in [
            ("lambda_diversity", r.lambda_diversity),
            ("mmr_weight", r.mmr_weight),
            ("similarity_weight", r.similarity_weight),
            ("keyword_weight", r.keyword_weight),
            ("similarity_threshold", r.similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&v) { return Err(Error::Config(format!("retrieval.{name} must be within [0, 1], got {v}"))); }
        }
        Ok(())
    }
}

/// Sleep before retry number `attempt` (1-based): 1s, 2s, 4s, ... capped at 16s.
pub fn retry_backoff(attempt: usize) -> Duration {
    let capped = u32::try_from(attempt.min(5)).unwrap_or(5);
    Duration::from_millis(500 * (1 << capped))
}

fn call_budget(per_attempt: Duration, max_retries: usize) -> Duration {
    let attempts = max_retries.max(1);
    let backoff: Duration = (1..attempts).map(retry_backoff).sum();
    per_attempt * u32::try_from(attempts).unwrap_or(u32::MAX) + backoff
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
