//! Local BGE-M3 embeddings through candle (`local-model` feature).
//!
//! Model directory resolution: `APP_MODEL_DIR`, then `MODEL_DIR`, then
//! `models/bge-m3`. The directory must hold `tokenizer.json`, `config.json`
//! and `pytorch_model.bin`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tracing::info;

use lexidb_core::error::{Error, Result};
use lexidb_core::traits::Embedder;

const MAX_LEN: usize = 256;

pub fn select_device() -> Device {
    #[cfg(feature = "metal")]
    {
        if let Ok(dev) = Device::new_metal(0) { info!("device: Metal (MPS)"); return dev; }
    }
    info!("device: CPU");
    Device::Cpu
}

pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
    let hidden_dim = hidden.dims3()?.2;
    let mask = attention_mask.to_device(hidden.device())?.to_dtype(hidden.dtype())?;
    let mask_3d = mask.unsqueeze(2)?;
    let mask_broadcast = match mask_3d.broadcast_as(hidden.shape()) {
        Ok(m) => m,
        Err(_) => mask_3d.repeat((1, 1, hidden_dim))?,
    };
    let sum = (hidden * &mask_broadcast)?.sum(1)?;
    let lengths = mask.sum(1)?.unsqueeze(1)?.to_dtype(sum.dtype())?;
    let mean = sum.broadcast_div(&lengths)?;
    let eps_val = match hidden.dtype() { DType::F16 => 1e-6f32, _ => 1e-12f32 };
    let eps = Tensor::new(&[eps_val], hidden.device())?.to_dtype(hidden.dtype())?.unsqueeze(0)?;
    let norm = mean.sqr()?.sum_keepdim(1)?.sqrt()?.broadcast_add(&eps)?;
    mean.broadcast_div(&norm)
}

struct Inner {
    model: XLMRobertaModel,
    tokenizer: tokenizers::Tokenizer,
    device: Device,
}

impl Inner {
    fn tokenize(&self, text: &str) -> Result<(Tensor, Tensor)> {
        let enc = self.tokenizer.encode(text, true).map_err(|e| Error::EmbeddingService(format!("Tokenization failed: {e}")))?;
        let mut ids = enc.get_ids().to_vec();
        let mut mask = enc.get_attention_mask().to_vec();
        ids.resize(MAX_LEN, 1);
        mask.resize(MAX_LEN, 0);
        let input_ids = Tensor::from_iter(ids, &self.device).and_then(|t| t.reshape((1, MAX_LEN))).map_err(model_err)?;
        let attention_mask = Tensor::from_iter(mask, &self.device).and_then(|t| t.reshape((1, MAX_LEN))).map_err(model_err)?;
        Ok((input_ids, attention_mask))
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let (input_ids, attention_mask) = self.tokenize(text)?;
        let token_type_ids = Tensor::zeros((1, MAX_LEN), DType::I64, &self.device).map_err(model_err)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None).map_err(model_err)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask).map_err(model_err)?;
        pooled.to_device(&Device::Cpu).and_then(|t| t.squeeze(0)).and_then(|t| t.to_vec1()).map_err(model_err)
    }
}

fn model_err(e: candle_core::Error) -> Error {
    Error::EmbeddingService(format!("BGE-M3 inference failed: {e}"))
}

pub struct BgeM3Embedder {
    inner: Arc<Inner>,
}

impl BgeM3Embedder {
    pub fn new() -> Result<Self> {
        let device = select_device();
        let model_dir = resolve_model_dir()?;
        info!(dir = %model_dir.display(), "loading BGE-M3 model");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::Config(format!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e)))?;
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(model_dir.join("config.json"))?)
            .map_err(|e| Error::Config(format!("invalid model config: {e}")))?;
        let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin")).map_err(model_err)?;
        let weights_map: HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb).map_err(model_err)?;
        info!("BGE-M3 model loaded");
        Ok(Self { inner: Arc::new(Inner { model, tokenizer, device }) })
    }
}

#[async_trait]
impl Embedder for BgeM3Embedder {
    fn id(&self) -> &str { "local:bge-m3:d1024" }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inner = Arc::clone(&self.inner);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || texts.iter().map(|t| inner.embed_text(t)).collect())
            .await
            .map_err(|e| Error::EmbeddingService(format!("embedding task failed: {e}")))?
    }
}

fn resolve_model_dir() -> Result<PathBuf> {
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            let p = PathBuf::from(&dir);
            if p.exists() { return Ok(p); }
        }
    }
    let local = Path::new("models/bge-m3");
    if local.exists() { return Ok(local.to_path_buf()); }
    Err(Error::Config("Could not locate BGE-M3 model directory".into()))
}
