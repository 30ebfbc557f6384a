use crate::embeddings::{Embedder, DEFAULT_EMBEDDING_MODEL};
use crate::error::IngestError;
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::Tokenizer;
use tracing::{debug, info};

pub const DEFAULT_MODEL_DIR: &str = "models/all-MiniLM-L6-v2";
/// Longest token sequence the sentence-transformer was trained on.
const MAX_TOKENS: usize = 256;
const LOCAL_BATCH_SIZE: usize = 32;

#[derive(Deserialize)]
struct ModelShape {
    hidden_size: usize,
}

struct BertEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

/// Runs a BERT sentence-transformer in process on the CPU: mean pooling over
/// the attention mask, then L2 normalisation.
///
/// The model directory holds the files published with the model:
/// `config.json`, `tokenizer.json` and either `model.safetensors` or
/// `pytorch_model.bin`.
pub struct LocalBertEmbedder {
    encoder: Arc<BertEncoder>,
    model_name: String,
    dimensions: usize,
}

impl LocalBertEmbedder {
    pub fn load(model_dir: impl AsRef<Path>) -> Result<Self, IngestError> {
        let model_dir = model_dir.as_ref();
        if !model_dir.is_dir() {
            return Err(IngestError::ModelLoad(format!(
                "model directory {} does not exist",
                model_dir.display()
            )));
        }
        let device = Device::Cpu;

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|error| {
            IngestError::ModelLoad(format!("{}: {error}", tokenizer_path.display()))
        })?;

        let config_path = model_dir.join("config.json");
        let raw_config = std::fs::read_to_string(&config_path).map_err(|error| {
            IngestError::ModelLoad(format!("{}: {error}", config_path.display()))
        })?;
        let config: BertConfig = serde_json::from_str(&raw_config).map_err(|error| {
            IngestError::ModelLoad(format!("{}: {error}", config_path.display()))
        })?;
        let shape: ModelShape = serde_json::from_str(&raw_config).map_err(|error| {
            IngestError::ModelLoad(format!("{}: {error}", config_path.display()))
        })?;

        let weights = load_weights(model_dir, &device)?;
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = BertModel::load(vb, &config).map_err(model_load_error)?;

        info!(
            model_dir = %model_dir.display(),
            dimensions = shape.hidden_size,
            "local embedding model loaded"
        );

        Ok(Self {
            encoder: Arc::new(BertEncoder {
                model,
                tokenizer,
                device,
            }),
            model_name: model_name_for(model_dir),
            dimensions: shape.hidden_size,
        })
    }
}

fn model_name_for(model_dir: &Path) -> String {
    match model_dir.file_name().and_then(|name| name.to_str()) {
        Some(name) if DEFAULT_EMBEDDING_MODEL.ends_with(name) => DEFAULT_EMBEDDING_MODEL.to_string(),
        Some(name) => name.to_string(),
        None => DEFAULT_EMBEDDING_MODEL.to_string(),
    }
}

fn load_weights(model_dir: &Path, device: &Device) -> Result<HashMap<String, Tensor>, IngestError> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.is_file() {
        return candle_core::safetensors::load(&safetensors, device).map_err(model_load_error);
    }

    let pickled: PathBuf = model_dir.join("pytorch_model.bin");
    if pickled.is_file() {
        let tensors = candle_core::pickle::read_all(&pickled).map_err(model_load_error)?;
        return Ok(tensors.into_iter().collect());
    }

    Err(IngestError::ModelLoad(format!(
        "no model.safetensors or pytorch_model.bin in {}",
        model_dir.display()
    )))
}

fn model_load_error(error: candle_core::Error) -> IngestError {
    IngestError::ModelLoad(error.to_string())
}

fn embedding_error(error: candle_core::Error) -> IngestError {
    IngestError::Embedding(error.to_string())
}

impl BertEncoder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        let mut sequences = Vec::with_capacity(texts.len());
        for text in texts {
            let encoding = self
                .tokenizer
                .encode(text.as_str(), true)
                .map_err(|error| IngestError::Embedding(format!("tokenization failed: {error}")))?;
            sequences.push(encoding.get_ids().to_vec());
        }

        let batch = pad_batch(sequences, MAX_TOKENS);
        let shape = (batch.rows, batch.width);
        let input_ids = Tensor::from_vec(batch.ids, shape, &self.device).map_err(embedding_error)?;
        let attention_mask =
            Tensor::from_vec(batch.mask, shape, &self.device).map_err(embedding_error)?;
        let token_type_ids = input_ids.zeros_like().map_err(embedding_error)?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(embedding_error)?;
        let pooled = mean_pool(&hidden, &attention_mask).map_err(embedding_error)?;
        let normalized = l2_normalize(&pooled).map_err(embedding_error)?;

        normalized.to_vec2::<f32>().map_err(embedding_error)
    }
}

#[async_trait]
impl Embedder for LocalBertEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        let encoder = Arc::clone(&self.encoder);
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut vectors = Vec::with_capacity(texts.len());
            for batch in texts.chunks(LOCAL_BATCH_SIZE) {
                vectors.extend(encoder.embed(batch)?);
                debug!(batch = batch.len(), "embedded batch locally");
            }
            Ok(vectors)
        })
        .await
        .map_err(|error| IngestError::Join(error.to_string()))?
    }
}

struct PaddedBatch {
    ids: Vec<u32>,
    mask: Vec<u32>,
    rows: usize,
    width: usize,
}

/// Truncates every sequence to `max_tokens`, keeping its closing special
/// token, and right-pads with id 0 to the longest remaining sequence.
fn pad_batch(sequences: Vec<Vec<u32>>, max_tokens: usize) -> PaddedBatch {
    let sequences: Vec<Vec<u32>> = sequences
        .into_iter()
        .map(|mut ids| {
            if ids.len() > max_tokens && max_tokens > 0 {
                let last = ids[ids.len() - 1];
                ids.truncate(max_tokens);
                ids[max_tokens - 1] = last;
            }
            ids
        })
        .collect();

    let rows = sequences.len();
    let width = sequences.iter().map(Vec::len).max().unwrap_or(0);
    let mut ids = Vec::with_capacity(rows * width);
    let mut mask = Vec::with_capacity(rows * width);
    for sequence in &sequences {
        ids.extend_from_slice(sequence);
        mask.extend(std::iter::repeat(1).take(sequence.len()));
        ids.extend(std::iter::repeat(0).take(width - sequence.len()));
        mask.extend(std::iter::repeat(0).take(width - sequence.len()));
    }

    PaddedBatch {
        ids,
        mask,
        rows,
        width,
    }
}

/// Averages token states over the positions the mask marks as real.
fn mean_pool(hidden: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
    let mask = mask.to_dtype(hidden.dtype())?.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?;
    summed.broadcast_div(&counts)
}

fn l2_normalize(vectors: &Tensor) -> candle_core::Result<Tensor> {
    let norms = vectors.sqr()?.sum_keepdim(1)?.sqrt()?.affine(1.0, 1e-12)?;
    vectors.broadcast_div(&norms)
}
