use crate::error::IngestError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;
const NGRAM_DIMENSIONS: usize = 128;
const EMBEDDING_BATCH_SIZE: usize = 32;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, IngestError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| IngestError::Embedding("embedder returned no vector".to_string()))
    }
}

/// Hashes character trigrams into a fixed number of buckets. Needs no model
/// and is fully deterministic, which makes it useful offline and in tests.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: NGRAM_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        "character-trigram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingEndpointConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `http://localhost:8080/v1`.
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for EmbeddingEndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            api_key: None,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Embeds text with a sentence-transformer model served behind an
/// OpenAI-compatible `/embeddings` route.
pub struct HttpEmbedder {
    config: EmbeddingEndpointConfig,
    client: Client,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingEndpointConfig) -> Result<Self, IngestError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    async fn embed_one_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        let mut request = self
            .client
            .post(format!(
                "{}/embeddings",
                self.config.base_url.trim_end_matches('/')
            ))
            .json(&EmbeddingRequest {
                model: &self.config.model,
                input: texts,
            });

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Embedding(format!(
                "embedding endpoint returned {status}: {body}"
            )));
        }

        let payload: EmbeddingResponse = response.json().await?;
        order_embeddings(payload, texts.len(), self.config.dimensions)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBEDDING_BATCH_SIZE) {
            vectors.extend(self.embed_one_batch(batch).await?);
        }
        Ok(vectors)
    }
}

fn order_embeddings(
    payload: EmbeddingResponse,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, IngestError> {
    if payload.data.len() != expected {
        return Err(IngestError::Embedding(format!(
            "expected {expected} embeddings, got {}",
            payload.data.len()
        )));
    }

    let mut data = payload.data;
    if data.iter().all(|item| item.index.is_some()) {
        data.sort_by_key(|item| item.index);
    }

    data.into_iter()
        .map(|item| {
            if item.embedding.len() != dimensions {
                Err(IngestError::Embedding(format!(
                    "embedding dimension {} != {dimensions}",
                    item.embedding.len()
                )))
            } else {
                Ok(item.embedding)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Invoice total and due date");
        let second = embedder.embed("Invoice total and due date");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder
            .embed_query("abc")
            .await
            .expect("ngram embedding cannot fail");
        assert_eq!(vector.len(), 32);
    }

    #[test]
    fn endpoint_results_are_reordered_by_index() {
        let payload: EmbeddingResponse = serde_json::from_value(json!({
            "object": "list",
            "data": [
                { "object": "embedding", "index": 1, "embedding": [0.0, 1.0] },
                { "object": "embedding", "index": 0, "embedding": [1.0, 0.0] }
            ],
            "model": DEFAULT_EMBEDDING_MODEL
        }))
        .expect("payload should deserialize");

        let vectors = order_embeddings(payload, 2, 2).expect("payload should be accepted");
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn endpoint_dimension_mismatch_is_rejected() {
        let payload: EmbeddingResponse = serde_json::from_value(json!({
            "data": [{ "index": 0, "embedding": [1.0, 0.0, 0.0] }]
        }))
        .expect("payload should deserialize");

        let result = order_embeddings(payload, 1, DEFAULT_EMBEDDING_DIMENSIONS);
        assert!(matches!(result, Err(IngestError::Embedding(_))));
    }

    #[tokio::test]
    async fn failing_endpoint_is_an_embedding_error() {
        use axum::{http::StatusCode, routing::post, Router};

        let router = Router::new().route(
            "/embeddings",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "model loading") }),
        );
        let base_url = crate::test_support::serve(router).await;
        let embedder = HttpEmbedder::new(EmbeddingEndpointConfig {
            base_url,
            timeout: Duration::from_secs(5),
            ..EmbeddingEndpointConfig::default()
        })
        .expect("client should build");

        match embedder.embed_query("invoice").await {
            Err(IngestError::Embedding(message)) => {
                assert!(message.contains("503"));
                assert!(message.contains("model loading"));
            }
            other => panic!("expected an embedding error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn live_endpoint_is_called_in_batches() {
        use axum::{routing::post, Json, Router};
        use serde_json::Value;

        let router = Router::new().route(
            "/embeddings",
            post(|Json(body): Json<Value>| async move {
                let inputs = body["input"].as_array().cloned().unwrap_or_default();
                let data: Vec<Value> = inputs
                    .iter()
                    .enumerate()
                    .map(|(index, _)| json!({ "index": index, "embedding": [index as f32, 1.0] }))
                    .collect();
                Json(json!({ "data": data }))
            }),
        );
        let base_url = crate::test_support::serve(router).await;
        let embedder = HttpEmbedder::new(EmbeddingEndpointConfig {
            base_url,
            dimensions: 2,
            timeout: Duration::from_secs(5),
            ..EmbeddingEndpointConfig::default()
        })
        .expect("client should build");

        let texts: Vec<String> = (0..EMBEDDING_BATCH_SIZE + 3).map(|i| format!("chunk {i}")).collect();
        let vectors = embedder.embed_batch(&texts).await.expect("embedding should succeed");
        assert_eq!(vectors.len(), texts.len());
        // The second request restarts its indices at zero.
        assert_eq!(vectors[EMBEDDING_BATCH_SIZE], vec![0.0, 1.0]);
        assert_eq!(vectors[EMBEDDING_BATCH_SIZE - 1], vec![(EMBEDDING_BATCH_SIZE - 1) as f32, 1.0]);
    }
}
