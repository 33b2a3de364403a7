use super::{EmbeddingClient, EmbeddingClientError};
use crate::transport::{HttpTransport, format_endpoint};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Ollama `/api/embed` adapter.
pub struct OllamaEmbeddingClient {
    transport: HttpTransport,
    base_url: String,
    model: String,
}

impl OllamaEmbeddingClient {
    /// Build a client for `model`, defaulting to the local Ollama runtime.
    pub fn new(transport: HttpTransport, base_url: Option<String>, model: String) -> Self {
        Self {
            transport,
            base_url: base_url.unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            model,
        }
    }
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let url = format_endpoint(&self.base_url, "api/embed");
        tracing::debug!(model = %self.model, inputs = texts.len(), "Requesting Ollama embeddings");
        let body = json!({ "model": self.model, "input": texts });
        let response: OllamaEmbedResponse = self.transport.post_json(&url, &body).await?;
        Ok(response.embeddings)
    }
}

/// OpenAI-compatible `/embeddings` adapter.
pub struct OpenAiEmbeddingClient {
    transport: HttpTransport,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiEmbeddingClient {
    /// Build a client for `model`, defaulting to the hosted OpenAI API.
    pub fn new(
        transport: HttpTransport,
        base_url: Option<String>,
        model: String,
        api_key: String,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            model,
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let url = format_endpoint(&self.base_url, "embeddings");
        let expected = texts.len();
        let body = json!({ "model": self.model, "input": texts });
        let response = self
            .transport
            .send(|client| client.post(&url).bearer_auth(&self.api_key).json(&body))
            .await?;
        let payload: OpenAiEmbedResponse = crate::transport::decode_json(&url, response).await?;

        let mut ordered: Vec<Option<Vec<f32>>> = vec![None; expected];
        for item in payload.data {
            let slot = ordered.get_mut(item.index).ok_or_else(|| {
                EmbeddingClientError::InvalidResponse(format!(
                    "embedding index {} out of range for {expected} inputs",
                    item.index
                ))
            })?;
            *slot = Some(item.embedding);
        }
        ordered
            .into_iter()
            .enumerate()
            .map(|(index, vector)| {
                vector.ok_or_else(|| {
                    EmbeddingClientError::InvalidResponse(format!("missing embedding for input {index}"))
                })
            })
            .collect()
    }
}

/// Deterministic feature-hashing embedder.
///
/// Each lowercase alphanumeric token is hashed into one signed slot, so texts sharing
/// vocabulary land near each other. Useful offline and in tests; not a semantic model.
pub struct HashingEmbeddingClient {
    dimension: usize,
}

impl HashingEmbeddingClient {
    /// Construct an embedder producing `dimension`-component vectors.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];
        if self.dimension == 0 {
            return embedding;
        }
        for token in text
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let hash = fnv1a(&token.to_lowercase());
            let position = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            embedding[position] += sign;
        }
        embedding
    }
}

fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl EmbeddingClient for HashingEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        Ok(texts.iter().map(|text| self.encode(text)).collect())
    }
}
