//! Embedding client abstraction, provider adapters, and the normalization contract.

mod providers;

pub use providers::{HashingEmbeddingClient, OllamaEmbeddingClient, OpenAiEmbeddingClient};

use crate::config::{Config, EmbeddingProvider};
use crate::error::ErrorKind;
use crate::transport::{HttpTransport, TransportError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider transport failed.
    #[error("Embedding request failed: {0}")]
    Transport(#[from] TransportError),
    /// Provider answered but the payload was unusable.
    #[error("Embedding provider returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors raised while enforcing the embedding contract.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Underlying provider failed.
    #[error(transparent)]
    Client(#[from] EmbeddingClientError),
    /// Provider returned a different number of vectors than inputs.
    #[error("Embedding provider returned {actual} vectors for {expected} inputs")]
    CountMismatch {
        /// Number of inputs sent.
        expected: usize,
        /// Number of vectors received.
        actual: usize,
    },
    /// Vector length differs from the configured dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Observed dimension.
        actual: usize,
    },
}

impl EmbeddingError {
    /// Classify the failure for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Client(EmbeddingClientError::Transport(error)) => error.kind(),
            Self::Client(EmbeddingClientError::InvalidResponse(_)) | Self::CountMismatch { .. } => {
                ErrorKind::MalformedUpstreamOutput
            }
            Self::DimensionMismatch { .. } => ErrorKind::InvalidConfiguration,
        }
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Contract-enforcing wrapper around an [`EmbeddingClient`].
///
/// Every vector handed to the rest of the pipeline has the configured dimension and unit L2
/// norm (or is the zero vector when the provider produced one).
#[derive(Clone)]
pub struct Embedder {
    client: Arc<dyn EmbeddingClient>,
    dimension: usize,
}

impl Embedder {
    /// Wrap a client producing vectors of `dimension` components.
    pub fn new(client: Arc<dyn EmbeddingClient>, dimension: usize) -> Self {
        Self { client, dimension }
    }

    /// Dimension shared by every chunk and query vector.
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed a batch of texts. An empty batch returns without calling the provider.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let vectors = self.client.generate_embeddings(texts).await?;
        if vectors.len() != expected {
            return Err(EmbeddingError::CountMismatch {
                expected,
                actual: vectors.len(),
            });
        }
        vectors
            .into_iter()
            .map(|vector| {
                self.check_dimension(&vector)?;
                Ok(l2_normalize(vector))
            })
            .collect()
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(vec![text.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }

    /// Reject vectors whose length differs from the configured dimension.
    pub fn check_dimension(&self, vector: &[f32]) -> Result<(), EmbeddingError> {
        if vector.len() == self.dimension {
            Ok(())
        } else {
            Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            })
        }
    }
}

/// Scale a vector to unit L2 norm; degenerate vectors stay zero.
pub fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

/// Build the embedding client selected by configuration.
pub fn build_embedding_client(
    config: &Config,
    transport: HttpTransport,
) -> Arc<dyn EmbeddingClient> {
    tracing::info!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Initializing embedding client"
    );
    match config.embedding_provider {
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbeddingClient::new(
            transport,
            config.embedding_url.clone(),
            config.embedding_model.clone(),
        )),
        EmbeddingProvider::OpenAI => Arc::new(OpenAiEmbeddingClient::new(
            transport,
            config.embedding_url.clone(),
            config.embedding_model.clone(),
            config.openai_api_key.clone().unwrap_or_default(),
        )),
        EmbeddingProvider::Hashing => {
            Arc::new(HashingEmbeddingClient::new(config.embedding_dimension))
        }
    }
}
