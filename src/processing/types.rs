//! Core data types and error definitions for indexing and retrieval.

use crate::{
    embedding::EmbeddingError,
    error::ErrorKind,
    index_status::IndexStatusError,
    profile::ProfileError,
    store::{Namespace, StoreError},
};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

/// Errors produced while turning raw text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Chunking was configured with an impossible word budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// Errors emitted by the indexing pipeline.
#[derive(Debug, Error)]
pub enum IndexingError {
    /// The profile service has no profile for the user.
    #[error("Profile not found for user {user_id}")]
    ProfileNotFound {
        /// User that was looked up.
        user_id: String,
    },
    /// Caller input was rejected before any write.
    #[error("Invalid indexing request: {0}")]
    InvalidRequest(String),
    /// Profile lookup failed.
    #[error(transparent)]
    Profile(#[from] ProfileError),
    /// Chunking step failed.
    #[error("Failed to chunk text: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding provider failed or violated the vector contract.
    #[error("Failed to embed chunks: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Chunk store interaction failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Generation pointer could not be published.
    #[error(transparent)]
    IndexStatus(#[from] IndexStatusError),
}

impl IndexingError {
    /// Classify the failure for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProfileNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidRequest(_) => ErrorKind::Validation,
            Self::Profile(error) => error.kind(),
            Self::Chunking(_) => ErrorKind::InvalidConfiguration,
            Self::Embedding(error) => error.kind(),
            Self::Store(error) => error.kind(),
            Self::IndexStatus(error) => error.kind(),
        }
    }
}

/// Errors emitted while serving retrieval requests.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// User has never been indexed and the policy forbids indexing on demand.
    #[error("User {user_id} has not been indexed")]
    NotIndexed {
        /// User that was looked up.
        user_id: String,
    },
    /// Request parameters were out of range.
    #[error("Invalid retrieval request: {0}")]
    InvalidRequest(String),
    /// On-demand indexing failed.
    #[error(transparent)]
    Indexing(#[from] IndexingError),
    /// Query embedding failed or had the wrong dimension.
    #[error("Failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Similarity search failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Index status lookup failed.
    #[error(transparent)]
    IndexStatus(#[from] IndexStatusError),
}

impl RetrievalError {
    /// Classify the failure for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotIndexed { .. } => ErrorKind::NotFound,
            Self::InvalidRequest(_) => ErrorKind::Validation,
            Self::Indexing(error) => error.kind(),
            Self::Embedding(error) => error.kind(),
            Self::Store(error) => error.kind(),
            Self::IndexStatus(error) => error.kind(),
        }
    }
}

/// Summary of a namespace re-index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    /// User that was indexed.
    pub user_id: String,
    /// Namespace that was rebuilt.
    pub namespace: Namespace,
    /// Chunks written; zero when the profile has no extractable text.
    pub chunk_count: usize,
    /// Generation now live for the namespace.
    pub generation: String,
    /// Stale chunks removed, when collection ran inline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collected: Option<usize>,
}

/// Summary of a section re-index.
#[derive(Debug, Clone, Serialize)]
pub struct SectionIndexReport {
    /// Section that was rebuilt.
    pub section_id: String,
    /// Identifiers of the freshly written chunks.
    pub chunk_ids: Vec<String>,
    /// Generation now live for the section.
    pub generation: String,
}

/// Query expressed as text or as a precomputed embedding.
#[derive(Debug, Clone)]
pub enum RetrievalQuery {
    /// Free text embedded by the configured embedder.
    Text(String),
    /// Caller-supplied vector of the configured dimension.
    Embedding(Vec<f32>),
}

/// Parameters of a retrieval call.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    /// User whose corpus is searched.
    pub user_id: String,
    /// Namespace searched.
    pub namespace: Namespace,
    /// Query text or vector.
    pub query: RetrievalQuery,
    /// Number of results (1..=100); configured default when absent.
    pub top_k: Option<usize>,
    /// Restrict to these sections; empty means all.
    pub section_ids: Vec<String>,
}

/// Ranked chunk returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    /// Chunk identifier.
    pub chunk_id: String,
    /// Owning user.
    pub user_id: String,
    /// Namespace of the chunk.
    pub index_namespace: Namespace,
    /// Section of the chunk.
    pub section_id: String,
    /// Field family of the chunk.
    pub source_type: String,
    /// Provenance key.
    pub source_id: String,
    /// Chunk body.
    pub text: String,
    /// Similarity to the query.
    pub score: f32,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Result of a retrieval call.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalOutcome {
    /// Ranked chunks, best first.
    pub chunks: Vec<RetrievedChunk>,
    /// Whether the index is older than seven days.
    pub stale: bool,
    /// Whether this call indexed the profile first.
    pub auto_indexed: bool,
}
