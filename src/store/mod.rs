//! Chunk persistence and filtered similarity search.
//!
//! [`ChunkStore`] is the narrow interface the indexing pipeline and retrieval orchestrator
//! consume. Two adapters exist: [`qdrant::QdrantChunkStore`] for production and
//! [`memory::InMemoryChunkStore`] for tests and offline runs.

pub mod memory;
pub mod qdrant;

pub use memory::InMemoryChunkStore;
pub use qdrant::QdrantChunkStore;

use crate::error::ErrorKind;
use crate::transport::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use time::OffsetDateTime;

/// Errors returned by chunk store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend transport failed.
    #[error("Chunk store request failed: {0}")]
    Transport(#[from] TransportError),
    /// Backend returned a point that does not carry the expected payload.
    #[error("Chunk store returned a malformed point {id}: {reason}")]
    MalformedPoint {
        /// Identifier of the offending point.
        id: String,
        /// What was wrong with it.
        reason: String,
    },
    /// Local state could not be accessed.
    #[error("Chunk store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Classify the failure for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(error) => error.kind(),
            Self::MalformedPoint { .. } => ErrorKind::MalformedUpstreamOutput,
            Self::Unavailable(_) => ErrorKind::UpstreamUnavailable,
        }
    }
}

/// Partition of a user's chunks by origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// Chunks derived from the structured profile.
    Profile,
    /// Chunks of sections the user edited directly.
    ResumeSections,
}

impl Namespace {
    /// Wire label stored in payloads.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::ResumeSections => "resume_sections",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "profile" => Ok(Self::Profile),
            "resume_sections" => Ok(Self::ResumeSections),
            other => Err(format!("unknown namespace '{other}'")),
        }
    }
}

/// Chunk metadata and text as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// Globally unique identifier; fresh on every re-index.
    pub chunk_id: String,
    /// Owning user.
    pub user_id: String,
    /// Partition the chunk belongs to.
    pub namespace: Namespace,
    /// Section the chunk belongs to; defaults to the source type.
    pub section_id: String,
    /// Field family the text came from, or `user_edited`.
    pub source_type: String,
    /// Provenance key within the source type, suffixed with the chunk position.
    pub source_id: String,
    /// Chunk body.
    pub text: String,
    /// Creation time.
    pub created_at: OffsetDateTime,
    /// Indexing run that wrote the chunk.
    pub generation: String,
    /// SHA-256 of the text.
    pub chunk_hash: String,
}

/// Chunk ready for upsert.
#[derive(Debug, Clone)]
pub struct ChunkPoint {
    /// Metadata and text.
    pub record: ChunkRecord,
    /// Unit-norm embedding.
    pub vector: Vec<f32>,
}

/// Search hit.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// Matched chunk.
    pub record: ChunkRecord,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// Selection of chunks for delete, count, and search.
///
/// Empty list constraints match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkFilter {
    /// Owning user; always required.
    pub user_id: String,
    /// Restrict to one namespace.
    pub namespace: Option<Namespace>,
    /// Restrict to any of these sections.
    pub section_ids: Vec<String>,
    /// Restrict to any of these generations.
    pub generations: Vec<String>,
    /// Exclude every one of these generations.
    pub exclude_generations: Vec<String>,
}

impl ChunkFilter {
    /// Every chunk of `user_id`.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Restrict to `namespace`.
    pub fn namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    /// Restrict to the given sections.
    pub fn sections<I, S>(mut self, section_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.section_ids = section_ids.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to the given generations.
    pub fn generations<I, S>(mut self, generations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.generations = generations.into_iter().map(Into::into).collect();
        self
    }

    /// Exclude the given generations.
    pub fn excluding_generations<I, S>(mut self, generations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_generations = generations.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `record` satisfies every constraint.
    pub fn matches(&self, record: &ChunkRecord) -> bool {
        record.user_id == self.user_id
            && self.namespace.is_none_or(|namespace| record.namespace == namespace)
            && (self.section_ids.is_empty() || self.section_ids.contains(&record.section_id))
            && (self.generations.is_empty() || self.generations.contains(&record.generation))
            && !self.exclude_generations.contains(&record.generation)
    }
}

/// Persistence and similarity search for chunks.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Prepare backing resources (collections, indexes). Idempotent.
    async fn ensure_ready(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Write chunks keyed by id, replacing any chunk with the same id.
    async fn upsert(&self, chunks: Vec<ChunkPoint>) -> Result<usize, StoreError>;

    /// Remove every chunk matching `filter`, returning how many were removed.
    async fn delete(&self, filter: &ChunkFilter) -> Result<usize, StoreError>;

    /// Count chunks matching `filter`.
    async fn count(&self, filter: &ChunkFilter) -> Result<usize, StoreError>;

    /// Up to `top_k` chunks matching `filter`, by descending similarity to `vector`.
    async fn search(
        &self,
        filter: &ChunkFilter,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;
}

/// Sort hits by descending score and keep the first `top_k`.
pub(crate) fn rank(mut hits: Vec<ScoredChunk>, top_k: usize) -> Vec<ScoredChunk> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(top_k);
    hits
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use time::macros::datetime;

    pub(crate) fn record(user: &str, namespace: Namespace, section: &str, generation: &str) -> ChunkRecord {
        ChunkRecord {
            chunk_id: format!("{user}-{section}-{generation}"),
            user_id: user.into(),
            namespace,
            section_id: section.into(),
            source_type: section.into(),
            source_id: "0_0".into(),
            text: format!("{section} text"),
            created_at: datetime!(2025-01-01 0:00 UTC),
            generation: generation.into(),
            chunk_hash: "hash".into(),
        }
    }

    #[test]
    fn filter_matches_each_constraint() {
        let chunk = record("u1", Namespace::Profile, "skills", "g1");

        assert!(ChunkFilter::for_user("u1").matches(&chunk));
        assert!(!ChunkFilter::for_user("u2").matches(&chunk));
        assert!(!ChunkFilter::for_user("u1")
            .namespace(Namespace::ResumeSections)
            .matches(&chunk));
        assert!(ChunkFilter::for_user("u1")
            .sections(["experience", "skills"])
            .matches(&chunk));
        assert!(!ChunkFilter::for_user("u1").sections(["summary"]).matches(&chunk));
        assert!(ChunkFilter::for_user("u1").generations(["g1"]).matches(&chunk));
        assert!(!ChunkFilter::for_user("u1")
            .excluding_generations(["g0", "g1"])
            .matches(&chunk));
    }

    #[test]
    fn namespace_labels_round_trip() {
        for namespace in [Namespace::Profile, Namespace::ResumeSections] {
            assert_eq!(namespace.as_str().parse::<Namespace>(), Ok(namespace));
        }
        assert!("sections".parse::<Namespace>().is_err());
    }

    #[test]
    fn rank_orders_by_score_and_truncates() {
        let hits = vec![
            ScoredChunk { record: record("u", Namespace::Profile, "a", "g"), score: 0.1 },
            ScoredChunk { record: record("u", Namespace::Profile, "b", "g"), score: 0.9 },
            ScoredChunk { record: record("u", Namespace::Profile, "c", "g"), score: 0.5 },
        ];
        let ranked = rank(hits, 2);
        let sections: Vec<_> = ranked.iter().map(|hit| hit.record.section_id.as_str()).collect();
        assert_eq!(sections, vec!["b", "c"]);
    }
}
