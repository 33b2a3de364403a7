//! Indexing pipeline and retrieval orchestrator.

use crate::{
    config::{GcMode, MissingIndexPolicy},
    embedding::Embedder,
    index_status::{GenerationPointer, IndexStatusStore, namespace_scope, section_scope},
    metrics::PipelineMetrics,
    processing::{
        chunking::chunk_text,
        mappers::{ChunkOrigin, build_points, map_scored_chunk},
        types::{
            IndexReport, IndexingError, RetrievalError, RetrievalOutcome, RetrievalQuery,
            RetrievalRequest, SectionIndexReport,
        },
    },
    profile::ProfileSource,
    store::{ChunkFilter, ChunkStore, Namespace},
};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Source type stamped on chunks of user-edited sections.
pub const USER_EDITED_SOURCE: &str = "user_edited";

/// Largest `top_k` a retrieval may request.
pub const MAX_TOP_K: usize = 100;

/// Builds and rebuilds a user's retrievable corpus.
///
/// Every run writes its chunks under a fresh generation id, publishes that generation as the
/// live one for its scope, and only then removes chunks of superseded generations. Across
/// sequential runs readers never observe an empty or mixed corpus, and a failed run leaves the
/// previous generation live; its orphaned chunks are removed by the next successful run.
///
/// Concurrent runs for the same user and scope are not serialized: collection from one run can
/// remove chunks another run has written but not yet published, leaving that run's generation
/// partial until the next reindex.
#[derive(Clone)]
pub struct IndexingPipeline {
    profiles: Arc<dyn ProfileSource>,
    embedder: Embedder,
    store: Arc<dyn ChunkStore>,
    status: Arc<dyn IndexStatusStore>,
    metrics: Arc<PipelineMetrics>,
    max_words: usize,
    gc_mode: GcMode,
}

impl IndexingPipeline {
    /// Assemble a pipeline from its collaborators.
    pub fn new(
        profiles: Arc<dyn ProfileSource>,
        embedder: Embedder,
        store: Arc<dyn ChunkStore>,
        status: Arc<dyn IndexStatusStore>,
        metrics: Arc<PipelineMetrics>,
        max_words: usize,
        gc_mode: GcMode,
    ) -> Self {
        Self {
            profiles,
            embedder,
            store,
            status,
            metrics,
            max_words,
            gc_mode,
        }
    }

    /// Rebuild the user's chunks of `namespace` from their profile.
    pub async fn reindex_namespace(
        &self,
        user_id: &str,
        namespace: Namespace,
    ) -> Result<IndexReport, IndexingError> {
        validate_id("user_id", user_id)?;
        tracing::info!(user_id, %namespace, "Re-indexing profile");

        let profile = self
            .profiles
            .get_profile(user_id)
            .await?
            .ok_or_else(|| IndexingError::ProfileNotFound {
                user_id: user_id.to_string(),
            })?;

        let generation = Uuid::new_v4().to_string();
        let now = OffsetDateTime::now_utc();
        let mut chunk_count = 0;

        for field in profile.text_fields() {
            let origin = ChunkOrigin {
                user_id,
                namespace,
                section_id: None,
                source_type: &field.source_type,
                source_id: &field.source_id,
                generation: &generation,
                created_at: now,
            };
            chunk_count += self.write_chunks(&origin, &field.text).await?;
        }

        self.status
            .publish_generation(
                user_id,
                &namespace_scope(namespace),
                GenerationPointer {
                    namespace,
                    generation: generation.clone(),
                },
                now,
            )
            .await?;
        self.metrics.record_profile_index(chunk_count as u64);
        tracing::info!(
            user_id,
            %namespace,
            chunks = chunk_count,
            generation = %generation,
            "Profile indexed"
        );

        let stale = ChunkFilter::for_user(user_id).namespace(namespace);
        let collected = self.collect_superseded(user_id, stale, Some(namespace)).await?;

        Ok(IndexReport {
            user_id: user_id.to_string(),
            namespace,
            chunk_count,
            generation,
            collected,
        })
    }

    /// Replace the chunks of one edited section with chunks of `text`.
    pub async fn reindex_section(
        &self,
        user_id: &str,
        section_id: &str,
        text: &str,
    ) -> Result<SectionIndexReport, IndexingError> {
        validate_id("user_id", user_id)?;
        validate_id("section_id", section_id)?;
        tracing::info!(user_id, section_id, "Re-indexing section");

        let namespace = Namespace::ResumeSections;
        let generation = Uuid::new_v4().to_string();
        let now = OffsetDateTime::now_utc();
        let origin = ChunkOrigin {
            user_id,
            namespace,
            section_id: Some(section_id),
            source_type: USER_EDITED_SOURCE,
            source_id: section_id,
            generation: &generation,
            created_at: now,
        };

        let chunks = chunk_text(text, self.max_words)?;
        let vectors = self.embedder.embed_batch(chunks.clone()).await?;
        let points = build_points(&origin, chunks, vectors);
        let chunk_ids: Vec<String> = points
            .iter()
            .map(|point| point.record.chunk_id.clone())
            .collect();
        self.store.upsert(points).await?;

        self.status
            .publish_generation(
                user_id,
                &section_scope(section_id),
                GenerationPointer {
                    namespace,
                    generation: generation.clone(),
                },
                now,
            )
            .await?;
        self.metrics.record_section_index(chunk_ids.len() as u64);
        tracing::info!(user_id, section_id, chunks = chunk_ids.len(), "Section indexed");

        let stale = ChunkFilter::for_user(user_id).sections([section_id]);
        self.collect_superseded(user_id, stale, None).await?;

        Ok(SectionIndexReport {
            section_id: section_id.to_string(),
            chunk_ids,
            generation,
        })
    }

    /// Delete every chunk of a section, in all namespaces, and retire its pointer.
    pub async fn delete_section(&self, user_id: &str, section_id: &str) -> Result<usize, IndexingError> {
        validate_id("user_id", user_id)?;
        validate_id("section_id", section_id)?;
        let deleted = self
            .store
            .delete(&ChunkFilter::for_user(user_id).sections([section_id]))
            .await?;
        self.status
            .retire_scope(user_id, &section_scope(section_id))
            .await?;
        tracing::info!(user_id, section_id, deleted, "Section deleted");
        Ok(deleted)
    }

    async fn write_chunks(&self, origin: &ChunkOrigin<'_>, text: &str) -> Result<usize, IndexingError> {
        let chunks = chunk_text(text, self.max_words)?;
        if chunks.is_empty() {
            return Ok(0);
        }
        let vectors = self.embedder.embed_batch(chunks.clone()).await?;
        let points = build_points(origin, chunks, vectors);
        Ok(self.store.upsert(points).await?)
    }

    /// Remove chunks matching `scope` whose generation is no longer live.
    ///
    /// Returns the number removed when collection ran inline.
    async fn collect_superseded(
        &self,
        user_id: &str,
        scope: ChunkFilter,
        live_in: Option<Namespace>,
    ) -> Result<Option<usize>, IndexingError> {
        let live = self
            .status
            .get(user_id)
            .await?
            .map(|status| status.live_generations(live_in))
            .unwrap_or_default();
        let filter = scope.excluding_generations(live);

        match self.gc_mode {
            GcMode::Inline => {
                let removed = self.store.delete(&filter).await?;
                self.metrics.record_collected(removed as u64);
                Ok(Some(removed))
            }
            GcMode::Background => {
                let store = Arc::clone(&self.store);
                let metrics = Arc::clone(&self.metrics);
                tokio::spawn(async move {
                    match store.delete(&filter).await {
                        Ok(removed) => {
                            metrics.record_collected(removed as u64);
                            tracing::debug!(user_id = %filter.user_id, removed, "Superseded chunks collected");
                        }
                        Err(error) => {
                            tracing::warn!(user_id = %filter.user_id, error = %error, "Failed to collect superseded chunks");
                        }
                    }
                });
                Ok(None)
            }
        }
    }
}

fn validate_id(field: &str, value: &str) -> Result<(), IndexingError> {
    if value.trim().is_empty() {
        Err(IndexingError::InvalidRequest(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

/// Embeds queries and searches the live generations of a user's corpus.
#[derive(Clone)]
pub struct Retriever {
    pipeline: IndexingPipeline,
    policy: MissingIndexPolicy,
    default_top_k: usize,
}

impl Retriever {
    /// Build a retriever that indexes through `pipeline` when `policy` allows it.
    pub fn new(pipeline: IndexingPipeline, policy: MissingIndexPolicy, default_top_k: usize) -> Self {
        Self {
            pipeline,
            policy,
            default_top_k,
        }
    }

    /// Rank the user's chunks against the query.
    pub async fn retrieve(&self, request: RetrievalRequest) -> Result<RetrievalOutcome, RetrievalError> {
        let RetrievalRequest {
            user_id,
            namespace,
            query,
            top_k,
            section_ids,
        } = request;

        let top_k = top_k.unwrap_or(self.default_top_k);
        if !(1..=MAX_TOP_K).contains(&top_k) {
            return Err(RetrievalError::InvalidRequest(format!(
                "top_k must lie between 1 and {MAX_TOP_K}, got {top_k}"
            )));
        }
        if user_id.trim().is_empty() {
            return Err(RetrievalError::InvalidRequest("user_id must not be empty".into()));
        }

        let embedder = &self.pipeline.embedder;
        let vector = match query {
            RetrievalQuery::Text(text) if text.trim().is_empty() => {
                return Err(RetrievalError::InvalidRequest("query must not be empty".into()));
            }
            RetrievalQuery::Text(text) => embedder.embed(&text).await?,
            RetrievalQuery::Embedding(vector) => {
                embedder.check_dimension(&vector)?;
                vector
            }
        };

        let mut auto_indexed = false;
        let status = match self.pipeline.status.get(&user_id).await? {
            Some(status) => status,
            None => match self.policy {
                MissingIndexPolicy::FailFast => {
                    return Err(RetrievalError::NotIndexed { user_id });
                }
                MissingIndexPolicy::AutoIndex => {
                    tracing::info!(user_id = %user_id, "User not indexed; indexing profile before retrieval");
                    self.pipeline
                        .reindex_namespace(&user_id, Namespace::Profile)
                        .await?;
                    auto_indexed = true;
                    self.pipeline
                        .status
                        .get(&user_id)
                        .await?
                        .ok_or_else(|| RetrievalError::NotIndexed {
                            user_id: user_id.clone(),
                        })?
                }
            },
        };

        let stale = status.is_stale(OffsetDateTime::now_utc());
        if stale {
            tracing::warn!(
                user_id = %user_id,
                last_indexed_at = %status.last_indexed_at,
                "Index is older than seven days; consider re-indexing"
            );
        }

        self.pipeline.metrics.record_retrieval();
        let live = status.live_generations(Some(namespace));
        if live.is_empty() {
            tracing::debug!(user_id = %user_id, %namespace, "No live generation for namespace");
            return Ok(RetrievalOutcome {
                chunks: Vec::new(),
                stale,
                auto_indexed,
            });
        }

        let filter = ChunkFilter::for_user(user_id.clone())
            .namespace(namespace)
            .sections(section_ids)
            .generations(live);
        let hits = self.pipeline.store.search(&filter, &vector, top_k).await?;
        tracing::debug!(user_id = %user_id, %namespace, hits = hits.len(), top_k, "Retrieval completed");

        Ok(RetrievalOutcome {
            chunks: hits.into_iter().map(map_scored_chunk).collect(),
            stale,
            auto_indexed,
        })
    }
}
