//! Explicit wiring of every capability the pipeline, controller, and agent depend on.
//!
//! Entry points build one [`ServiceContext`] from [`Config`]; tests assemble one from
//! in-memory [`ServiceParts`]. Nothing below this module reads global state.

use crate::{
    agent::{ActionPlanner, ConversationAgent, KeywordPlanner},
    config::{Config, ConfigError, GcMode, MissingIndexPolicy},
    embedding::{Embedder, build_embedding_client},
    error::ErrorKind,
    generation::{HttpResumeGenerator, ResumeGenerator},
    index_status::{IndexStatusStore, InMemoryIndexStatusStore, RedisIndexStatusStore},
    metrics::PipelineMetrics,
    processing::{IndexingPipeline, Retriever},
    profile::{HttpProfileSource, ProfileSource},
    refinement::{RefinementController, RefinementSettings},
    scoring::{HttpScoringClient, ResumeScorer, SuggestionProvider},
    session::{InMemorySessionStore, RedisSessionStore, SessionStore},
    store::{ChunkStore, QdrantChunkStore, StoreError},
    transport::{HttpTransport, TransportError, normalize_base_url},
};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while assembling the service context.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// HTTP client or service URL could not be set up.
    #[error("Failed to prepare HTTP clients: {0}")]
    Transport(#[from] TransportError),
    /// Chunk store could not be prepared.
    #[error("Failed to prepare chunk store: {0}")]
    Store(#[from] StoreError),
    /// Redis URL was rejected.
    #[error("Invalid Redis configuration: {0}")]
    Redis(#[from] redis::RedisError),
}

impl ContextError {
    /// Classify the failure for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(error) => error.kind(),
            Self::Transport(error) => error.kind(),
            Self::Store(error) => error.kind(),
            Self::Redis(_) => ErrorKind::InvalidConfiguration,
        }
    }
}

/// Capability handles a context is assembled from.
pub struct ServiceParts {
    /// Source of structured profiles.
    pub profiles: Arc<dyn ProfileSource>,
    /// Contract-enforcing embedder.
    pub embedder: Embedder,
    /// Chunk persistence and search.
    pub chunks: Arc<dyn ChunkStore>,
    /// Per-user index status and generation pointers.
    pub index_status: Arc<dyn IndexStatusStore>,
    /// Conversation state.
    pub sessions: Arc<dyn SessionStore>,
    /// Resume generation.
    pub generator: Arc<dyn ResumeGenerator>,
    /// Resume scoring.
    pub scorer: Arc<dyn ResumeScorer>,
    /// Improvement suggestions.
    pub suggestions: Arc<dyn SuggestionProvider>,
    /// Action selection for conversational turns.
    pub planner: Arc<dyn ActionPlanner>,
}

/// Tunables applied across components.
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    /// Word budget per chunk.
    pub chunk_max_words: usize,
    /// Where superseded generations are collected.
    pub gc_mode: GcMode,
    /// Retrieval behavior for users never indexed.
    pub missing_index_policy: MissingIndexPolicy,
    /// `top_k` applied when a request omits one.
    pub default_top_k: usize,
    /// Refinement defaults.
    pub refinement: RefinementSettings,
}

impl ServiceSettings {
    /// Settings taken from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_max_words: config.chunk_max_words,
            gc_mode: config.index_gc_mode,
            missing_index_policy: config.missing_index_policy,
            default_top_k: config.retrieval_default_top_k,
            refinement: RefinementSettings::from_config(config),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            chunk_max_words: 150,
            gc_mode: GcMode::Background,
            missing_index_policy: MissingIndexPolicy::FailFast,
            default_top_k: 5,
            refinement: RefinementSettings {
                target_score: 0.88,
                max_refinements: 2,
            },
        }
    }
}

/// Fully wired services shared by the HTTP surface and the CLI.
#[derive(Clone)]
pub struct ServiceContext {
    /// Activity counters.
    pub metrics: Arc<PipelineMetrics>,
    /// Indexing pipeline.
    pub indexing: IndexingPipeline,
    /// Retrieval orchestrator.
    pub retriever: Retriever,
    /// Refinement controller.
    pub refinement: RefinementController,
    /// Conversational agent.
    pub agent: ConversationAgent,
}

impl ServiceContext {
    /// Wire services from explicit parts.
    pub fn from_parts(parts: ServiceParts, settings: ServiceSettings) -> Self {
        let ServiceParts {
            profiles,
            embedder,
            chunks,
            index_status,
            sessions,
            generator,
            scorer,
            suggestions,
            planner,
        } = parts;
        let metrics = Arc::new(PipelineMetrics::new());
        let indexing = IndexingPipeline::new(
            profiles,
            embedder,
            chunks,
            index_status,
            Arc::clone(&metrics),
            settings.chunk_max_words,
            settings.gc_mode,
        );
        let retriever = Retriever::new(
            indexing.clone(),
            settings.missing_index_policy,
            settings.default_top_k,
        );
        let refinement = RefinementController::new(
            Arc::clone(&generator),
            Arc::clone(&scorer),
            Arc::clone(&metrics),
            settings.refinement,
        );
        let agent = ConversationAgent::new(
            sessions,
            planner,
            refinement.clone(),
            generator,
            scorer,
            suggestions,
            indexing.clone(),
        );
        Self {
            metrics,
            indexing,
            retriever,
            refinement,
            agent,
        }
    }

    /// Wire production adapters from configuration and prepare the chunk collection.
    pub async fn from_config(config: &Config) -> Result<Self, ContextError> {
        let parts = ServiceParts::from_config(config).await?;
        Ok(Self::from_parts(parts, ServiceSettings::from_config(config)))
    }
}

impl ServiceParts {
    /// Production adapters for every capability; the Qdrant collection is ensured up front.
    pub async fn from_config(config: &Config) -> Result<Self, ContextError> {
        let transport = HttpTransport::new(config.http_timeout, config.retry_policy())?;
        let profile_url = normalize_base_url(&config.profile_service_url)?;
        let generator_url = normalize_base_url(&config.generator_service_url)?;
        let scoring_url = normalize_base_url(&config.scoring_service_url)?;

        let embedder = Embedder::new(
            build_embedding_client(config, transport.clone()),
            config.embedding_dimension,
        );
        let chunks = Arc::new(QdrantChunkStore::new(
            transport.clone(),
            &config.qdrant_url,
            config.qdrant_api_key.clone(),
            config.qdrant_collection_name.clone(),
            config.embedding_dimension,
        )?);
        chunks.ensure_ready().await?;

        let (index_status, sessions): (Arc<dyn IndexStatusStore>, Arc<dyn SessionStore>) =
            match config.redis_url.as_deref() {
                Some(url) => {
                    let client = redis::Client::open(url)?;
                    (
                        Arc::new(RedisIndexStatusStore::new(client.clone())),
                        Arc::new(RedisSessionStore::new(client)),
                    )
                }
                None => {
                    tracing::warn!(
                        "REDIS_URL not set; index status and sessions are kept in process memory"
                    );
                    (
                        Arc::new(InMemoryIndexStatusStore::new()),
                        Arc::new(InMemorySessionStore::new()),
                    )
                }
            };

        let scoring = Arc::new(HttpScoringClient::new(transport.clone(), scoring_url));
        let parts = Self {
            profiles: Arc::new(HttpProfileSource::new(transport.clone(), profile_url)),
            embedder,
            chunks,
            index_status,
            sessions,
            generator: Arc::new(HttpResumeGenerator::new(transport, generator_url)),
            scorer: scoring.clone(),
            suggestions: scoring,
            planner: Arc::new(KeywordPlanner),
        };

        tracing::info!(
            collection = %config.qdrant_collection_name,
            dimension = config.embedding_dimension,
            missing_index_policy = ?config.missing_index_policy,
            gc_mode = ?config.index_gc_mode,
            "Service adapters ready"
        );
        Ok(parts)
    }
}
