use crate::error::ErrorKind;
use crate::transport::RetryPolicy;
use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed or is out of range.
    #[error("Invalid value for environment variable {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Configuration problems always fail fast before any I/O.
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidConfiguration
    }
}

/// Runtime configuration for the resume pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Qdrant instance that stores chunk vectors.
    pub qdrant_url: String,
    /// Name of the Qdrant collection holding every user's chunks.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality shared by every chunk and query vector.
    pub embedding_dimension: usize,
    /// Optional override for the embedding endpoint base URL.
    pub embedding_url: Option<String>,
    /// API key for OpenAI-compatible embedding endpoints.
    pub openai_api_key: Option<String>,
    /// Word budget per chunk.
    pub chunk_max_words: usize,
    /// Base URL of the profile service.
    pub profile_service_url: String,
    /// Base URL of the resume generator service.
    pub generator_service_url: String,
    /// Base URL of the scoring and suggestion service.
    pub scoring_service_url: String,
    /// Redis connection string; in-memory stores are used when absent.
    pub redis_url: Option<String>,
    /// Score at which the refinement loop stops early.
    pub agent_target_score: f64,
    /// Number of refinement attempts allowed after the initial generation.
    pub agent_max_refinements: u32,
    /// `top_k` applied when a retrieval request omits one.
    pub retrieval_default_top_k: usize,
    /// What retrieval does for users that were never indexed.
    pub missing_index_policy: MissingIndexPolicy,
    /// Bounded wait applied to every outbound HTTP call.
    pub http_timeout: Duration,
    /// Retries applied to transient transport failures.
    pub http_max_retries: u32,
    /// Base delay of the linear retry backoff.
    pub http_retry_delay: Duration,
    /// Where stale chunk generations are collected.
    pub index_gc_mode: GcMode,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI-compatible embeddings API.
    OpenAI,
    /// Deterministic feature-hashing embedder that needs no network.
    Hashing,
}

/// Behavior of retrieval when a user has never been indexed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissingIndexPolicy {
    /// Reject with a not-found error and require an explicit index call.
    FailFast,
    /// Index the profile namespace first, then search.
    AutoIndex,
}

/// Scheduling of stale-generation garbage collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcMode {
    /// Collect in a detached task after the pointer flip.
    Background,
    /// Collect before the indexing call returns.
    Inline,
}

/// Valid range for `AGENT_TARGET_SCORE`.
pub const TARGET_SCORE_RANGE: std::ops::RangeInclusive<f64> = 0.5..=1.0;
/// Valid range for `AGENT_MAX_REFINEMENTS`.
pub const MAX_REFINEMENTS_RANGE: std::ops::RangeInclusive<u32> = 0..=5;

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let load = |key: &str| load_required(&lookup, key);
        let optional = |key: &str| load_optional(&lookup, key);

        let embedding_provider: EmbeddingProvider = parse_required(&lookup, "EMBEDDING_PROVIDER")?;
        let openai_api_key = optional("OPENAI_API_KEY");
        if embedding_provider == EmbeddingProvider::OpenAI && openai_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".into()));
        }

        let embedding_dimension: usize = parse_or(&lookup, "EMBEDDING_DIMENSION", 384)?;
        if embedding_dimension == 0 {
            return Err(invalid("EMBEDDING_DIMENSION", "must be greater than zero"));
        }

        let chunk_max_words: usize = parse_or(&lookup, "CHUNK_MAX_WORDS", 150)?;
        if chunk_max_words == 0 {
            return Err(invalid("CHUNK_MAX_WORDS", "must be greater than zero"));
        }

        let agent_target_score: f64 = parse_or(&lookup, "AGENT_TARGET_SCORE", 0.88)?;
        if !TARGET_SCORE_RANGE.contains(&agent_target_score) {
            return Err(invalid("AGENT_TARGET_SCORE", "must lie between 0.5 and 1.0"));
        }

        let agent_max_refinements: u32 = parse_or(&lookup, "AGENT_MAX_REFINEMENTS", 2)?;
        if !MAX_REFINEMENTS_RANGE.contains(&agent_max_refinements) {
            return Err(invalid("AGENT_MAX_REFINEMENTS", "must lie between 0 and 5"));
        }

        let retrieval_default_top_k: usize = parse_or(&lookup, "RETRIEVAL_DEFAULT_TOP_K", 5)?;
        if !(1..=100).contains(&retrieval_default_top_k) {
            return Err(invalid("RETRIEVAL_DEFAULT_TOP_K", "must lie between 1 and 100"));
        }

        let http_timeout_secs: u64 = parse_or(&lookup, "HTTP_TIMEOUT_SECS", 30)?;
        if http_timeout_secs == 0 {
            return Err(invalid("HTTP_TIMEOUT_SECS", "must be greater than zero"));
        }

        Ok(Self {
            qdrant_url: load("QDRANT_URL")?,
            qdrant_collection_name: load("QDRANT_COLLECTION_NAME")?,
            qdrant_api_key: optional("QDRANT_API_KEY"),
            embedding_provider,
            embedding_model: load("EMBEDDING_MODEL")?,
            embedding_dimension,
            embedding_url: optional("EMBEDDING_URL"),
            openai_api_key,
            chunk_max_words,
            profile_service_url: load("PROFILE_SERVICE_URL")?,
            generator_service_url: load("GENERATOR_SERVICE_URL")?,
            scoring_service_url: load("SCORING_SERVICE_URL")?,
            redis_url: optional("REDIS_URL"),
            agent_target_score,
            agent_max_refinements,
            retrieval_default_top_k,
            missing_index_policy: parse_or(
                &lookup,
                "RETRIEVAL_MISSING_INDEX_POLICY",
                MissingIndexPolicy::FailFast,
            )?,
            http_timeout: Duration::from_secs(http_timeout_secs),
            http_max_retries: parse_or(&lookup, "HTTP_MAX_RETRIES", 2)?,
            http_retry_delay: Duration::from_millis(parse_or(
                &lookup,
                "HTTP_RETRY_DELAY_MS",
                1000,
            )?),
            index_gc_mode: parse_or(&lookup, "INDEX_GC_MODE", GcMode::Background)?,
            server_port: load_optional(&lookup, "SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| invalid("SERVER_PORT", "expected a port number"))
                })
                .transpose()?,
        })
    }

    /// Retry policy applied by every outbound HTTP client.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.http_max_retries,
            base_delay: self.http_retry_delay,
        }
    }
}

fn load_required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    load_optional(lookup, key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_required<F, T>(lookup: &F, key: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    load_required(lookup, key)?
        .parse()
        .map_err(|err: T::Err| invalid(key, &err.to_string()))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match load_optional(lookup, key) {
        Some(value) => value
            .parse()
            .map_err(|err: T::Err| invalid(key, &err.to_string())),
        None => Ok(default),
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

impl FromStr for EmbeddingProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hashing" => Ok(Self::Hashing),
            other => Err(format!("unknown embedding provider '{other}'")),
        }
    }
}

impl FromStr for MissingIndexPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail_fast" => Ok(Self::FailFast),
            "auto_index" => Ok(Self::AutoIndex),
            other => Err(format!("expected fail_fast or auto_index, got '{other}'")),
        }
    }
}

impl FromStr for GcMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "background" => Ok(Self::Background),
            "inline" => Ok(Self::Inline),
            other => Err(format!("expected background or inline, got '{other}'")),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Load configuration from the environment (and `.env`) and install it in the global cache.
///
/// Only process entry points call this; library components receive configuration explicitly.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        collection = %config.qdrant_collection_name,
        server_port = ?config.server_port,
        embedding_provider = ?config.embedding_provider,
        missing_index_policy = ?config.missing_index_policy,
        redis = config.redis_url.is_some(),
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}
