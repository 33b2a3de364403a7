//! Per-user index status: last-indexed timestamp plus the live chunk generation of each scope.
//!
//! A scope is a namespace (`profile`) or a single edited section (`section:{id}`). Indexing
//! writes chunks under a fresh generation and then publishes it here in one write, so readers
//! only ever see one complete generation per scope.

use crate::error::ErrorKind;
use crate::store::Namespace;
use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tokio::sync::OnceCell;

/// Age after which an index is reported as stale.
pub const STALE_AFTER: Duration = Duration::days(7);

const LAST_INDEXED_FIELD: &str = "last_indexed_at";
const GENERATION_PREFIX: &str = "gen:";

/// Errors raised by index status stores.
#[derive(Debug, Error)]
pub enum IndexStatusError {
    /// Redis command failed.
    #[error("Index status backend failed: {0}")]
    Redis(#[from] redis::RedisError),
    /// Stored record could not be decoded.
    #[error("Corrupt index status for user {user_id}: {reason}")]
    Corrupt {
        /// Affected user.
        user_id: String,
        /// What failed to decode.
        reason: String,
    },
    /// Local state could not be accessed.
    #[error("Index status store unavailable: {0}")]
    Unavailable(String),
}

impl IndexStatusError {
    /// Classify the failure for callers.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Redis(_) | Self::Unavailable(_) => ErrorKind::UpstreamUnavailable,
            Self::Corrupt { .. } => ErrorKind::MalformedUpstreamOutput,
        }
    }
}

/// Live generation of one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationPointer {
    /// Namespace the generation's chunks live in.
    pub namespace: Namespace,
    /// Generation identifier stamped on the chunks.
    pub generation: String,
}

/// Index status of one user.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStatus {
    /// Time of the last successful indexing run.
    pub last_indexed_at: OffsetDateTime,
    /// Live generation per scope.
    pub generations: BTreeMap<String, GenerationPointer>,
}

impl IndexStatus {
    /// Whether the last successful run is older than [`STALE_AFTER`].
    pub fn is_stale(&self, now: OffsetDateTime) -> bool {
        now - self.last_indexed_at > STALE_AFTER
    }

    /// Live generations, optionally restricted to one namespace.
    pub fn live_generations(&self, namespace: Option<Namespace>) -> Vec<String> {
        self.generations
            .values()
            .filter(|pointer| namespace.is_none_or(|ns| pointer.namespace == ns))
            .map(|pointer| pointer.generation.clone())
            .collect()
    }
}

/// Scope key of a whole namespace.
pub fn namespace_scope(namespace: Namespace) -> String {
    namespace.as_str().to_string()
}

/// Scope key of one edited section.
pub fn section_scope(section_id: &str) -> String {
    format!("section:{section_id}")
}

/// Durable per-user index status.
#[async_trait]
pub trait IndexStatusStore: Send + Sync {
    /// Status of `user_id`, or `None` if the user was never indexed.
    async fn get(&self, user_id: &str) -> Result<Option<IndexStatus>, IndexStatusError>;

    /// Atomically make `pointer` the live generation of `scope` and stamp `at`.
    async fn publish_generation(
        &self,
        user_id: &str,
        scope: &str,
        pointer: GenerationPointer,
        at: OffsetDateTime,
    ) -> Result<(), IndexStatusError>;

    /// Drop the pointer of `scope`, returning it if one existed.
    async fn retire_scope(
        &self,
        user_id: &str,
        scope: &str,
    ) -> Result<Option<GenerationPointer>, IndexStatusError>;
}

/// Process-local index status store.
#[derive(Default)]
pub struct InMemoryIndexStatusStore {
    statuses: RwLock<HashMap<String, IndexStatus>>,
}

impl InMemoryIndexStatusStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a user's status, e.g. to simulate an old index.
    pub fn put(&self, user_id: &str, status: IndexStatus) -> Result<(), IndexStatusError> {
        self.statuses
            .write()
            .map_err(|_| poisoned())?
            .insert(user_id.to_string(), status);
        Ok(())
    }
}

fn poisoned() -> IndexStatusError {
    IndexStatusError::Unavailable("index status lock poisoned".into())
}

#[async_trait]
impl IndexStatusStore for InMemoryIndexStatusStore {
    async fn get(&self, user_id: &str) -> Result<Option<IndexStatus>, IndexStatusError> {
        Ok(self
            .statuses
            .read()
            .map_err(|_| poisoned())?
            .get(user_id)
            .cloned())
    }

    async fn publish_generation(
        &self,
        user_id: &str,
        scope: &str,
        pointer: GenerationPointer,
        at: OffsetDateTime,
    ) -> Result<(), IndexStatusError> {
        let mut statuses = self.statuses.write().map_err(|_| poisoned())?;
        let status = statuses
            .entry(user_id.to_string())
            .or_insert_with(|| IndexStatus {
                last_indexed_at: at,
                generations: BTreeMap::new(),
            });
        status.last_indexed_at = at;
        status.generations.insert(scope.to_string(), pointer);
        Ok(())
    }

    async fn retire_scope(
        &self,
        user_id: &str,
        scope: &str,
    ) -> Result<Option<GenerationPointer>, IndexStatusError> {
        let mut statuses = self.statuses.write().map_err(|_| poisoned())?;
        Ok(statuses
            .get_mut(user_id)
            .and_then(|status| status.generations.remove(scope)))
    }
}

/// Redis-backed index status store: one hash per user at `index_status:{user_id}`.
pub struct RedisIndexStatusStore {
    client: redis::Client,
    connection: OnceCell<redis::aio::MultiplexedConnection>,
}

impl RedisIndexStatusStore {
    /// Build a store on top of an opened Redis client.
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            connection: OnceCell::new(),
        }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, IndexStatusError> {
        let connection = self
            .connection
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await?;
        Ok(connection.clone())
    }

    fn key(user_id: &str) -> String {
        format!("index_status:{user_id}")
    }
}

/// Decode the hash fields of one user's status.
fn decode_status(
    user_id: &str,
    fields: HashMap<String, String>,
) -> Result<Option<IndexStatus>, IndexStatusError> {
    let corrupt = |reason: String| IndexStatusError::Corrupt {
        user_id: user_id.to_string(),
        reason,
    };
    let Some(raw) = fields.get(LAST_INDEXED_FIELD) else {
        return Ok(None);
    };
    let last_indexed_at = OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|err| corrupt(format!("{LAST_INDEXED_FIELD} '{raw}': {err}")))?;

    let mut generations = BTreeMap::new();
    for (field, value) in &fields {
        if let Some(scope) = field.strip_prefix(GENERATION_PREFIX) {
            let pointer: GenerationPointer = serde_json::from_str(value)
                .map_err(|err| corrupt(format!("pointer for scope {scope}: {err}")))?;
            generations.insert(scope.to_string(), pointer);
        }
    }

    Ok(Some(IndexStatus {
        last_indexed_at,
        generations,
    }))
}

fn encode_timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[async_trait]
impl IndexStatusStore for RedisIndexStatusStore {
    async fn get(&self, user_id: &str) -> Result<Option<IndexStatus>, IndexStatusError> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = conn.hgetall(Self::key(user_id)).await?;
        decode_status(user_id, fields)
    }

    async fn publish_generation(
        &self,
        user_id: &str,
        scope: &str,
        pointer: GenerationPointer,
        at: OffsetDateTime,
    ) -> Result<(), IndexStatusError> {
        let encoded = serde_json::to_string(&pointer).map_err(|err| IndexStatusError::Corrupt {
            user_id: user_id.to_string(),
            reason: err.to_string(),
        })?;
        let mut conn = self.connection().await?;
        // A single HSET with both fields is applied atomically.
        let _: () = conn
            .hset_multiple(
                Self::key(user_id),
                &[
                    (LAST_INDEXED_FIELD.to_string(), encode_timestamp(at)),
                    (format!("{GENERATION_PREFIX}{scope}"), encoded),
                ],
            )
            .await?;
        Ok(())
    }

    async fn retire_scope(
        &self,
        user_id: &str,
        scope: &str,
    ) -> Result<Option<GenerationPointer>, IndexStatusError> {
        let key = Self::key(user_id);
        let field = format!("{GENERATION_PREFIX}{scope}");
        let mut conn = self.connection().await?;
        let (previous, _removed): (Option<String>, i64) = redis::pipe()
            .atomic()
            .hget(&key, &field)
            .hdel(&key, &field)
            .query_async(&mut conn)
            .await?;
        previous
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|err| IndexStatusError::Corrupt {
                    user_id: user_id.to_string(),
                    reason: err.to_string(),
                })
            })
            .transpose()
    }
}
