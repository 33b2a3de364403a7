//! Versioned conversation state keyed by session id.
//!
//! Every stored context carries a version that starts at 1. Writers supply the version they
//! read; a write against any other version is rejected with
//! [`SessionError::VersionConflict`], so concurrent turns cannot silently drop each other's
//! draft changes.

use crate::{error::ErrorKind, generation::ResumeDraft};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Mutex};
use thiserror::Error;
use tokio::sync::OnceCell;

/// State of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Conversation identifier.
    pub session_id: String,
    /// User the resume is built for.
    pub user_id: String,
    /// Target job description.
    pub job_description: String,
    /// Latest accepted content per section.
    #[serde(default)]
    pub resume_state: ResumeDraft,
    /// Version of the stored record this context was read from.
    #[serde(default)]
    pub version: u64,
}

/// Errors raised by session stores.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Redis command failed.
    #[error("Session backend failed: {0}")]
    Redis(#[from] redis::RedisError),
    /// `create` was called for an existing session.
    #[error("Session {session_id} already exists")]
    AlreadyExists {
        /// Offending session.
        session_id: String,
    },
    /// `update` was called for a session that does not exist.
    #[error("Session {session_id} not found")]
    NotFound {
        /// Missing session.
        session_id: String,
    },
    /// Stored version differs from the one the writer read.
    #[error("Session {session_id} changed concurrently: expected version {expected}, found {actual}")]
    VersionConflict {
        /// Affected session.
        session_id: String,
        /// Version the writer read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },
    /// Stored record could not be decoded.
    #[error("Corrupt session {session_id}: {reason}")]
    Corrupt {
        /// Affected session.
        session_id: String,
        /// What failed to decode.
        reason: String,
    },
    /// Local state could not be accessed.
    #[error("Session store unavailable: {0}")]
    Unavailable(String),
}

impl SessionError {
    /// Classify the failure for callers.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Redis(_) | Self::Unavailable(_) => ErrorKind::UpstreamUnavailable,
            Self::AlreadyExists { .. } | Self::VersionConflict { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Corrupt { .. } => ErrorKind::MalformedUpstreamOutput,
        }
    }
}

/// Durable session state with optimistic concurrency.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Context of `session_id`, or `None` if the session does not exist.
    async fn get(&self, session_id: &str) -> Result<Option<SessionContext>, SessionError>;

    /// Create a session with an empty draft at version 1.
    async fn create(
        &self,
        session_id: &str,
        user_id: &str,
        job_description: &str,
    ) -> Result<SessionContext, SessionError>;

    /// Overwrite the session if its stored version is still `expected_version`.
    ///
    /// Returns the stored context carrying the incremented version.
    async fn update(
        &self,
        session_id: &str,
        expected_version: u64,
        context: SessionContext,
    ) -> Result<SessionContext, SessionError>;
}

fn fresh_context(session_id: &str, user_id: &str, job_description: &str) -> SessionContext {
    SessionContext {
        session_id: session_id.to_string(),
        user_id: user_id.to_string(),
        job_description: job_description.to_string(),
        resume_state: ResumeDraft::new(),
        version: 1,
    }
}

/// Process-local session store.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SessionContext>>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> SessionError {
    SessionError::Unavailable("session lock poisoned".into())
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionContext>, SessionError> {
        Ok(self
            .sessions
            .lock()
            .map_err(|_| poisoned())?
            .get(session_id)
            .cloned())
    }

    async fn create(
        &self,
        session_id: &str,
        user_id: &str,
        job_description: &str,
    ) -> Result<SessionContext, SessionError> {
        let mut sessions = self.sessions.lock().map_err(|_| poisoned())?;
        if sessions.contains_key(session_id) {
            return Err(SessionError::AlreadyExists {
                session_id: session_id.to_string(),
            });
        }
        let context = fresh_context(session_id, user_id, job_description);
        sessions.insert(session_id.to_string(), context.clone());
        Ok(context)
    }

    async fn update(
        &self,
        session_id: &str,
        expected_version: u64,
        mut context: SessionContext,
    ) -> Result<SessionContext, SessionError> {
        let mut sessions = self.sessions.lock().map_err(|_| poisoned())?;
        let stored = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound {
                session_id: session_id.to_string(),
            })?;
        if stored.version != expected_version {
            return Err(SessionError::VersionConflict {
                session_id: session_id.to_string(),
                expected: expected_version,
                actual: stored.version,
            });
        }
        context.session_id = session_id.to_string();
        context.version = expected_version + 1;
        *stored = context.clone();
        Ok(context)
    }
}

const VERSION_FIELD: &str = "version";
const DATA_FIELD: &str = "data";

/// Creates the hash only when the key is absent. Returns 1 on creation, 0 otherwise.
const CREATE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], 'version', ARGV[1], 'data', ARGV[2])
return 1
";

/// Compare-and-set on the version field.
/// Returns {1, new} on success, {0, current} on conflict, {-1, 0} when missing.
const UPDATE_SCRIPT: &str = r"
local current = redis.call('HGET', KEYS[1], 'version')
if not current then
  return {-1, 0}
end
if tonumber(current) ~= tonumber(ARGV[1]) then
  return {0, tonumber(current)}
end
local next = tonumber(current) + 1
redis.call('HSET', KEYS[1], 'version', next, 'data', ARGV[2])
return {1, next}
";

/// Redis-backed session store: one hash per session at `session_context:{id}`.
pub struct RedisSessionStore {
    client: redis::Client,
    connection: OnceCell<redis::aio::MultiplexedConnection>,
    create_script: redis::Script,
    update_script: redis::Script,
}

impl RedisSessionStore {
    /// Build a store on top of an opened Redis client.
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            connection: OnceCell::new(),
            create_script: redis::Script::new(CREATE_SCRIPT),
            update_script: redis::Script::new(UPDATE_SCRIPT),
        }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, SessionError> {
        let connection = self
            .connection
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await?;
        Ok(connection.clone())
    }

    fn key(session_id: &str) -> String {
        format!("session_context:{session_id}")
    }
}

fn encode(context: &SessionContext) -> Result<String, SessionError> {
    serde_json::to_string(context).map_err(|err| SessionError::Corrupt {
        session_id: context.session_id.clone(),
        reason: err.to_string(),
    })
}

fn decode(session_id: &str, version: u64, data: &str) -> Result<SessionContext, SessionError> {
    let mut context: SessionContext =
        serde_json::from_str(data).map_err(|err| SessionError::Corrupt {
            session_id: session_id.to_string(),
            reason: err.to_string(),
        })?;
    context.session_id = session_id.to_string();
    context.version = version;
    Ok(context)
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionContext>, SessionError> {
        let mut conn = self.connection().await?;
        let (version, data): (Option<u64>, Option<String>) = redis::cmd("HMGET")
            .arg(Self::key(session_id))
            .arg(VERSION_FIELD)
            .arg(DATA_FIELD)
            .query_async(&mut conn)
            .await?;
        match (version, data) {
            (Some(version), Some(data)) => decode(session_id, version, &data).map(Some),
            (None, None) => Ok(None),
            _ => Err(SessionError::Corrupt {
                session_id: session_id.to_string(),
                reason: "version and data fields out of step".into(),
            }),
        }
    }

    async fn create(
        &self,
        session_id: &str,
        user_id: &str,
        job_description: &str,
    ) -> Result<SessionContext, SessionError> {
        let context = fresh_context(session_id, user_id, job_description);
        let payload = encode(&context)?;
        let mut conn = self.connection().await?;
        let created: i64 = self
            .create_script
            .key(Self::key(session_id))
            .arg(context.version)
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;
        if created == 1 {
            tracing::debug!(session_id, "Session created");
            Ok(context)
        } else {
            Err(SessionError::AlreadyExists {
                session_id: session_id.to_string(),
            })
        }
    }

    async fn update(
        &self,
        session_id: &str,
        expected_version: u64,
        mut context: SessionContext,
    ) -> Result<SessionContext, SessionError> {
        context.session_id = session_id.to_string();
        let payload = encode(&context)?;
        let mut conn = self.connection().await?;
        let (status, version): (i64, i64) = self
            .update_script
            .key(Self::key(session_id))
            .arg(expected_version)
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;
        match status {
            1 => {
                context.version = u64::try_from(version).unwrap_or(expected_version + 1);
                Ok(context)
            }
            0 => Err(SessionError::VersionConflict {
                session_id: session_id.to_string(),
                expected: expected_version,
                actual: u64::try_from(version).unwrap_or_default(),
            }),
            _ => Err(SessionError::NotFound {
                session_id: session_id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::SectionContent;

    #[tokio::test]
    async fn create_starts_at_version_one_and_refuses_duplicates() {
        let store = InMemorySessionStore::new();
        assert!(store.get("s1").await.expect("get").is_none());

        let context = store.create("s1", "u1", "Rust role").await.expect("create");
        assert_eq!(context.version, 1);
        assert!(context.resume_state.is_empty());

        let error = store.create("s1", "u2", "Other").await.expect_err("duplicate");
        assert!(matches!(error, SessionError::AlreadyExists { .. }));
        assert_eq!(store.get("s1").await.expect("get").map(|ctx| ctx.user_id), Some("u1".into()));
    }

    #[tokio::test]
    async fn stale_writer_is_rejected() {
        let store = InMemorySessionStore::new();
        let original = store.create("s1", "u1", "Rust role").await.expect("create");

        let mut first = original.clone();
        first.resume_state.insert("summary", SectionContent::Text("A".into()));
        let stored = store.update("s1", original.version, first).await.expect("first");
        assert_eq!(stored.version, 2);

        let mut second = original.clone();
        second.resume_state.insert("skills", SectionContent::Items(vec!["Rust".into()]));
        let error = store
            .update("s1", original.version, second)
            .await
            .expect_err("conflict");
        assert!(matches!(
            error,
            SessionError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));

        let current = store.get("s1").await.expect("get").expect("session");
        assert!(current.resume_state.get("summary").is_some());
        assert!(current.resume_state.get("skills").is_none());
    }

    #[tokio::test]
    async fn updating_unknown_session_is_not_found() {
        let store = InMemorySessionStore::new();
        let context = fresh_context("ghost", "u1", "jd");
        let error = store.update("ghost", 1, context).await.expect_err("missing");
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn redis_records_decode_with_stored_version() {
        let data = r#"{"session_id":"old","user_id":"u1","job_description":"jd","resume_state":{"summary":"Hi"}}"#;
        let context = decode("s1", 4, data).expect("decode");
        assert_eq!(context.session_id, "s1");
        assert_eq!(context.version, 4);
        assert_eq!(context.resume_state.get("summary"), Some(&SectionContent::Text("Hi".into())));

        assert!(matches!(decode("s1", 1, "not json"), Err(SessionError::Corrupt { .. })));
    }
}
