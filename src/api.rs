//! HTTP surface for the resume pipeline.
//!
//! - `POST /index/profile/:user_id` – Rebuild a user's profile namespace under a new generation.
//! - `POST /index/:user_id/section` – Re-index one user-edited section (`{section_id, text}`).
//! - `DELETE /index/:user_id/section/:section_id` – Remove every chunk of a section.
//! - `POST /retrieve/:user_id` – Similarity search over the live generations of a namespace.
//! - `POST /refine` – Run the generate, score, and replan loop for a job description.
//! - `POST /v1/chat` – One conversational turn against a versioned session.
//! - `GET /health`, `GET /metrics`, `GET /commands` – Liveness, counters, and discovery.
//!
//! Failures are rendered as `{"error": {"kind", "message"}}` with a status derived from the
//! [`ErrorKind`] of the underlying error.

use crate::{
    agent::{AgentError, COMMANDS, CommandInfo, TurnOutcome, TurnRequest},
    context::ServiceContext,
    error::ErrorKind,
    metrics::MetricsSnapshot,
    processing::{
        IndexReport, IndexingError, RetrievalError, RetrievalOutcome, RetrievalQuery,
        RetrievalRequest, SectionIndexReport,
    },
    refinement::{RefinementError, RefinementOutcome, RefinementRequest, RefinementStep},
    store::Namespace,
};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Build the HTTP router over a wired service context.
pub fn create_router(context: Arc<ServiceContext>) -> Router {
    Router::new()
        .route("/index/profile/:user_id", post(index_profile))
        .route("/index/:user_id/section", post(index_section))
        .route("/index/:user_id/section/:section_id", delete(delete_section))
        .route("/retrieve/:user_id", post(retrieve))
        .route("/refine", post(refine))
        .route("/v1/chat", post(chat))
        .route("/health", get(health))
        .route("/metrics", get(get_metrics))
        .route("/commands", get(get_commands))
        .with_state(context)
}

/// Optional body for `POST /index/profile/:user_id`.
#[derive(Deserialize, Default)]
struct IndexProfileRequest {
    /// Namespace to rebuild (defaults to `profile`).
    #[serde(default)]
    namespace: Option<Namespace>,
}

async fn index_profile(
    State(context): State<Arc<ServiceContext>>,
    Path(user_id): Path<String>,
    body: Option<Json<IndexProfileRequest>>,
) -> Result<Json<IndexReport>, AppError> {
    let Json(request) = body.unwrap_or_default();
    let namespace = request.namespace.unwrap_or(Namespace::Profile);
    let report = context.indexing.reindex_namespace(&user_id, namespace).await?;
    Ok(Json(report))
}

/// Body for `POST /index/:user_id/section`.
#[derive(Deserialize)]
struct IndexSectionRequest {
    section_id: String,
    text: String,
}

async fn index_section(
    State(context): State<Arc<ServiceContext>>,
    Path(user_id): Path<String>,
    Json(request): Json<IndexSectionRequest>,
) -> Result<Json<SectionIndexReport>, AppError> {
    let report = context
        .indexing
        .reindex_section(&user_id, &request.section_id, &request.text)
        .await?;
    Ok(Json(report))
}

/// Response body for `DELETE /index/:user_id/section/:section_id`.
#[derive(Serialize)]
struct DeleteSectionResponse {
    section_id: String,
    deleted: usize,
}

async fn delete_section(
    State(context): State<Arc<ServiceContext>>,
    Path((user_id, section_id)): Path<(String, String)>,
) -> Result<Json<DeleteSectionResponse>, AppError> {
    let deleted = context.indexing.delete_section(&user_id, &section_id).await?;
    Ok(Json(DeleteSectionResponse {
        section_id,
        deleted,
    }))
}

/// Body for `POST /retrieve/:user_id`. Exactly one of `query` and `embedding` is required.
#[derive(Deserialize)]
struct RetrieveRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    namespace: Option<Namespace>,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    section_ids: Vec<String>,
}

async fn retrieve(
    State(context): State<Arc<ServiceContext>>,
    Path(user_id): Path<String>,
    Json(request): Json<RetrieveRequest>,
) -> Result<Json<RetrievalOutcome>, AppError> {
    let query = match (request.query, request.embedding) {
        (Some(text), None) => RetrievalQuery::Text(text),
        (None, Some(vector)) => RetrievalQuery::Embedding(vector),
        _ => {
            return Err(AppError::validation(
                "provide exactly one of `query` or `embedding`",
            ));
        }
    };
    let outcome = context
        .retriever
        .retrieve(RetrievalRequest {
            user_id,
            namespace: request.namespace.unwrap_or(Namespace::Profile),
            query,
            top_k: request.top_k,
            section_ids: request.section_ids,
        })
        .await?;
    Ok(Json(outcome))
}

/// Response body for `POST /refine`.
#[derive(Serialize)]
struct RefineResponse {
    /// Human readable termination reason.
    message: String,
    #[serde(flatten)]
    outcome: RefinementOutcome,
}

async fn refine(
    State(context): State<Arc<ServiceContext>>,
    Json(request): Json<RefinementRequest>,
) -> Result<Json<RefineResponse>, AppError> {
    let outcome = context.refinement.run(request).await?;
    Ok(Json(RefineResponse {
        message: outcome.status.to_string(),
        outcome,
    }))
}

async fn chat(
    State(context): State<Arc<ServiceContext>>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnOutcome>, AppError> {
    let outcome = context.agent.handle_turn(request).await?;
    Ok(Json(outcome))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_metrics(State(context): State<Arc<ServiceContext>>) -> Json<MetricsSnapshot> {
    Json(context.metrics.snapshot())
}

/// Descriptor for a single endpoint in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
    /// Actions the conversational endpoint understands.
    chat_actions: &'static [CommandInfo],
}

/// Enumerate supported HTTP commands and chat actions for discovery.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "index_profile",
                method: "POST",
                path: "/index/profile/:user_id",
                description: "Chunk, embed, and store the user's profile under a fresh generation, then collect the previous one.",
                request_example: Some(json!({ "namespace": "profile" })),
            },
            CommandDescriptor {
                name: "index_section",
                method: "POST",
                path: "/index/:user_id/section",
                description: "Re-index one user-edited resume section. Returns the new chunk ids.",
                request_example: Some(json!({
                    "section_id": "summary",
                    "text": "Backend engineer with eight years of Rust and Go."
                })),
            },
            CommandDescriptor {
                name: "delete_section",
                method: "DELETE",
                path: "/index/:user_id/section/:section_id",
                description: "Delete every chunk of a section across namespaces.",
                request_example: None,
            },
            CommandDescriptor {
                name: "retrieve",
                method: "POST",
                path: "/retrieve/:user_id",
                description: "Return the top_k chunks most similar to a query text or embedding.",
                request_example: Some(json!({
                    "query": "distributed systems experience",
                    "namespace": "profile",
                    "top_k": 5,
                    "section_ids": []
                })),
            },
            CommandDescriptor {
                name: "refine",
                method: "POST",
                path: "/refine",
                description: "Generate a resume and refine it until it reaches the target score or the attempt budget.",
                request_example: Some(json!({
                    "user_id": "user-123",
                    "job_description": "Senior Rust engineer, Kubernetes, gRPC",
                    "target_score": 0.88,
                    "max_refinements": 2
                })),
            },
            CommandDescriptor {
                name: "chat",
                method: "POST",
                path: "/v1/chat",
                description: "Run one conversational turn. The first turn of a session needs user_id and job_description.",
                request_example: Some(json!({
                    "session_id": "session-1",
                    "user_message": "Build my resume for this job",
                    "user_id": "user-123",
                    "job_description": "Senior Rust engineer, Kubernetes, gRPC"
                })),
            },
            CommandDescriptor {
                name: "health",
                method: "GET",
                path: "/health",
                description: "Liveness probe.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return indexing, retrieval, and refinement counters.",
                request_example: None,
            },
        ],
        chat_actions: &COMMANDS,
    })
}

/// Error rendered as a JSON body with a status derived from its kind.
#[derive(Debug)]
struct AppError {
    kind: ErrorKind,
    message: String,
    partial_history: Option<Vec<RefinementStep>>,
}

impl AppError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            partial_history: None,
        }
    }

    fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::UpstreamUnavailable | ErrorKind::MalformedUpstreamOutput => {
            StatusCode::BAD_GATEWAY
        }
        ErrorKind::InvalidConfiguration => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(self.kind);
        if status.is_server_error() {
            tracing::error!(kind = %self.kind, message = %self.message, "Request failed");
        } else {
            tracing::warn!(kind = %self.kind, message = %self.message, "Request rejected");
        }
        let mut error = json!({ "kind": self.kind, "message": self.message });
        if let Some(history) = self.partial_history {
            error["partial_history"] = json!(history);
        }
        (status, Json(json!({ "error": error }))).into_response()
    }
}

impl From<IndexingError> for AppError {
    fn from(error: IndexingError) -> Self {
        Self::new(error.kind(), error.to_string())
    }
}

impl From<RetrievalError> for AppError {
    fn from(error: RetrievalError) -> Self {
        Self::new(error.kind(), error.to_string())
    }
}

impl From<RefinementError> for AppError {
    fn from(error: RefinementError) -> Self {
        let mut app = Self::new(error.kind(), error.to_string());
        app.partial_history = error.partial_history().map(<[RefinementStep]>::to_vec);
        app
    }
}

impl From<AgentError> for AppError {
    fn from(error: AgentError) -> Self {
        Self::new(error.kind(), error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{create_router, get_commands};
    use crate::{
        agent::KeywordPlanner,
        context::{ServiceContext, ServiceParts, ServiceSettings},
        embedding::{Embedder, HashingEmbeddingClient},
        generation::{GenerationError, GenerationRequest, ResumeDraft, ResumeGenerator, SectionContent},
        index_status::InMemoryIndexStatusStore,
        profile::{InMemoryProfileSource, Profile},
        scoring::{ResumeScorer, ScoreReport, ScoringError, SuggestionProvider},
        session::InMemorySessionStore,
        store::InMemoryChunkStore,
    };
    use async_trait::async_trait;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    const DIMENSION: usize = 32;

    struct StubGenerator;

    #[async_trait]
    impl ResumeGenerator for StubGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<ResumeDraft, GenerationError> {
            let mut draft = ResumeDraft::new();
            match request {
                GenerationRequest::Full { .. } => {
                    draft.insert("summary", SectionContent::Text("Rust engineer.".into()));
                }
                GenerationRequest::Section { section_id, .. } => {
                    draft.insert(section_id.clone(), SectionContent::Text("Rewritten.".into()));
                }
            }
            Ok(draft)
        }
    }

    struct StubScorer;

    #[async_trait]
    impl ResumeScorer for StubScorer {
        async fn score(&self, _job_description: &str, _resume_text: &str) -> Result<ScoreReport, ScoringError> {
            Ok(ScoreReport {
                final_score: 0.95,
                semantic_score: 0.95,
                keyword_score: 0.95,
                missing_keywords: Vec::new(),
            })
        }
    }

    #[async_trait]
    impl SuggestionProvider for StubScorer {
        async fn suggest(&self, _missing_keywords: &[String]) -> Result<Vec<String>, ScoringError> {
            Ok(Vec::new())
        }
    }

    fn test_router() -> Router {
        let profiles = InMemoryProfileSource::new();
        let profile: Profile = serde_json::from_value(json!({
            "summary": "Backend engineer building distributed systems in Rust.",
            "skills": ["Rust", "Kubernetes"]
        }))
        .expect("profile");
        profiles.insert("u1", profile);
        let scorer = Arc::new(StubScorer);
        let context = ServiceContext::from_parts(
            ServiceParts {
                profiles: Arc::new(profiles),
                embedder: Embedder::new(Arc::new(HashingEmbeddingClient::new(DIMENSION)), DIMENSION),
                chunks: Arc::new(InMemoryChunkStore::new()),
                index_status: Arc::new(InMemoryIndexStatusStore::new()),
                sessions: Arc::new(InMemorySessionStore::new()),
                generator: Arc::new(StubGenerator),
                scorer: scorer.clone(),
                suggestions: scorer,
                planner: Arc::new(KeywordPlanner),
            },
            ServiceSettings::default(),
        );
        create_router(Arc::new(context))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, json)
    }

    #[tokio::test]
    async fn commands_catalog_exposes_pipeline_endpoints() {
        let response = get_commands().await;
        let commands = &response.0.commands;
        let retrieve = commands
            .iter()
            .find(|cmd| cmd.name == "retrieve")
            .expect("retrieve command present");

        assert_eq!(retrieve.method, "POST");
        assert_eq!(retrieve.path, "/retrieve/:user_id");
        assert!(commands.iter().any(|cmd| cmd.path == "/v1/chat"));
        assert_eq!(response.0.chat_actions.len(), 7);
    }

    #[tokio::test]
    async fn index_then_retrieve_round_trip() {
        let app = test_router();

        let (status, report) = send(&app, Method::POST, "/index/profile/u1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["chunk_count"], 2);
        assert_eq!(report["namespace"], "profile");

        let (status, body) = send(
            &app,
            Method::POST,
            "/retrieve/u1",
            Some(json!({ "query": "Rust distributed systems", "top_k": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chunks"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["chunks"][0]["user_id"], "u1");
        assert_eq!(body["stale"], false);
    }

    #[tokio::test]
    async fn unknown_profile_maps_to_not_found() {
        let app = test_router();
        let (status, body) = send(&app, Method::POST, "/index/profile/ghost", None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn retrieval_without_index_fails_fast() {
        let app = test_router();
        let (status, body) = send(
            &app,
            Method::POST,
            "/retrieve/u1",
            Some(json!({ "query": "anything" })),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(
            body["error"]["message"]
                .as_str()
                .is_some_and(|message| message.contains("not been indexed"))
        );
    }

    #[tokio::test]
    async fn retrieval_validates_request_shape() {
        let app = test_router();
        let (status, body) = send(&app, Method::POST, "/retrieve/u1", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "validation");

        send(&app, Method::POST, "/index/profile/u1", None).await;
        let (status, _) = send(
            &app,
            Method::POST,
            "/retrieve/u1",
            Some(json!({ "query": "rust", "top_k": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn section_index_and_delete() {
        let app = test_router();
        let (status, report) = send(
            &app,
            Method::POST,
            "/index/u1/section",
            Some(json!({ "section_id": "summary", "text": "Led a team of five engineers." })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["chunk_ids"].as_array().map(Vec::len), Some(1));

        let (status, body) = send(&app, Method::DELETE, "/index/u1/section/summary", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], 1);
    }

    #[tokio::test]
    async fn refine_reports_status_message() {
        let app = test_router();
        let (status, body) = send(
            &app,
            Method::POST,
            "/refine",
            Some(json!({ "user_id": "u1", "job_description": "Rust engineer" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "target_reached");
        assert_eq!(body["message"], "target reached");
        assert_eq!(body["history"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn chat_requires_context_on_first_turn() {
        let app = test_router();
        let (status, _) = send(
            &app,
            Method::POST,
            "/v1/chat",
            Some(json!({ "session_id": "s1", "user_message": "build it" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            Method::POST,
            "/v1/chat",
            Some(json!({
                "session_id": "s1",
                "user_message": "Build my resume",
                "user_id": "u1",
                "job_description": "Rust engineer"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["action"]["name"], "build_resume");
        assert_eq!(body["resume_state"]["summary"], "Rust engineer.");
    }

    #[tokio::test]
    async fn health_and_metrics_respond() {
        let app = test_router();
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        send(&app, Method::POST, "/index/profile/u1", None).await;
        let (status, body) = send(&app, Method::GET, "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["profiles_indexed"], 1);
        assert_eq!(body["chunks_indexed"], 2);
    }
}
