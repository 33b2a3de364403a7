use std::{sync::Arc, time::Duration};

use httpmock::{
    Method::{GET, POST},
    MockServer,
};
use resume_forge::{
    agent::{AgentAction, KeywordPlanner, TurnRequest},
    config::GcMode,
    context::{ServiceContext, ServiceParts, ServiceSettings},
    embedding::{Embedder, HashingEmbeddingClient},
    error::ErrorKind,
    generation::HttpResumeGenerator,
    index_status::InMemoryIndexStatusStore,
    processing::{IndexingError, RetrievalQuery, RetrievalRequest, USER_EDITED_SOURCE},
    profile::HttpProfileSource,
    refinement::{RefinementRequest, RefinementStatus},
    scoring::HttpScoringClient,
    session::{InMemorySessionStore, SessionStore},
    store::{InMemoryChunkStore, Namespace},
    transport::{HttpTransport, RetryPolicy},
};
use serde_json::json;

const DIMENSION: usize = 64;
const JOB: &str = "Senior platform engineer: rust, kubernetes, observability";

struct Harness {
    context: ServiceContext,
    sessions: Arc<InMemorySessionStore>,
    chunks: Arc<InMemoryChunkStore>,
}

fn harness(server: &MockServer) -> Harness {
    let transport =
        HttpTransport::new(Duration::from_secs(5), RetryPolicy::immediate(0)).expect("transport");
    let scoring = Arc::new(HttpScoringClient::new(transport.clone(), server.base_url()));
    let sessions = Arc::new(InMemorySessionStore::new());
    let chunks = Arc::new(InMemoryChunkStore::new());
    let parts = ServiceParts {
        profiles: Arc::new(HttpProfileSource::new(transport.clone(), server.base_url())),
        embedder: Embedder::new(Arc::new(HashingEmbeddingClient::new(DIMENSION)), DIMENSION),
        chunks: chunks.clone(),
        index_status: Arc::new(InMemoryIndexStatusStore::new()),
        sessions: sessions.clone(),
        generator: Arc::new(HttpResumeGenerator::new(transport, server.base_url())),
        scorer: scoring.clone(),
        suggestions: scoring,
        planner: Arc::new(KeywordPlanner),
    };
    let settings = ServiceSettings {
        gc_mode: GcMode::Inline,
        ..ServiceSettings::default()
    };
    Harness {
        context: ServiceContext::from_parts(parts, settings),
        sessions,
        chunks,
    }
}

fn generated(document: serde_json::Value) -> serde_json::Value {
    json!({
        "generated_text": format!("```json\n{document}\n```"),
        "raw_prompt": "prompt",
        "retrieval_mode": "profile",
        "section_id": null
    })
}

/// First draft misses `kubernetes`; the replanned draft covers it and clears the target.
async fn mock_generation_and_scoring(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/generate/full")
                .json_body(json!({ "user_id": "u1", "job_description": JOB }));
            then.status(200)
                .json_body(generated(json!({ "summary": "Rust engineer." })));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/generate/full")
                .body_contains("IMPORTANT");
            then.status(200).json_body(generated(json!({
                "summary": "Rust engineer with Kubernetes.",
                "skills": { "technical": ["Rust", "Kubernetes"] }
            })));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/score").body_contains("Rust engineer.\"");
            then.status(200).json_body(json!({
                "final_score": 0.61,
                "semantic_score": 0.7,
                "keyword_score": 0.5,
                "missing_keywords": ["kubernetes", "observability"]
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/score").body_contains("with Kubernetes");
            then.status(200).json_body(json!({
                "final_score": 0.93,
                "semantic_score": 0.9,
                "keyword_score": 0.95,
                "missing_keywords": []
            }));
        })
        .await;
}

#[tokio::test]
async fn profile_index_retrieve_and_section_lifecycle() {
    let server = MockServer::start_async().await;
    let profile = server
        .mock_async(|when, then| {
            when.method(GET).path("/profiles/u1");
            then.status(200).json_body(json!({
                "Summary": "Platform engineer operating Kubernetes clusters.",
                "Skills": ["Rust", "Terraform"],
                "Experience": [{ "title": "SRE", "description": "Ran observability for 40 services." }]
            }));
        })
        .await;
    let Harness { context, chunks, .. } = harness(&server);

    let first = context
        .indexing
        .reindex_namespace("u1", Namespace::Profile)
        .await
        .expect("first index");
    assert_eq!(first.chunk_count, 3);
    let second = context
        .indexing
        .reindex_namespace("u1", Namespace::Profile)
        .await
        .expect("second index");
    assert_ne!(first.generation, second.generation);
    assert_eq!(second.collected, Some(3));
    assert_eq!(chunks.len(), 3);
    profile.assert_hits_async(2).await;

    let outcome = context
        .retriever
        .retrieve(RetrievalRequest {
            user_id: "u1".into(),
            namespace: Namespace::Profile,
            query: RetrievalQuery::Text("kubernetes".into()),
            top_k: Some(10),
            section_ids: Vec::new(),
        })
        .await
        .expect("retrieve");
    assert_eq!(outcome.chunks.len(), 3);
    assert!(!outcome.stale);
    assert!(
        outcome
            .chunks
            .windows(2)
            .all(|pair| pair[0].score >= pair[1].score)
    );

    let section = context
        .indexing
        .reindex_section("u1", "summary", "Led the migration to Kubernetes.")
        .await
        .expect("section index");
    assert_eq!(section.chunk_ids.len(), 1);

    let section_query = RetrievalRequest {
        user_id: "u1".into(),
        namespace: Namespace::ResumeSections,
        query: RetrievalQuery::Text("migration".into()),
        top_k: None,
        section_ids: vec!["summary".into()],
    };
    let hits = context
        .retriever
        .retrieve(section_query.clone())
        .await
        .expect("section retrieve");
    assert_eq!(hits.chunks.len(), 1);
    assert_eq!(hits.chunks[0].source_type, USER_EDITED_SOURCE);
    assert_eq!(hits.chunks[0].chunk_id, section.chunk_ids[0]);

    let deleted = context
        .indexing
        .delete_section("u1", "summary")
        .await
        .expect("delete");
    assert!(deleted >= 1);
    let after = context
        .retriever
        .retrieve(section_query)
        .await
        .expect("retrieve after delete");
    assert!(after.chunks.is_empty());
}

#[tokio::test]
async fn missing_profile_writes_nothing() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/profiles/ghost");
            then.status(404);
        })
        .await;
    let Harness { context, chunks, .. } = harness(&server);

    let error = context
        .indexing
        .reindex_namespace("ghost", Namespace::Profile)
        .await
        .expect_err("missing profile");
    assert!(matches!(error, IndexingError::ProfileNotFound { .. }));
    assert_eq!(error.kind(), ErrorKind::NotFound);
    assert!(chunks.is_empty());
}

#[tokio::test]
async fn refinement_replans_until_target() {
    let server = MockServer::start_async().await;
    mock_generation_and_scoring(&server).await;
    let Harness { context, .. } = harness(&server);

    let outcome = context
        .refinement
        .run(RefinementRequest {
            user_id: "u1".into(),
            job_description: JOB.into(),
            target_score: None,
            max_refinements: None,
            keep_partial_on_failure: false,
        })
        .await
        .expect("refinement");

    assert_eq!(outcome.status, RefinementStatus::TargetReached);
    assert_eq!(outcome.history.len(), 2);
    assert!((outcome.final_score - 0.93).abs() < f64::EPSILON);
    assert!(outcome.history.iter().all(|step| step.accepted));
    assert!(outcome.final_draft.get("skills").is_some());
    assert_eq!(context.metrics.snapshot().refinement_attempts, 2);
}

#[tokio::test]
async fn malformed_generation_is_reported_with_stage() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/generate/full");
            then.status(200).json_body(json!({
                "generated_text": "Sorry, I cannot help with that.",
                "raw_prompt": "prompt",
                "retrieval_mode": "profile",
                "section_id": null
            }));
        })
        .await;
    let Harness { context, .. } = harness(&server);

    let error = context
        .refinement
        .run(RefinementRequest {
            user_id: "u1".into(),
            job_description: JOB.into(),
            target_score: None,
            max_refinements: None,
            keep_partial_on_failure: true,
        })
        .await
        .expect_err("malformed output");

    assert_eq!(error.kind(), ErrorKind::MalformedUpstreamOutput);
    assert_eq!(error.partial_history().map(<[_]>::len), Some(0));
}

#[tokio::test]
async fn conversation_builds_then_rewrites_a_section() {
    let server = MockServer::start_async().await;
    mock_generation_and_scoring(&server).await;
    let section = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/generate/section")
                .json_body_partial(r#"{ "section_id": "summary", "existing_text": "Rust engineer with Kubernetes." }"#);
            then.status(200).json_body(generated(json!({
                "summary": "Rust engineer running Kubernetes with strong observability."
            })));
        })
        .await;
    let Harness {
        context, sessions, ..
    } = harness(&server);

    let built = context
        .agent
        .handle_turn(TurnRequest {
            session_id: "s1".into(),
            user_message: "Build my resume for this job".into(),
            user_id: Some("u1".into()),
            job_description: Some(JOB.into()),
        })
        .await
        .expect("build turn");
    assert_eq!(built.action, AgentAction::BuildResume);
    assert!(built.agent_response.contains("target reached"));

    let rewritten = context
        .agent
        .handle_turn(TurnRequest {
            session_id: "s1".into(),
            user_message: "Please rewrite the summary".into(),
            user_id: None,
            job_description: None,
        })
        .await
        .expect("rewrite turn");
    section.assert_async().await;
    assert_eq!(
        rewritten.action,
        AgentAction::RewriteSection {
            section: "summary".into()
        }
    );
    assert!(rewritten.resume_state.get("skills").is_some());

    let stored = sessions
        .get("s1")
        .await
        .expect("session read")
        .expect("session present");
    assert_eq!(stored.version, 3);
    assert_eq!(stored.resume_state, rewritten.resume_state);

    let hits = context
        .retriever
        .retrieve(RetrievalRequest {
            user_id: "u1".into(),
            namespace: Namespace::ResumeSections,
            query: RetrievalQuery::Text("observability".into()),
            top_k: None,
            section_ids: vec!["summary".into()],
        })
        .await
        .expect("section retrieve");
    assert_eq!(hits.chunks.len(), 1);
    assert!(hits.chunks[0].text.contains("observability"));
}
