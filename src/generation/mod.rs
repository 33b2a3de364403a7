//! Resume generation capability: request types, draft model, and the generator service client.

mod draft;

pub use draft::{CANONICAL_SECTIONS, ResumeDraft, SectionContent, strip_json_fences};

use crate::error::ErrorKind;
use crate::transport::{HttpTransport, TransportError, format_endpoint};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by resume generators.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Generator service could not be reached or rejected the request.
    #[error("Generation request failed: {0}")]
    Transport(#[from] TransportError),
    /// Generator answered with content that is not a resume document.
    #[error("Generator returned malformed content: {0}")]
    MalformedOutput(String),
}

impl GenerationError {
    /// Classify the failure for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(error) => error.kind(),
            Self::MalformedOutput(_) => ErrorKind::MalformedUpstreamOutput,
        }
    }
}

/// What to generate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GenerationRequest {
    /// A complete resume for the job description.
    Full {
        /// User whose profile grounds the resume.
        user_id: String,
        /// Job description steering generation; may carry refinement instructions.
        job_description: String,
    },
    /// One rewritten section.
    Section {
        /// User whose profile grounds the section.
        user_id: String,
        /// Job description steering generation.
        job_description: String,
        /// Section to produce.
        section_id: String,
        /// Current content of the section, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        existing_text: Option<String>,
    },
}

impl GenerationRequest {
    fn endpoint(&self) -> &'static str {
        match self {
            Self::Full { .. } => "generate/full",
            Self::Section { .. } => "generate/section",
        }
    }
}

/// Produces resume drafts grounded in a user's indexed profile.
#[async_trait]
pub trait ResumeGenerator: Send + Sync {
    /// Generate the requested content. Section requests yield a draft holding that section.
    async fn generate(&self, request: &GenerationRequest) -> Result<ResumeDraft, GenerationError>;
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    generated_text: String,
    #[serde(default)]
    retrieval_mode: Option<String>,
    #[serde(default)]
    section_id: Option<String>,
}

/// Client for the generator service (`POST /generate/full`, `POST /generate/section`).
pub struct HttpResumeGenerator {
    transport: HttpTransport,
    base_url: String,
}

impl HttpResumeGenerator {
    /// Build a client for the generator service at `base_url`.
    pub fn new(transport: HttpTransport, base_url: String) -> Self {
        Self {
            transport,
            base_url,
        }
    }
}

#[async_trait]
impl ResumeGenerator for HttpResumeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<ResumeDraft, GenerationError> {
        let url = format_endpoint(&self.base_url, request.endpoint());
        let response: GenerateResponse = self.transport.post_json(&url, request).await?;
        tracing::debug!(
            %url,
            retrieval_mode = response.retrieval_mode.as_deref().unwrap_or("unknown"),
            section_id = response.section_id.as_deref().unwrap_or("-"),
            "Generator responded"
        );
        parse_generated(&response.generated_text)
    }
}

/// Parse generated JSON, tolerating Markdown code fences.
pub fn parse_generated(raw: &str) -> Result<ResumeDraft, GenerationError> {
    serde_json::from_str(strip_json_fences(raw)).map_err(|error| {
        tracing::error!(raw = %raw, error = %error, "Generated content is not a resume document");
        GenerationError::MalformedOutput(error.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RetryPolicy;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;
    use std::time::Duration;

    fn generator(server: &MockServer) -> HttpResumeGenerator {
        let transport =
            HttpTransport::new(Duration::from_secs(5), RetryPolicy::immediate(0)).expect("transport");
        HttpResumeGenerator::new(transport, server.base_url())
    }

    #[tokio::test]
    async fn full_generation_parses_fenced_json() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/generate/full")
                    .json_body(json!({ "user_id": "u1", "job_description": "Rust role" }));
                then.status(200).json_body(json!({
                    "generated_text": "```json\n{\"summary\": \"Rust engineer.\"}\n```",
                    "raw_prompt": "prompt",
                    "retrieval_mode": "full"
                }));
            })
            .await;

        let draft = generator(&server)
            .generate(&GenerationRequest::Full {
                user_id: "u1".into(),
                job_description: "Rust role".into(),
            })
            .await
            .expect("draft");

        mock.assert_async().await;
        assert_eq!(draft.get("summary"), Some(&SectionContent::Text("Rust engineer.".into())));
    }

    #[tokio::test]
    async fn section_generation_posts_existing_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/generate/section").json_body(json!({
                    "user_id": "u1",
                    "job_description": "Rust role",
                    "section_id": "skills",
                    "existing_text": "Go"
                }));
                then.status(200).json_body(json!({
                    "generated_text": "{\"skills\": [\"Rust\", \"Go\"]}",
                    "section_id": "skills"
                }));
            })
            .await;

        let draft = generator(&server)
            .generate(&GenerationRequest::Section {
                user_id: "u1".into(),
                job_description: "Rust role".into(),
                section_id: "skills".into(),
                existing_text: Some("Go".into()),
            })
            .await
            .expect("draft");

        mock.assert_async().await;
        assert_eq!(draft.section_names(), vec!["skills"]);
    }

    #[tokio::test]
    async fn prose_output_is_malformed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/generate/full");
                then.status(200)
                    .json_body(json!({ "generated_text": "Here is your resume!" }));
            })
            .await;

        let error = generator(&server)
            .generate(&GenerationRequest::Full {
                user_id: "u1".into(),
                job_description: "Rust role".into(),
            })
            .await
            .expect_err("malformed");

        assert_eq!(error.kind(), ErrorKind::MalformedUpstreamOutput);
    }

    #[test]
    fn non_object_json_is_rejected() {
        assert!(parse_generated("[1, 2, 3]").is_err());
        assert!(parse_generated("{}").expect("empty draft").is_empty());
    }
}
