//! Scoring and suggestion capabilities backed by the scoring service.

use crate::error::ErrorKind;
use crate::transport::{HttpTransport, TransportError, format_endpoint};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by scoring capabilities.
#[derive(Debug, Error)]
pub enum ScoringError {
    /// Scoring service could not be reached or rejected the request.
    #[error("Scoring request failed: {0}")]
    Transport(#[from] TransportError),
    /// Scores fell outside the unit interval.
    #[error("Scoring service returned an out-of-range score: {0}")]
    OutOfRange(f64),
}

impl ScoringError {
    /// Classify the failure for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(error) => error.kind(),
            Self::OutOfRange(_) => ErrorKind::MalformedUpstreamOutput,
        }
    }
}

/// Fit of a resume against a job description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    /// Blended score in `[0, 1]`.
    pub final_score: f64,
    /// Embedding similarity component.
    pub semantic_score: f64,
    /// Keyword overlap component.
    pub keyword_score: f64,
    /// Job keywords the resume does not mention, most important first.
    #[serde(default)]
    pub missing_keywords: Vec<String>,
}

impl ScoreReport {
    fn validate(self) -> Result<Self, ScoringError> {
        for score in [self.final_score, self.semantic_score, self.keyword_score] {
            if !(0.0..=1.0).contains(&score) {
                return Err(ScoringError::OutOfRange(score));
            }
        }
        Ok(self)
    }
}

/// Scores resume text against a job description.
#[async_trait]
pub trait ResumeScorer: Send + Sync {
    /// Score `resume_text` against `job_description`.
    async fn score(&self, job_description: &str, resume_text: &str) -> Result<ScoreReport, ScoringError>;
}

/// Turns missing keywords into improvement suggestions.
#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    /// Suggestions addressing `missing_keywords`.
    async fn suggest(&self, missing_keywords: &[String]) -> Result<Vec<String>, ScoringError>;
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    job_description: &'a str,
    resume_text: &'a str,
}

#[derive(Serialize)]
struct SuggestRequest<'a> {
    missing_keywords: &'a [String],
}

#[derive(Deserialize)]
struct SuggestResponse {
    suggestions: Vec<String>,
}

/// Client for the scoring service (`POST /score`, `POST /suggest`).
pub struct HttpScoringClient {
    transport: HttpTransport,
    base_url: String,
}

impl HttpScoringClient {
    /// Build a client for the scoring service at `base_url`.
    pub fn new(transport: HttpTransport, base_url: String) -> Self {
        Self {
            transport,
            base_url,
        }
    }
}

#[async_trait]
impl ResumeScorer for HttpScoringClient {
    async fn score(&self, job_description: &str, resume_text: &str) -> Result<ScoreReport, ScoringError> {
        let url = format_endpoint(&self.base_url, "score");
        let report: ScoreReport = self
            .transport
            .post_json(
                &url,
                &ScoreRequest {
                    job_description,
                    resume_text,
                },
            )
            .await?;
        tracing::debug!(
            final_score = report.final_score,
            missing = report.missing_keywords.len(),
            "Resume scored"
        );
        report.validate()
    }
}

#[async_trait]
impl SuggestionProvider for HttpScoringClient {
    async fn suggest(&self, missing_keywords: &[String]) -> Result<Vec<String>, ScoringError> {
        if missing_keywords.is_empty() {
            return Ok(Vec::new());
        }
        let url = format_endpoint(&self.base_url, "suggest");
        let response: SuggestResponse = self
            .transport
            .post_json(&url, &SuggestRequest { missing_keywords })
            .await?;
        Ok(response.suggestions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RetryPolicy;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;
    use std::time::Duration;

    fn client(server: &MockServer) -> HttpScoringClient {
        let transport =
            HttpTransport::new(Duration::from_secs(5), RetryPolicy::immediate(0)).expect("transport");
        HttpScoringClient::new(transport, server.base_url())
    }

    #[tokio::test]
    async fn score_posts_job_and_resume_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/score").json_body(json!({
                    "job_description": "Rust role",
                    "resume_text": "### SUMMARY\nRust engineer."
                }));
                then.status(200).json_body(json!({
                    "final_score": 0.72,
                    "semantic_score": 0.8,
                    "keyword_score": 0.6,
                    "missing_keywords": ["kubernetes"]
                }));
            })
            .await;

        let report = client(&server)
            .score("Rust role", "### SUMMARY\nRust engineer.")
            .await
            .expect("score");

        mock.assert_async().await;
        assert!((report.final_score - 0.72).abs() < f64::EPSILON);
        assert_eq!(report.missing_keywords, vec!["kubernetes".to_string()]);
    }

    #[tokio::test]
    async fn out_of_range_scores_are_malformed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/score");
                then.status(200).json_body(json!({
                    "final_score": 7.5,
                    "semantic_score": 0.8,
                    "keyword_score": 0.6,
                    "missing_keywords": []
                }));
            })
            .await;

        let error = client(&server).score("jd", "text").await.expect_err("range");
        assert_eq!(error.kind(), ErrorKind::MalformedUpstreamOutput);
    }

    #[tokio::test]
    async fn suggest_skips_the_service_without_keywords() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/suggest")
                    .json_body(json!({ "missing_keywords": ["docker"] }));
                then.status(200)
                    .json_body(json!({ "suggestions": ["Mention container work."] }));
            })
            .await;
        let scoring = client(&server);

        assert!(scoring.suggest(&[]).await.expect("empty").is_empty());
        let suggestions = scoring.suggest(&["docker".to_string()]).await.expect("suggest");

        mock.assert_hits_async(1).await;
        assert_eq!(suggestions, vec!["Mention container work.".to_string()]);
    }
}
