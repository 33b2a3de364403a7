//! Score-driven refinement loop: generate, score against the original job description, keep the
//! best draft, and replan around missing keywords until the target or the budget is reached.

use crate::{
    config::{Config, MAX_REFINEMENTS_RANGE, TARGET_SCORE_RANGE},
    error::ErrorKind,
    generation::{GenerationError, GenerationRequest, ResumeDraft, ResumeGenerator},
    metrics::PipelineMetrics,
    scoring::{ResumeScorer, ScoreReport, ScoringError},
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use thiserror::Error;

/// Number of missing keywords named in a replanning instruction.
pub const REPLAN_KEYWORDS: usize = 5;

/// Bounds of one refinement run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinementSettings {
    /// Score at or above which the run stops successfully.
    pub target_score: f64,
    /// Attempts allowed after the initial generation.
    pub max_refinements: u32,
}

impl RefinementSettings {
    /// Validate explicit bounds.
    pub fn new(target_score: f64, max_refinements: u32) -> Result<Self, RefinementError> {
        if !TARGET_SCORE_RANGE.contains(&target_score) {
            return Err(RefinementError::InvalidRequest(format!(
                "target_score must lie within {:?}, got {target_score}",
                TARGET_SCORE_RANGE
            )));
        }
        if !MAX_REFINEMENTS_RANGE.contains(&max_refinements) {
            return Err(RefinementError::InvalidRequest(format!(
                "max_refinements must lie within {:?}, got {max_refinements}",
                MAX_REFINEMENTS_RANGE
            )));
        }
        Ok(Self {
            target_score,
            max_refinements,
        })
    }

    /// Defaults taken from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            target_score: config.agent_target_score,
            max_refinements: config.agent_max_refinements,
        }
    }
}

/// Input of a refinement run.
#[derive(Debug, Clone, Deserialize)]
pub struct RefinementRequest {
    /// User whose profile grounds generation.
    pub user_id: String,
    /// Target job description; scoring always uses it verbatim.
    pub job_description: String,
    /// Override of the configured target score.
    #[serde(default)]
    pub target_score: Option<f64>,
    /// Override of the configured attempt budget.
    #[serde(default)]
    pub max_refinements: Option<u32>,
    /// Attach the steps completed so far to a failure.
    #[serde(default)]
    pub keep_partial_on_failure: bool,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementStatus {
    /// Best score reached the target.
    TargetReached,
    /// Attempt budget exhausted first.
    MaxRefinementsReached,
}

impl fmt::Display for RefinementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TargetReached => "target reached",
            Self::MaxRefinementsReached => "maximum refinements reached",
        })
    }
}

/// Immutable record of one generate-and-score attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefinementStep {
    /// Attempt number; 0 is the initial generation.
    pub attempt: u32,
    /// Why the attempt was accepted or rejected.
    pub reasoning: String,
    /// Blended score of this attempt.
    pub final_score: f64,
    /// Semantic component.
    pub semantic_score: f64,
    /// Keyword component.
    pub keyword_score: f64,
    /// Keywords this attempt missed.
    pub missing_keywords: Vec<String>,
    /// Whether the attempt became the current best.
    pub accepted: bool,
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RefinementOutcome {
    /// Termination condition.
    pub status: RefinementStatus,
    /// Score of the best draft.
    pub final_score: f64,
    /// Best draft.
    pub final_draft: ResumeDraft,
    /// Every attempt in order.
    pub history: Vec<RefinementStep>,
}

/// Stage that aborted a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementStage {
    /// Draft generation.
    Generation,
    /// Draft scoring.
    Scoring,
}

/// Errors aborting a refinement run.
#[derive(Debug, Error)]
pub enum RefinementError {
    /// Request parameters were rejected before any call.
    #[error("Invalid refinement request: {0}")]
    InvalidRequest(String),
    /// Generator failed.
    #[error("Generation failed on attempt {attempt}: {source}")]
    Generation {
        /// Attempt that failed.
        attempt: u32,
        /// Underlying failure.
        source: GenerationError,
        /// Steps completed before the failure, when requested.
        partial: Option<Vec<RefinementStep>>,
    },
    /// Scorer failed.
    #[error("Scoring failed on attempt {attempt}: {source}")]
    Scoring {
        /// Attempt that failed.
        attempt: u32,
        /// Underlying failure.
        source: ScoringError,
        /// Steps completed before the failure, when requested.
        partial: Option<Vec<RefinementStep>>,
    },
}

impl RefinementError {
    /// Classify the failure for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::Validation,
            Self::Generation { source, .. } => source.kind(),
            Self::Scoring { source, .. } => source.kind(),
        }
    }

    /// Stage that failed, if a downstream call failed.
    pub fn stage(&self) -> Option<RefinementStage> {
        match self {
            Self::InvalidRequest(_) => None,
            Self::Generation { .. } => Some(RefinementStage::Generation),
            Self::Scoring { .. } => Some(RefinementStage::Scoring),
        }
    }

    /// Steps completed before the failure, when the request asked for them.
    pub fn partial_history(&self) -> Option<&[RefinementStep]> {
        match self {
            Self::InvalidRequest(_) => None,
            Self::Generation { partial, .. } | Self::Scoring { partial, .. } => partial.as_deref(),
        }
    }
}

/// Prefix `job_description` with an instruction to foreground the top missing keywords.
pub fn replan_job_description(job_description: &str, missing_keywords: &[String]) -> String {
    let keywords: Vec<&str> = missing_keywords
        .iter()
        .map(|keyword| keyword.trim())
        .filter(|keyword| !keyword.is_empty())
        .take(REPLAN_KEYWORDS)
        .collect();
    if keywords.is_empty() {
        return job_description.to_string();
    }
    format!(
        "IMPORTANT: The previous resume draft did not mention these keywords from the job \
         description: {}. Rewrite the resume so that experience and skills supported by the \
         profile clearly feature them.\n\n{job_description}",
        keywords.join(", ")
    )
}

/// Drives generate-score-decide iterations for one user and job description.
#[derive(Clone)]
pub struct RefinementController {
    generator: Arc<dyn ResumeGenerator>,
    scorer: Arc<dyn ResumeScorer>,
    metrics: Arc<PipelineMetrics>,
    defaults: RefinementSettings,
}

impl RefinementController {
    /// Build a controller using `defaults` when a request carries no overrides.
    pub fn new(
        generator: Arc<dyn ResumeGenerator>,
        scorer: Arc<dyn ResumeScorer>,
        metrics: Arc<PipelineMetrics>,
        defaults: RefinementSettings,
    ) -> Self {
        Self {
            generator,
            scorer,
            metrics,
            defaults,
        }
    }

    /// Run the refinement loop to completion.
    pub async fn run(&self, request: RefinementRequest) -> Result<RefinementOutcome, RefinementError> {
        let settings = self.settings_for(&request)?;
        let RefinementRequest {
            user_id,
            job_description: original,
            keep_partial_on_failure,
            ..
        } = request;
        tracing::info!(
            user_id = %user_id,
            target_score = settings.target_score,
            max_refinements = settings.max_refinements,
            "Starting refinement run"
        );

        let partial =
            |history: &[RefinementStep]| keep_partial_on_failure.then(|| history.to_vec());
        let mut history: Vec<RefinementStep> = Vec::new();
        let mut best: Option<(ResumeDraft, ScoreReport)> = None;
        let mut current = original.clone();
        let mut attempt: u32 = 0;

        let status = loop {
            let draft = match self
                .generator
                .generate(&GenerationRequest::Full {
                    user_id: user_id.clone(),
                    job_description: current.clone(),
                })
                .await
            {
                Ok(draft) => draft,
                Err(source) => {
                    tracing::error!(user_id = %user_id, attempt, error = %source, "Refinement generation failed");
                    return Err(RefinementError::Generation {
                        attempt,
                        source,
                        partial: partial(&history),
                    });
                }
            };

            let report = match self.scorer.score(&original, &draft.render_text()).await {
                Ok(report) => report,
                Err(source) => {
                    tracing::error!(user_id = %user_id, attempt, error = %source, "Refinement scoring failed");
                    return Err(RefinementError::Scoring {
                        attempt,
                        source,
                        partial: partial(&history),
                    });
                }
            };

            let previous = best.as_ref().map(|(_, report)| report.final_score);
            let accepted = previous.is_none_or(|score| report.final_score > score);
            let reasoning = match previous {
                None => format!("initial draft scored {:.3}", report.final_score),
                Some(score) if accepted => {
                    format!("improved from {score:.3} to {:.3}", report.final_score)
                }
                Some(score) => format!(
                    "scored {:.3}, no improvement over {score:.3}; keeping previous draft",
                    report.final_score
                ),
            };
            tracing::info!(user_id = %user_id, attempt, score = report.final_score, accepted, "Refinement attempt scored");

            history.push(RefinementStep {
                attempt,
                reasoning,
                final_score: report.final_score,
                semantic_score: report.semantic_score,
                keyword_score: report.keyword_score,
                missing_keywords: report.missing_keywords.clone(),
                accepted,
            });

            current = replan_job_description(&original, &report.missing_keywords);
            if accepted {
                best = Some((draft, report));
            }

            let best_score = best.as_ref().map_or(0.0, |(_, report)| report.final_score);
            if best_score >= settings.target_score {
                break RefinementStatus::TargetReached;
            }
            if attempt >= settings.max_refinements {
                break RefinementStatus::MaxRefinementsReached;
            }
            attempt += 1;
        };

        self.metrics.record_refinement(history.len() as u64);
        let (final_draft, report) = best.unwrap_or_default();
        tracing::info!(user_id = %user_id, %status, final_score = report.final_score, attempts = history.len(), "Refinement run finished");

        Ok(RefinementOutcome {
            status,
            final_score: report.final_score,
            final_draft,
            history,
        })
    }

    fn settings_for(&self, request: &RefinementRequest) -> Result<RefinementSettings, RefinementError> {
        if request.user_id.trim().is_empty() {
            return Err(RefinementError::InvalidRequest("user_id must not be empty".into()));
        }
        if request.job_description.trim().is_empty() {
            return Err(RefinementError::InvalidRequest(
                "job_description must not be empty".into(),
            ));
        }
        match (request.target_score, request.max_refinements) {
            (None, None) => Ok(self.defaults),
            (target, max) => {
                let settings = RefinementSettings::new(
                    target.unwrap_or(self.defaults.target_score),
                    max.unwrap_or(self.defaults.max_refinements),
                )?;
                Ok(settings)
            }
        }
    }
}
