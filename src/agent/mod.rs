//! Conversational variant of the refinement loop: one user message, one action, one versioned
//! write of the session draft.

mod planner;

pub use planner::{ActionPlanner, AgentAction, COMMANDS, CommandInfo, KeywordPlanner};

use crate::{
    error::ErrorKind,
    generation::{GenerationError, GenerationRequest, ResumeDraft, ResumeGenerator},
    processing::{IndexingError, IndexingPipeline},
    refinement::{RefinementController, RefinementError, RefinementRequest},
    scoring::{ResumeScorer, ScoringError, SuggestionProvider},
    session::{SessionContext, SessionError, SessionStore},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Write attempts per turn before a version conflict is reported.
pub const MAX_WRITE_ATTEMPTS: usize = 3;

/// Missing keywords forwarded to the suggestion capability.
const SUGGESTION_KEYWORDS: usize = 5;

const EMPTY_DRAFT_REPLY: &str =
    "The resume draft is empty. Ask me to build a resume for this job first.";

/// Errors raised while handling a turn.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Turn input was incomplete.
    #[error("Invalid turn: {0}")]
    Validation(String),
    /// Session store failed or the draft changed concurrently too often.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Full resume refinement failed.
    #[error(transparent)]
    Refinement(#[from] RefinementError),
    /// Section generation failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),
    /// Scoring or suggestions failed.
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    /// Re-indexing the rewritten section failed.
    #[error(transparent)]
    Indexing(#[from] IndexingError),
}

impl AgentError {
    /// Classify the failure for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Session(error) => error.kind(),
            Self::Refinement(error) => error.kind(),
            Self::Generation(error) => error.kind(),
            Self::Scoring(error) => error.kind(),
            Self::Indexing(error) => error.kind(),
        }
    }
}

/// One user message.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    /// Conversation identifier.
    pub session_id: String,
    /// What the user said.
    pub user_message: String,
    /// Required on the first turn of a session.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Required on the first turn of a session.
    #[serde(default)]
    pub job_description: Option<String>,
}

/// Reply to one user message.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    /// Assistant reply text.
    pub agent_response: String,
    /// Action that was executed.
    pub action: AgentAction,
    /// Conversation identifier.
    pub session_id: String,
    /// Draft after the turn.
    pub resume_state: ResumeDraft,
}

/// Result of executing an action, before it is persisted.
struct ActionEffect {
    reply: String,
    changes: Option<ResumeDraft>,
    reindex: Option<(String, String)>,
}

impl ActionEffect {
    fn reply(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            changes: None,
            reindex: None,
        }
    }
}

/// Handles conversational turns against the session store.
#[derive(Clone)]
pub struct ConversationAgent {
    sessions: Arc<dyn SessionStore>,
    planner: Arc<dyn ActionPlanner>,
    refinement: RefinementController,
    generator: Arc<dyn ResumeGenerator>,
    scorer: Arc<dyn ResumeScorer>,
    suggestions: Arc<dyn SuggestionProvider>,
    indexing: IndexingPipeline,
}

impl ConversationAgent {
    /// Assemble an agent from its collaborators.
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        planner: Arc<dyn ActionPlanner>,
        refinement: RefinementController,
        generator: Arc<dyn ResumeGenerator>,
        scorer: Arc<dyn ResumeScorer>,
        suggestions: Arc<dyn SuggestionProvider>,
        indexing: IndexingPipeline,
    ) -> Self {
        Self {
            sessions,
            planner,
            refinement,
            generator,
            scorer,
            suggestions,
            indexing,
        }
    }

    /// Handle one message: load or create the session, run one action, persist the draft.
    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnOutcome, AgentError> {
        let TurnRequest {
            session_id,
            user_message,
            user_id,
            job_description,
        } = request;
        if session_id.trim().is_empty() {
            return Err(AgentError::Validation("session_id must not be empty".into()));
        }
        if user_message.trim().is_empty() {
            return Err(AgentError::Validation("user_message must not be empty".into()));
        }

        let context = self
            .load_or_create(&session_id, user_id.as_deref(), job_description.as_deref())
            .await?;
        let action = self.planner.plan(&user_message, &context).await;
        tracing::info!(session_id = %session_id, user_id = %context.user_id, %action, "Handling turn");

        let effect = self.execute(&action, &context).await?;
        let resume_state = match effect.changes {
            Some(changes) => self.persist(context.clone(), changes).await?.resume_state,
            None => context.resume_state.clone(),
        };

        if let Some((section, text)) = effect.reindex {
            self.indexing
                .reindex_section(&context.user_id, &section, &text)
                .await?;
        }

        Ok(TurnOutcome {
            agent_response: effect.reply,
            action,
            session_id,
            resume_state,
        })
    }

    async fn load_or_create(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        job_description: Option<&str>,
    ) -> Result<SessionContext, AgentError> {
        if let Some(context) = self.sessions.get(session_id).await? {
            return Ok(context);
        }
        let (Some(user_id), Some(job_description)) = (
            user_id.filter(|value| !value.trim().is_empty()),
            job_description.filter(|value| !value.trim().is_empty()),
        ) else {
            return Err(AgentError::Validation(
                "user_id and job_description are required to start a session".into(),
            ));
        };

        match self.sessions.create(session_id, user_id, job_description).await {
            Ok(context) => {
                tracing::info!(session_id, user_id, "Session started");
                Ok(context)
            }
            Err(SessionError::AlreadyExists { .. }) => self
                .sessions
                .get(session_id)
                .await?
                .ok_or_else(|| {
                    AgentError::Session(SessionError::NotFound {
                        session_id: session_id.to_string(),
                    })
                }),
            Err(error) => Err(error.into()),
        }
    }

    async fn execute(
        &self,
        action: &AgentAction,
        context: &SessionContext,
    ) -> Result<ActionEffect, AgentError> {
        match action {
            AgentAction::BuildResume => {
                let outcome = self
                    .refinement
                    .run(RefinementRequest {
                        user_id: context.user_id.clone(),
                        job_description: context.job_description.clone(),
                        target_score: None,
                        max_refinements: None,
                        keep_partial_on_failure: false,
                    })
                    .await?;
                let reply = format!(
                    "Built a resume with {} sections. Final score {:.2} after {} attempt(s) ({}).",
                    outcome.final_draft.len(),
                    outcome.final_score,
                    outcome.history.len(),
                    outcome.status
                );
                Ok(ActionEffect {
                    reply,
                    changes: Some(outcome.final_draft),
                    reindex: None,
                })
            }
            AgentAction::RewriteSection { section } => {
                let existing_text = context.resume_state.get(section).map(|content| content.render());
                let generated = self
                    .generator
                    .generate(&GenerationRequest::Section {
                        user_id: context.user_id.clone(),
                        job_description: context.job_description.clone(),
                        section_id: section.clone(),
                        existing_text,
                    })
                    .await?;
                let content = match generated.get(section) {
                    Some(content) => content.clone(),
                    None => {
                        return Err(GenerationError::MalformedOutput(format!(
                            "generated content has no '{section}' section"
                        ))
                        .into());
                    }
                };
                let text = content.render();
                let mut changes = ResumeDraft::new();
                changes.insert(section.clone(), content);
                Ok(ActionEffect {
                    reply: format!("Rewrote the {section} section:\n{text}"),
                    changes: Some(changes),
                    reindex: Some((section.clone(), text)),
                })
            }
            AgentAction::ScoreDraft => {
                if context.resume_state.is_empty() {
                    return Ok(ActionEffect::reply(EMPTY_DRAFT_REPLY));
                }
                let report = self
                    .scorer
                    .score(&context.job_description, &context.resume_state.render_text())
                    .await?;
                let missing = if report.missing_keywords.is_empty() {
                    "none".to_string()
                } else {
                    report.missing_keywords.join(", ")
                };
                Ok(ActionEffect::reply(format!(
                    "Final score {:.2} (semantic {:.2}, keyword {:.2}). Missing keywords: {missing}.",
                    report.final_score, report.semantic_score, report.keyword_score
                )))
            }
            AgentAction::SuggestImprovements => {
                if context.resume_state.is_empty() {
                    return Ok(ActionEffect::reply(EMPTY_DRAFT_REPLY));
                }
                let report = self
                    .scorer
                    .score(&context.job_description, &context.resume_state.render_text())
                    .await?;
                let keywords: Vec<String> = report
                    .missing_keywords
                    .into_iter()
                    .take(SUGGESTION_KEYWORDS)
                    .collect();
                if keywords.is_empty() {
                    return Ok(ActionEffect::reply(
                        "No missing keywords to get suggestions for.",
                    ));
                }
                let suggestions = self.suggestions.suggest(&keywords).await?;
                Ok(ActionEffect::reply(format!(
                    "Here are some suggestions for improvement:\n- {}",
                    suggestions.join("\n- ")
                )))
            }
            AgentAction::ShowDraft => Ok(ActionEffect::reply(if context.resume_state.is_empty() {
                EMPTY_DRAFT_REPLY.to_string()
            } else {
                context.resume_state.render_text()
            })),
            AgentAction::ShowSection { section } => Ok(ActionEffect::reply(
                context
                    .resume_state
                    .render_section(section)
                    .unwrap_or_else(|| format!("Section '{section}' is currently empty.")),
            )),
            AgentAction::Help => {
                let lines: Vec<String> = COMMANDS
                    .iter()
                    .map(|command| format!("- {}: {} (e.g. \"{}\")", command.name, command.description, command.example))
                    .collect();
                Ok(ActionEffect::reply(format!("I can help with:\n{}", lines.join("\n"))))
            }
        }
    }

    /// Merge `changes` into the stored draft, re-reading and re-applying on version conflicts.
    async fn persist(
        &self,
        mut current: SessionContext,
        changes: ResumeDraft,
    ) -> Result<SessionContext, AgentError> {
        let session_id = current.session_id.clone();
        let mut attempt = 1;
        loop {
            let expected = current.version;
            let mut next = current;
            next.resume_state.merge(changes.clone());
            match self.sessions.update(&session_id, expected, next).await {
                Ok(stored) => return Ok(stored),
                Err(SessionError::VersionConflict { actual, .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::warn!(session_id = %session_id, expected, actual, attempt, "Session changed concurrently; re-applying turn");
                    current = self.sessions.get(&session_id).await?.ok_or_else(|| {
                        SessionError::NotFound {
                            session_id: session_id.clone(),
                        }
                    })?;
                    attempt += 1;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}
