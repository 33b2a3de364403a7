//! Action planning for conversation turns: the closed command catalog and the keyword
//! planner that maps a user message onto one [`AgentAction`].

use crate::{generation::CANONICAL_SECTIONS, session::SessionContext};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// Operation executed for one conversational turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum AgentAction {
    /// Generate, score, and refine a complete resume.
    BuildResume,
    /// Regenerate one section and re-index it.
    RewriteSection {
        /// Section to rewrite.
        section: String,
    },
    /// Score the current draft against the job description.
    ScoreDraft,
    /// Score the draft and suggest how to cover missing keywords.
    SuggestImprovements,
    /// Render the whole draft.
    ShowDraft,
    /// Render one section.
    ShowSection {
        /// Section to render.
        section: String,
    },
    /// Describe the available commands.
    Help,
}

impl fmt::Display for AgentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuildResume => f.write_str("build_resume"),
            Self::RewriteSection { section } => write!(f, "rewrite_section({section})"),
            Self::ScoreDraft => f.write_str("score_draft"),
            Self::SuggestImprovements => f.write_str("suggest_improvements"),
            Self::ShowDraft => f.write_str("show_draft"),
            Self::ShowSection { section } => write!(f, "show_section({section})"),
            Self::Help => f.write_str("help"),
        }
    }
}

/// Catalog entry describing one action.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CommandInfo {
    /// Action name.
    pub name: &'static str,
    /// What the action does.
    pub description: &'static str,
    /// Message that triggers it.
    pub example: &'static str,
}

/// Every action with a short description and an example message.
pub const COMMANDS: [CommandInfo; 7] = [
    CommandInfo {
        name: "build_resume",
        description: "Generate a full resume, score it, and refine it toward the target score.",
        example: "Build my resume for this job",
    },
    CommandInfo {
        name: "rewrite_section",
        description: "Regenerate one section of the draft.",
        example: "Rewrite the summary",
    },
    CommandInfo {
        name: "score_draft",
        description: "Score the current draft against the job description.",
        example: "How does my resume score?",
    },
    CommandInfo {
        name: "suggest_improvements",
        description: "Suggest how to cover keywords the draft is missing.",
        example: "Any tips to improve it?",
    },
    CommandInfo {
        name: "show_draft",
        description: "Show the full draft.",
        example: "Show me the resume",
    },
    CommandInfo {
        name: "show_section",
        description: "Show one section of the draft.",
        example: "Show the skills section",
    },
    CommandInfo {
        name: "help",
        description: "List what the assistant can do.",
        example: "help",
    },
];

/// Chooses the action for a user message.
#[async_trait]
pub trait ActionPlanner: Send + Sync {
    /// Pick one action for `message` given the session state.
    async fn plan(&self, message: &str, context: &SessionContext) -> AgentAction;
}

/// Deterministic planner matching verbs and section names in the message.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordPlanner;

const REWRITE_WORDS: [&str; 6] = ["rewrite", "redo", "regenerate", "revise", "update", "improve"];
const SHOW_WORDS: [&str; 5] = ["show", "view", "see", "display", "print"];
const SUGGEST_WORDS: [&str; 6] = ["suggest", "tip", "advice", "improve", "recommend", "feedback"];
const SCORE_WORDS: [&str; 5] = ["score", "rate", "rating", "evaluate", "match"];
const BUILD_WORDS: [&str; 7] = ["build", "create", "generate", "write", "draft", "start", "make"];

/// Whether any word of `message` starts with one of `stems`.
fn mentions(message: &str, stems: &[&str]) -> bool {
    message
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .any(|word| stems.iter().any(|stem| word.starts_with(stem)))
}

/// First known section named in `message`, preferring sections already in the draft.
fn mentioned_section(message: &str, context: &SessionContext) -> Option<String> {
    context
        .resume_state
        .section_names()
        .into_iter()
        .chain(CANONICAL_SECTIONS)
        .find(|section| message.contains(&section.replace('_', " ")) || message.contains(*section))
        .map(str::to_string)
}

#[async_trait]
impl ActionPlanner for KeywordPlanner {
    async fn plan(&self, message: &str, context: &SessionContext) -> AgentAction {
        let message = message.to_lowercase();
        let section = mentioned_section(&message, context);

        if message.trim() == "help" || message.contains("what can you") {
            return AgentAction::Help;
        }
        if let Some(section) = section.clone()
            && mentions(&message, &REWRITE_WORDS)
        {
            return AgentAction::RewriteSection { section };
        }
        if mentions(&message, &SHOW_WORDS) {
            return match section {
                Some(section) => AgentAction::ShowSection { section },
                None => AgentAction::ShowDraft,
            };
        }
        if mentions(&message, &SUGGEST_WORDS) {
            return AgentAction::SuggestImprovements;
        }
        if mentions(&message, &SCORE_WORDS) {
            return AgentAction::ScoreDraft;
        }
        if mentions(&message, &BUILD_WORDS) || context.resume_state.is_empty() {
            return AgentAction::BuildResume;
        }
        AgentAction::Help
    }
}
