use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Sections rendered first, in this order; any other section follows alphabetically.
pub const CANONICAL_SECTIONS: [&str; 5] = ["summary", "experience", "education", "projects", "skills"];

/// Generated content of one resume section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SectionContent {
    /// Free prose, e.g. a summary.
    Text(String),
    /// Flat list of bullet items.
    Items(Vec<String>),
    /// Named groups of items, e.g. `skills: {technical, soft}`.
    Grouped(BTreeMap<String, Vec<String>>),
    /// Any other structured shape the generator produced.
    Structured(Value),
}

impl SectionContent {
    /// Plain-text rendering used for scoring and display.
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.trim().to_string(),
            Self::Items(items) => items
                .iter()
                .map(|item| format!("- {}", item.trim()))
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Grouped(groups) => groups
                .iter()
                .map(|(group, items)| format!("{group}: {}", items.join(", ")))
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }
}

/// Resume draft keyed by section name; each value is the latest accepted content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeDraft(BTreeMap<String, SectionContent>);

impl ResumeDraft {
    /// Empty draft.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no section has been generated yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of sections.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Content of `section`.
    pub fn get(&self, section: &str) -> Option<&SectionContent> {
        self.0.get(section)
    }

    /// Replace the content of `section`.
    pub fn insert(&mut self, section: impl Into<String>, content: SectionContent) {
        self.0.insert(section.into(), content);
    }

    /// Section names in rendering order.
    pub fn section_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = CANONICAL_SECTIONS
            .iter()
            .copied()
            .filter(|name| self.0.contains_key(*name))
            .collect();
        names.extend(
            self.0
                .keys()
                .map(String::as_str)
                .filter(|name| !CANONICAL_SECTIONS.contains(name)),
        );
        names
    }

    /// Overwrite sections present in `other`, keeping the rest.
    pub fn merge(&mut self, other: ResumeDraft) {
        self.0.extend(other.0);
    }

    /// Render one section as a `### NAME` block.
    pub fn render_section(&self, section: &str) -> Option<String> {
        self.0
            .get(section)
            .map(|content| format!("### {}\n{}", section.to_uppercase(), content.render()))
    }

    /// Render the whole draft as resume text, sections separated by blank lines.
    pub fn render_text(&self) -> String {
        self.section_names()
            .into_iter()
            .filter_map(|name| self.render_section(name))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl FromIterator<(String, SectionContent)> for ResumeDraft {
    fn from_iter<I: IntoIterator<Item = (String, SectionContent)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Strip ```json ... ``` or ``` ... ``` fences wrapped around generated JSON.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(stripped) = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
    else {
        return text;
    };
    let stripped = stripped.trim_start();
    stripped
        .strip_suffix("```")
        .map(str::trim)
        .unwrap_or(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft(value: Value) -> ResumeDraft {
        serde_json::from_value(value).expect("draft")
    }

    #[test]
    fn strips_tagged_and_bare_fences() {
        assert_eq!(strip_json_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_json_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_json_fences("  {\"a\": 1} "), "{\"a\": 1}");
        assert_eq!(strip_json_fences("```json\n{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn section_shapes_deserialize_untagged() {
        let parsed = draft(json!({
            "summary": "Backend engineer.",
            "projects": ["CLI tool", "Search engine"],
            "skills": { "technical": ["Rust"], "soft": ["Mentoring"] },
            "experience": [ { "title": "Engineer", "company": "Acme" } ]
        }));

        assert!(matches!(parsed.get("summary"), Some(SectionContent::Text(_))));
        assert!(matches!(parsed.get("projects"), Some(SectionContent::Items(_))));
        assert!(matches!(parsed.get("skills"), Some(SectionContent::Grouped(_))));
        assert!(matches!(parsed.get("experience"), Some(SectionContent::Structured(_))));
    }

    #[test]
    fn renders_canonical_order_then_remaining_sections() {
        let parsed = draft(json!({
            "awards": "Hackathon winner",
            "skills": { "technical": ["Rust", "Go"] },
            "summary": "Backend engineer."
        }));

        assert_eq!(parsed.section_names(), vec!["summary", "skills", "awards"]);
        assert_eq!(
            parsed.render_text(),
            "### SUMMARY\nBackend engineer.\n\n### SKILLS\ntechnical: Rust, Go\n\n### AWARDS\nHackathon winner"
        );
    }

    #[test]
    fn merge_overwrites_only_supplied_sections() {
        let mut base = draft(json!({ "summary": "Old.", "skills": ["Rust"] }));
        base.merge(draft(json!({ "summary": "New." })));

        assert_eq!(base.get("summary"), Some(&SectionContent::Text("New.".into())));
        assert_eq!(base.len(), 2);
    }
}
