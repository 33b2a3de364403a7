//! Structured profile records and the source they are loaded from.
//!
//! Profile documents come from a document store whose keys are not consistently cased, so
//! every field also accepts its capitalized spelling. [`Profile::text_fields`] enumerates the
//! retrievable text of a profile in a fixed order that doubles as the chunk provenance key.

use crate::error::ErrorKind;
use crate::transport::{HttpTransport, TransportError, segment_endpoint};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

/// Errors raised while loading profiles.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// Profile service transport failed or answered with an unexpected shape.
    #[error("Profile lookup failed: {0}")]
    Transport(#[from] TransportError),
}

impl ProfileError {
    /// Classify the failure for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(error) => error.kind(),
        }
    }
}

/// User profile as stored by the profile service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Work history.
    #[serde(default, alias = "Experience")]
    pub experience: Option<Vec<Option<ExperienceEntry>>>,
    /// Side or portfolio projects.
    #[serde(default, alias = "Projects")]
    pub projects: Option<Vec<Option<ProjectEntry>>>,
    /// Skills, either a list or a free-form string.
    #[serde(default, alias = "Skills")]
    pub skills: Option<Skills>,
    /// Certifications held.
    #[serde(default, alias = "Certifications")]
    pub certifications: Option<Vec<Option<Certification>>>,
    /// Education history.
    #[serde(default, alias = "Education")]
    pub education: Option<Vec<Option<EducationEntry>>>,
    /// Professional summary.
    #[serde(default, alias = "Summary")]
    pub summary: Option<FreeText>,
    /// Biography.
    #[serde(default, alias = "Bio")]
    pub bio: Option<FreeText>,
    /// Career objective.
    #[serde(default, alias = "Objective")]
    pub objective: Option<FreeText>,
    /// Interests.
    #[serde(default, alias = "Interests")]
    pub interests: Option<FreeText>,
    /// Awards.
    #[serde(default, alias = "Awards")]
    pub awards: Option<FreeText>,
    /// One-line headline.
    #[serde(default, alias = "Headline")]
    pub headline: Option<FreeText>,
}

/// One position in the work history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperienceEntry {
    /// Job title.
    #[serde(default, alias = "Title")]
    pub title: Option<FreeText>,
    /// Employer.
    #[serde(default, alias = "Company")]
    pub company: Option<FreeText>,
    /// Narrative description; the only part that gets indexed.
    #[serde(default, alias = "Description")]
    pub description: Option<FreeText>,
}

/// One project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectEntry {
    /// Project name.
    #[serde(default, alias = "Name")]
    pub name: Option<FreeText>,
    /// Narrative description; the only part that gets indexed.
    #[serde(default, alias = "Description")]
    pub description: Option<FreeText>,
}

/// A certification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Certification {
    /// Certification name.
    #[serde(default, alias = "Name")]
    pub name: Option<FreeText>,
    /// Issuing organization.
    #[serde(default, alias = "Issuer")]
    pub issuer: Option<FreeText>,
    /// Award date as recorded.
    #[serde(default, alias = "Date")]
    pub date: Option<FreeText>,
}

/// An education entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EducationEntry {
    /// Degree earned.
    #[serde(default, alias = "Degree")]
    pub degree: Option<FreeText>,
    /// Field of study.
    #[serde(default, alias = "Field")]
    pub field: Option<FreeText>,
    /// Institution name.
    #[serde(default, alias = "Institution")]
    pub institution: Option<FreeText>,
    /// Free-form description.
    #[serde(default, alias = "Description")]
    pub description: Option<FreeText>,
}

/// Skills stored either as a list or as one string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Skills {
    /// List of skills.
    List(Vec<Value>),
    /// Pre-joined skills string.
    Text(String),
}

/// Free-text field tolerant of non-string JSON scalars and lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FreeText(pub Value);

impl FreeText {
    /// Render the value as text; `None` for null, empty strings, and empty lists.
    pub fn as_text(&self) -> Option<String> {
        render_value(&self.0).filter(|text| !text.trim().is_empty())
    }
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(false) => None,
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(render_value).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        other => Some(other.to_string()),
    }
}

fn present(value: Option<&FreeText>) -> Option<String> {
    value.and_then(FreeText::as_text)
}

/// One extracted text field with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextField {
    /// Field family, e.g. `experience` or `summary`.
    pub source_type: String,
    /// Position of the entry within its family.
    pub source_id: String,
    /// Text to chunk.
    pub text: String,
}

impl TextField {
    fn new(source_type: &str, source_id: impl ToString, text: String) -> Self {
        Self {
            source_type: source_type.to_string(),
            source_id: source_id.to_string(),
            text,
        }
    }
}

impl Profile {
    /// Enumerate indexable text in a stable order. Empty fields are skipped, but positional
    /// ids still count skipped entries.
    pub fn text_fields(&self) -> Vec<TextField> {
        let mut fields = Vec::new();

        for (index, entry) in self.experience.iter().flatten().enumerate() {
            if let Some(text) = entry
                .as_ref()
                .and_then(|entry| entry.description.as_ref())
                .and_then(FreeText::as_text)
            {
                fields.push(TextField::new("experience", index, text));
            }
        }

        for (index, entry) in self.projects.iter().flatten().enumerate() {
            if let Some(text) = entry
                .as_ref()
                .and_then(|entry| entry.description.as_ref())
                .and_then(FreeText::as_text)
            {
                fields.push(TextField::new("project", index, text));
            }
        }

        if let Some(text) = self.skills.as_ref().and_then(Skills::as_text) {
            fields.push(TextField::new("skills", 0, text));
        }

        for (index, cert) in self.certifications.iter().flatten().enumerate() {
            let Some(cert) = cert else { continue };
            let mut parts = Vec::new();
            if let Some(name) = present(cert.name.as_ref()) {
                parts.push(name);
            }
            if let Some(issuer) = present(cert.issuer.as_ref()) {
                parts.push(format!("issued by {issuer}"));
            }
            if let Some(date) = present(cert.date.as_ref()) {
                parts.push(format!("on {date}"));
            }
            if !parts.is_empty() {
                fields.push(TextField::new("certification", index, parts.join(", ")));
            }
        }

        for (index, edu) in self.education.iter().flatten().enumerate() {
            let Some(edu) = edu else { continue };
            let mut parts = Vec::new();
            if let Some(degree) = present(edu.degree.as_ref()) {
                parts.push(degree);
            }
            if let Some(field) = present(edu.field.as_ref()) {
                parts.push(format!("in {field}"));
            }
            if let Some(institution) = present(edu.institution.as_ref()) {
                parts.push(format!("at {institution}"));
            }
            if let Some(description) = edu.description.as_ref().and_then(FreeText::as_text) {
                parts.push(description);
            }
            if !parts.is_empty() {
                fields.push(TextField::new("education", index, parts.join(" ")));
            }
        }

        let singles = [
            ("summary", &self.summary),
            ("bio", &self.bio),
            ("objective", &self.objective),
            ("interests", &self.interests),
            ("awards", &self.awards),
            ("headline", &self.headline),
        ];
        for (key, value) in singles {
            if let Some(text) = value.as_ref().and_then(FreeText::as_text) {
                fields.push(TextField::new(key, 0, text));
            }
        }

        fields
    }
}

impl Skills {
    fn as_text(&self) -> Option<String> {
        let text = match self {
            Self::List(items) => items
                .iter()
                .filter_map(render_value)
                .collect::<Vec<_>>()
                .join(", "),
            Self::Text(text) => text.clone(),
        };
        (!text.trim().is_empty()).then_some(text)
    }
}

/// Capability returning a user's structured profile.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// Fetch the profile for `user_id`, or `None` when the user has none.
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, ProfileError>;
}

/// Profile service client (`GET {base}/profiles/{user_id}`).
pub struct HttpProfileSource {
    transport: HttpTransport,
    base_url: String,
}

impl HttpProfileSource {
    /// Build a client for the profile service at `base_url`.
    pub fn new(transport: HttpTransport, base_url: String) -> Self {
        Self {
            transport,
            base_url,
        }
    }
}

#[async_trait]
impl ProfileSource for HttpProfileSource {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, ProfileError> {
        let url = segment_endpoint(&self.base_url, &["profiles", user_id])?;
        let profile = self.transport.get_json_optional(&url).await?;
        tracing::debug!(user_id, found = profile.is_some(), "Profile lookup completed");
        Ok(profile)
    }
}

/// Process-local profile source.
#[derive(Default)]
pub struct InMemoryProfileSource {
    profiles: RwLock<HashMap<String, Profile>>,
}

impl InMemoryProfileSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile.
    pub fn insert(&self, user_id: impl Into<String>, profile: Profile) {
        if let Ok(mut guard) = self.profiles.write() {
            guard.insert(user_id.into(), profile);
        }
    }
}

#[async_trait]
impl ProfileSource for InMemoryProfileSource {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, ProfileError> {
        Ok(self
            .profiles
            .read()
            .ok()
            .and_then(|guard| guard.get(user_id).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RetryPolicy;
    use httpmock::{Method::GET, MockServer};
    use serde_json::json;
    use std::time::Duration;

    fn field(source_type: &str, source_id: &str, text: &str) -> TextField {
        TextField::new(source_type, source_id, text.to_string())
    }

    #[test]
    fn extracts_fields_in_stable_order() {
        let profile: Profile = serde_json::from_value(json!({
            "headline": "Platform engineer",
            "summary": "Ships reliable services.",
            "education": [
                { "degree": "BSc", "field": "Computer Science", "institution": "MIT", "description": "Honors." }
            ],
            "certifications": [
                { "name": "CKA", "issuer": "CNCF", "date": "2023-05" }
            ],
            "skills": ["Python", "Go"],
            "projects": [ { "name": "kv", "description": "A key-value store." } ],
            "experience": [ { "title": "SRE", "description": "Built scalable systems." } ]
        }))
        .expect("profile");

        assert_eq!(
            profile.text_fields(),
            vec![
                field("experience", "0", "Built scalable systems."),
                field("project", "0", "A key-value store."),
                field("skills", "0", "Python, Go"),
                field("certification", "0", "CKA, issued by CNCF, on 2023-05"),
                field("education", "0", "BSc in Computer Science at MIT Honors."),
                field("summary", "0", "Ships reliable services."),
                field("headline", "0", "Platform engineer"),
            ]
        );
    }

    #[test]
    fn skips_empty_entries_but_keeps_positions() {
        let profile: Profile = serde_json::from_value(json!({
            "experience": [
                { "description": "" },
                null,
                { "description": "Led a migration." }
            ],
            "skills": [],
            "bio": null,
            "awards": "   "
        }))
        .expect("profile");

        assert_eq!(
            profile.text_fields(),
            vec![field("experience", "2", "Led a migration.")]
        );
    }

    #[test]
    fn accepts_capitalized_keys_and_string_skills() {
        let profile: Profile = serde_json::from_value(json!({
            "Experience": [ { "Description": "Tuned Postgres." } ],
            "Skills": "SQL, Rust",
            "Summary": "Database specialist."
        }))
        .expect("profile");

        assert_eq!(
            profile.text_fields(),
            vec![
                field("experience", "0", "Tuned Postgres."),
                field("skills", "0", "SQL, Rust"),
                field("summary", "0", "Database specialist."),
            ]
        );
    }

    #[test]
    fn non_string_scalars_render_as_text() {
        let profile: Profile = serde_json::from_value(json!({
            "certifications": [ { "name": "CKA", "issuer": "CNCF", "date": 2021 } ],
            "education": [ { "degree": "MSc", "field": ["Systems", "Networks"], "institution": "ETH" } ],
            "experience": [ { "title": 7, "company": { "name": "Acme" }, "description": "On call." } ]
        }))
        .expect("profile");

        assert_eq!(
            profile.text_fields(),
            vec![
                field("experience", "0", "On call."),
                field("certification", "0", "CKA, issued by CNCF, on 2021"),
                field("education", "0", "MSc in Systems, Networks at ETH"),
            ]
        );
    }

    #[test]
    fn empty_profile_has_no_fields() {
        assert!(Profile::default().text_fields().is_empty());
    }

    #[tokio::test]
    async fn http_source_maps_404_to_none() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/profiles/known");
                then.status(200)
                    .json_body(json!({ "summary": "Known user." }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/profiles/missing");
                then.status(404);
            })
            .await;

        let transport =
            HttpTransport::new(Duration::from_secs(5), RetryPolicy::immediate(0)).expect("transport");
        let source = HttpProfileSource::new(transport, server.base_url());

        let known = source.get_profile("known").await.expect("lookup");
        assert_eq!(
            known.expect("profile").text_fields(),
            vec![field("summary", "0", "Known user.")]
        );
        assert!(source.get_profile("missing").await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn http_source_encodes_user_id_as_one_segment() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/profiles/team%2Fa%3Fb");
                then.status(200).json_body(json!({ "headline": "Encoded." }));
            })
            .await;

        let transport =
            HttpTransport::new(Duration::from_secs(5), RetryPolicy::immediate(0)).expect("transport");
        let source = HttpProfileSource::new(transport, server.base_url());

        let profile = source.get_profile("team/a?b").await.expect("lookup");
        mock.assert_async().await;
        assert!(profile.is_some());
    }
}
