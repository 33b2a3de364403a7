//! Translation of [`ChunkFilter`] into Qdrant filter payloads.

use crate::store::ChunkFilter;
use serde_json::{Value, json};

/// Compose the Qdrant filter selecting the chunks described by `filter`.
pub fn build_chunk_filter(filter: &ChunkFilter) -> Value {
    let mut must: Vec<Value> = vec![json!({
        "key": "user_id",
        "match": { "value": filter.user_id }
    })];

    if let Some(namespace) = filter.namespace {
        must.push(json!({
            "key": "index_namespace",
            "match": { "value": namespace.as_str() }
        }));
    }

    if let Some(condition) = match_any("section_id", &filter.section_ids) {
        must.push(condition);
    }

    if let Some(condition) = match_any("generation", &filter.generations) {
        must.push(condition);
    }

    let mut body = json!({ "must": must });
    if let Some(condition) = match_any("generation", &filter.exclude_generations) {
        body["must_not"] = json!([condition]);
    }
    body
}

fn match_any(key: &str, values: &[String]) -> Option<Value> {
    let cleaned: Vec<&str> = values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect();
    match cleaned.as_slice() {
        [] => None,
        [single] => Some(json!({ "key": key, "match": { "value": single } })),
        many => Some(json!({ "key": key, "match": { "any": many } })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Namespace;

    #[test]
    fn user_constraint_is_always_present() {
        assert_eq!(
            build_chunk_filter(&ChunkFilter::for_user("u1")),
            json!({
                "must": [
                    { "key": "user_id", "match": { "value": "u1" } }
                ]
            })
        );
    }

    #[test]
    fn combines_namespace_sections_and_generations() {
        let filter = ChunkFilter::for_user("u1")
            .namespace(Namespace::ResumeSections)
            .sections(["summary", "skills"])
            .generations(["g1"]);

        assert_eq!(
            build_chunk_filter(&filter),
            json!({
                "must": [
                    { "key": "user_id", "match": { "value": "u1" } },
                    { "key": "index_namespace", "match": { "value": "resume_sections" } },
                    { "key": "section_id", "match": { "any": ["summary", "skills"] } },
                    { "key": "generation", "match": { "value": "g1" } }
                ]
            })
        );
    }

    #[test]
    fn excluded_generations_become_must_not() {
        let filter = ChunkFilter::for_user("u1")
            .namespace(Namespace::Profile)
            .excluding_generations(["live", "sections"]);

        let value = build_chunk_filter(&filter);
        assert_eq!(
            value["must_not"],
            json!([{ "key": "generation", "match": { "any": ["live", "sections"] } }])
        );
    }

    #[test]
    fn blank_section_ids_are_ignored() {
        let filter = ChunkFilter::for_user("u1").sections(["  ", ""]);
        assert_eq!(build_chunk_filter(&filter)["must"].as_array().map(Vec::len), Some(1));
    }
}
