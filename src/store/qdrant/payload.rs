//! Helpers for constructing, hashing, and decoding chunk payloads.

use crate::store::{ChunkRecord, Namespace, StoreError};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Build the payload object stored alongside each chunk vector.
pub(crate) fn build_payload(record: &ChunkRecord) -> Value {
    json!({
        "chunk_id": record.chunk_id,
        "user_id": record.user_id,
        "index_namespace": record.namespace.as_str(),
        "section_id": record.section_id,
        "source_type": record.source_type,
        "source_id": record.source_id,
        "text": record.text,
        "created_at": format_timestamp(record.created_at),
        "generation": record.generation,
        "chunk_hash": record.chunk_hash,
    })
}

/// Decode a stored payload back into a [`ChunkRecord`].
pub(crate) fn parse_payload(
    point_id: &str,
    payload: Option<Map<String, Value>>,
) -> Result<ChunkRecord, StoreError> {
    let malformed = |reason: String| StoreError::MalformedPoint {
        id: point_id.to_string(),
        reason,
    };
    let payload = payload.ok_or_else(|| malformed("payload missing".into()))?;
    let field = |key: &str| -> Result<String, StoreError> {
        match payload.get(key) {
            Some(Value::String(value)) => Ok(value.clone()),
            Some(other) => Err(malformed(format!("field '{key}' is not a string: {other}"))),
            None => Err(malformed(format!("field '{key}' missing"))),
        }
    };

    let namespace = field("index_namespace")?
        .parse::<Namespace>()
        .map_err(|reason| malformed(reason))?;
    let created_at_raw = field("created_at")?;
    let created_at = OffsetDateTime::parse(&created_at_raw, &Rfc3339)
        .map_err(|err| malformed(format!("created_at '{created_at_raw}': {err}")))?;
    let chunk_id = match payload.get("chunk_id") {
        Some(Value::String(value)) => value.clone(),
        _ => point_id.to_string(),
    };

    Ok(ChunkRecord {
        chunk_id,
        user_id: field("user_id")?,
        namespace,
        section_id: field("section_id")?,
        source_type: field("source_type")?,
        source_id: field("source_id")?,
        text: field("text")?,
        created_at,
        generation: field("generation")?,
        chunk_hash: field("chunk_hash").unwrap_or_default(),
    })
}

/// Compute a deterministic SHA-256 hash for the chunk text.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Timestamp formatted for payload storage.
pub(crate) fn format_timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::record;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn chunk_hash_is_stable() {
        let h1 = compute_chunk_hash("Built scalable systems.");
        let h2 = compute_chunk_hash("Built scalable systems.");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn payload_carries_every_metadata_field() {
        let original = record("u1", Namespace::ResumeSections, "summary", "g7");
        let payload = build_payload(&original);
        assert_eq!(payload["index_namespace"], "resume_sections");
        assert_eq!(payload["created_at"], "2025-01-01T00:00:00Z");

        let decoded = parse_payload("point-1", Some(as_map(payload))).expect("decode");
        assert_eq!(decoded, original);
    }

    #[test]
    fn missing_fields_are_malformed() {
        let mut payload = as_map(build_payload(&record("u1", Namespace::Profile, "skills", "g1")));
        payload.remove("text");
        let error = parse_payload("point-1", Some(payload)).expect_err("missing text");
        assert!(matches!(error, StoreError::MalformedPoint { ref reason, .. } if reason.contains("text")));

        assert!(parse_payload("point-2", None).is_err());
    }

    #[test]
    fn unknown_namespace_is_malformed() {
        let mut payload = as_map(build_payload(&record("u1", Namespace::Profile, "skills", "g1")));
        payload.insert("index_namespace".into(), Value::String("drafts".into()));
        assert!(parse_payload("point-1", Some(payload)).is_err());
    }
}
