//! Mapping helpers between extracted text, stored points, and search results.

use crate::{
    processing::types::RetrievedChunk,
    store::{ChunkPoint, ChunkRecord, Namespace, ScoredChunk, qdrant::compute_chunk_hash},
};
use time::OffsetDateTime;
use uuid::Uuid;

/// Shared provenance of the chunks produced from one text item.
pub(crate) struct ChunkOrigin<'a> {
    pub(crate) user_id: &'a str,
    pub(crate) namespace: Namespace,
    pub(crate) section_id: Option<&'a str>,
    pub(crate) source_type: &'a str,
    pub(crate) source_id: &'a str,
    pub(crate) generation: &'a str,
    pub(crate) created_at: OffsetDateTime,
}

/// Pair chunk texts with their vectors and stamp provenance onto each.
///
/// Source ids are suffixed with the chunk position; the section defaults to the source type.
pub(crate) fn build_points(
    origin: &ChunkOrigin<'_>,
    texts: Vec<String>,
    vectors: Vec<Vec<f32>>,
) -> Vec<ChunkPoint> {
    texts
        .into_iter()
        .zip(vectors)
        .enumerate()
        .map(|(index, (text, vector))| ChunkPoint {
            record: ChunkRecord {
                chunk_id: Uuid::new_v4().to_string(),
                user_id: origin.user_id.to_string(),
                namespace: origin.namespace,
                section_id: origin.section_id.unwrap_or(origin.source_type).to_string(),
                source_type: origin.source_type.to_string(),
                source_id: format!("{}_{index}", origin.source_id),
                chunk_hash: compute_chunk_hash(&text),
                text,
                created_at: origin.created_at,
                generation: origin.generation.to_string(),
            },
            vector,
        })
        .collect()
}

/// Map a store hit into the public chunk representation.
pub(crate) fn map_scored_chunk(hit: ScoredChunk) -> RetrievedChunk {
    let ScoredChunk { record, score } = hit;
    RetrievedChunk {
        chunk_id: record.chunk_id,
        user_id: record.user_id,
        index_namespace: record.namespace,
        section_id: record.section_id,
        source_type: record.source_type,
        source_id: record.source_id,
        text: record.text,
        score,
        created_at: record.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn origin(section_id: Option<&'static str>) -> ChunkOrigin<'static> {
        ChunkOrigin {
            user_id: "u1",
            namespace: Namespace::Profile,
            section_id,
            source_type: "experience",
            source_id: "2",
            generation: "g1",
            created_at: datetime!(2025-01-01 0:00 UTC),
        }
    }

    #[test]
    fn build_points_defaults_section_and_suffixes_source_id() {
        let points = build_points(
            &origin(None),
            vec!["First.".into(), "Second.".into()],
            vec![vec![1.0], vec![0.5]],
        );

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].record.section_id, "experience");
        assert_eq!(points[0].record.source_id, "2_0");
        assert_eq!(points[1].record.source_id, "2_1");
        assert_eq!(points[1].vector, vec![0.5]);
        assert_eq!(points[0].record.chunk_hash, compute_chunk_hash("First."));
        assert_ne!(points[0].record.chunk_id, points[1].record.chunk_id);
    }

    #[test]
    fn build_points_keeps_explicit_section() {
        let points = build_points(&origin(Some("summary")), vec!["Text.".into()], vec![vec![1.0]]);
        assert_eq!(points[0].record.section_id, "summary");
        assert_eq!(points[0].record.source_type, "experience");
    }

    #[test]
    fn map_scored_chunk_copies_metadata() {
        let point = build_points(&origin(None), vec!["Body.".into()], vec![vec![1.0]]).remove(0);
        let hit = map_scored_chunk(ScoredChunk {
            record: point.record.clone(),
            score: 0.42,
        });
        assert_eq!(hit.chunk_id, point.record.chunk_id);
        assert_eq!(hit.index_namespace, Namespace::Profile);
        assert_eq!(hit.text, "Body.");
        assert!((hit.score - 0.42).abs() < f32::EPSILON);
    }
}
