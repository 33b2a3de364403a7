//! In-memory [`ChunkStore`] used by tests and offline runs.
//!
//! Vector search is brute-force cosine similarity over every stored chunk.

use super::{ChunkFilter, ChunkPoint, ChunkStore, ScoredChunk, StoreError, rank};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Process-local chunk store.
#[derive(Default)]
pub struct InMemoryChunkStore {
    points: RwLock<HashMap<String, ChunkPoint>>,
}

impl InMemoryChunkStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of chunks across all users.
    pub fn len(&self) -> usize {
        self.read().map(|points| points.len()).unwrap_or_default()
    }

    /// Whether the store holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, ChunkPoint>>, StoreError> {
        self.points
            .read()
            .map_err(|_| StoreError::Unavailable("chunk map lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, ChunkPoint>>, StoreError> {
        self.points
            .write()
            .map_err(|_| StoreError::Unavailable("chunk map lock poisoned".into()))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn upsert(&self, chunks: Vec<ChunkPoint>) -> Result<usize, StoreError> {
        let count = chunks.len();
        let mut points = self.write()?;
        for chunk in chunks {
            points.insert(chunk.record.chunk_id.clone(), chunk);
        }
        Ok(count)
    }

    async fn delete(&self, filter: &ChunkFilter) -> Result<usize, StoreError> {
        let mut points = self.write()?;
        let before = points.len();
        points.retain(|_, point| !filter.matches(&point.record));
        Ok(before - points.len())
    }

    async fn count(&self, filter: &ChunkFilter) -> Result<usize, StoreError> {
        let points = self.read()?;
        Ok(points
            .values()
            .filter(|point| filter.matches(&point.record))
            .count())
    }

    async fn search(
        &self,
        filter: &ChunkFilter,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let points = self.read()?;
        let hits = points
            .values()
            .filter(|point| filter.matches(&point.record))
            .map(|point| ScoredChunk {
                record: point.record.clone(),
                score: cosine_similarity(vector, &point.vector),
            })
            .collect();
        Ok(rank(hits, top_k))
    }
}
