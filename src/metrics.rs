use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing indexing, retrieval, and refinement activity.
#[derive(Default)]
pub struct PipelineMetrics {
    profiles_indexed: AtomicU64,
    sections_indexed: AtomicU64,
    chunks_indexed: AtomicU64,
    chunks_collected: AtomicU64,
    retrievals: AtomicU64,
    refinement_runs: AtomicU64,
    refinement_attempts: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a namespace re-index and the chunks it produced.
    pub fn record_profile_index(&self, chunk_count: u64) {
        self.profiles_indexed.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record a section re-index and the chunks it produced.
    pub fn record_section_index(&self, chunk_count: u64) {
        self.sections_indexed.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record chunks removed by stale-generation collection.
    pub fn record_collected(&self, chunk_count: u64) {
        self.chunks_collected.fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record one retrieval call.
    pub fn record_retrieval(&self) {
        self.retrievals.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished refinement run and how many generations it made.
    pub fn record_refinement(&self, attempts: u64) {
        self.refinement_runs.fetch_add(1, Ordering::Relaxed);
        self.refinement_attempts
            .fetch_add(attempts, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            profiles_indexed: self.profiles_indexed.load(Ordering::Relaxed),
            sections_indexed: self.sections_indexed.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            chunks_collected: self.chunks_collected.load(Ordering::Relaxed),
            retrievals: self.retrievals.load(Ordering::Relaxed),
            refinement_runs: self.refinement_runs.load(Ordering::Relaxed),
            refinement_attempts: self.refinement_attempts.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Namespace re-index runs since startup.
    pub profiles_indexed: u64,
    /// Section re-index runs since startup.
    pub sections_indexed: u64,
    /// Chunks written across all runs.
    pub chunks_indexed: u64,
    /// Chunks of superseded generations removed.
    pub chunks_collected: u64,
    /// Retrieval calls served.
    pub retrievals: u64,
    /// Refinement runs completed.
    pub refinement_runs: u64,
    /// Generation attempts across all refinement runs.
    pub refinement_attempts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_indexing_and_refinement() {
        let metrics = PipelineMetrics::new();
        metrics.record_profile_index(2);
        metrics.record_section_index(3);
        metrics.record_collected(4);
        metrics.record_refinement(3);
        metrics.record_retrieval();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.profiles_indexed, 1);
        assert_eq!(snapshot.sections_indexed, 1);
        assert_eq!(snapshot.chunks_indexed, 5);
        assert_eq!(snapshot.chunks_collected, 4);
        assert_eq!(snapshot.refinement_runs, 1);
        assert_eq!(snapshot.refinement_attempts, 3);
        assert_eq!(snapshot.retrievals, 1);
    }

    #[test]
    fn snapshot_starts_empty() {
        assert_eq!(PipelineMetrics::new().snapshot(), MetricsSnapshot::default());
    }
}
