//! Qdrant-backed chunk store.

mod client;
mod filters;
mod payload;
mod types;

pub use client::QdrantChunkStore;
pub use filters::build_chunk_filter;
pub use payload::compute_chunk_hash;
