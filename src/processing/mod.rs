//! Indexing and retrieval: chunking, embedding, generation-tagged writes, and filtered search.

pub mod chunking;
mod mappers;
mod service;
pub mod types;

pub use service::{IndexingPipeline, MAX_TOP_K, Retriever, USER_EDITED_SOURCE};
pub use types::{
    ChunkingError, IndexReport, IndexingError, RetrievalError, RetrievalOutcome, RetrievalQuery,
    RetrievalRequest, RetrievedChunk, SectionIndexReport,
};
