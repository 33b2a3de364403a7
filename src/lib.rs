#![deny(missing_docs)]

//! Core library for the resume-forge retrieval and refinement service.

/// Conversational agent driving versioned session drafts.
pub mod agent;
/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Explicit wiring of capabilities into services.
pub mod context;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Failure classification shared across modules.
pub mod error;
/// Resume generation capability and draft model.
pub mod generation;
/// Per-user index status and generation pointers.
pub mod index_status;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline activity counters.
pub mod metrics;
/// Chunking, indexing, and retrieval.
pub mod processing;
/// Structured profile source.
pub mod profile;
/// Score-driven refinement loop.
pub mod refinement;
/// Resume scoring and suggestion capabilities.
pub mod scoring;
/// Versioned conversation state.
pub mod session;
/// Chunk persistence and similarity search.
pub mod store;
/// Shared HTTP transport with retries.
pub mod transport;
