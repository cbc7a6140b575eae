#![deny(missing_docs)]

//! Core library for multimodal document ingestion and retrieval.

/// Environment-driven configuration management.
pub mod config;
/// Embedding capabilities and provider adapters.
pub mod embedding;
/// Cross-modal query vector fusion.
pub mod fusion;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion metrics helpers.
pub mod metrics;
/// Document processing pipeline utilities.
pub mod processing;
/// Qdrant vector store integration.
pub mod qdrant;
/// Query-time retrieval and context assembly.
pub mod retrieval;
/// Document sources feeding ingestion.
pub mod source;
/// Vector store contract and in-memory implementation.
pub mod store;
