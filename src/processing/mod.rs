//! Document processing pipeline: cleaning, chunking, embedding and vector store orchestration.

pub mod chunking;
pub mod cleaning;
mod mappers;
mod pipeline;
mod sanitize;
pub mod types;

pub use chunking::TextChunker;
pub use cleaning::TextCleaner;
pub use pipeline::{DEFAULT_ZERO_SHOT_LABELS, IngestionPipeline, IngestionSettings};
pub use types::{
    Chunk, ChunkingError, IngestItem, IngestionReport, ItemFailure, ProcessingError,
};
