//! Qdrant vector store integration.

pub mod client;
mod filters;
mod payload;
mod scroller;
pub mod types;

pub use client::QdrantStore;
pub use payload::current_timestamp_rfc3339;
pub use types::QdrantSettings;
