use crate::processing::{
    ChunkingError, DEFAULT_ZERO_SHOT_LABELS, IngestionSettings, TextChunker, TextCleaner,
};
use crate::qdrant::QdrantSettings;
use crate::retrieval::RetrievalSettings;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_IMAGE_MODEL: &str = "clip-ViT-L-14";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Supported text embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Offline feature-hashing embedder.
    Hashing,
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "hashing" => Ok(Self::Hashing),
            _ => Err(()),
        }
    }
}

/// Supported image embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ImageProvider {
    /// Images are not embedded.
    #[default]
    None,
    /// HTTP CLIP embedding service.
    Clip,
    /// Offline feature-hashing embedder.
    Hashing,
}

impl FromStr for ImageProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "clip" => Ok(Self::Clip),
            "hashing" => Ok(Self::Hashing),
            _ => Err(()),
        }
    }
}

/// Runtime configuration for ingestion and retrieval.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Qdrant instance that stores embeddings.
    pub qdrant_url: String,
    /// Name of the Qdrant collection used as the vector namespace.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Text embedding backend.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of every stored vector.
    pub embedding_dimension: usize,
    /// Base URL of the Ollama runtime.
    pub ollama_url: String,
    /// Image embedding backend.
    pub image_embedding_provider: ImageProvider,
    /// Base URL of the CLIP service.
    pub image_embedding_url: Option<String>,
    /// CLIP model identifier.
    pub image_embedding_model: String,
    /// Timeout applied to embedding and vector store requests.
    pub request_timeout: Duration,
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks.
    pub chunk_overlap: usize,
    /// Keep paragraph breaks while cleaning text.
    pub preserve_paragraphs: bool,
    /// Drop page-number and copyright lines while cleaning text.
    pub strip_headers_footers: bool,
    /// Candidate counts and score threshold for queries.
    pub retrieval: RetrievalSettings,
    /// Chunks embedded and upserted per batch.
    pub upsert_batch_size: usize,
    /// Batches in flight during ingestion.
    pub ingest_concurrency: usize,
    /// Labels offered to the zero-shot image classifier.
    pub zero_shot_labels: Vec<String>,
}

impl Config {
    /// Load `.env` (when present) and read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        tracing::debug!(
            qdrant_url = %config.qdrant_url,
            collection = %config.qdrant_collection_name,
            embedding_provider = ?config.embedding_provider,
            image_provider = ?config.image_embedding_provider,
            dimension = config.embedding_dimension,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Build configuration from an arbitrary variable lookup, validating combinations.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let required = |key: &str| get(key).ok_or_else(|| ConfigError::MissingVariable(key.into()));

        let embedding_provider = required("EMBEDDING_PROVIDER")?
            .parse()
            .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".into()))?;
        let embedding_dimension: usize = parse_required(&required, "EMBEDDING_DIMENSION")?;
        if embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue(
                "EMBEDDING_DIMENSION must be greater than zero".into(),
            ));
        }

        let image_embedding_provider = match get("IMAGE_EMBEDDING_PROVIDER") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("IMAGE_EMBEDDING_PROVIDER".into()))?,
            None => ImageProvider::None,
        };
        let image_embedding_url = get("IMAGE_EMBEDDING_URL");
        if image_embedding_provider == ImageProvider::Clip && image_embedding_url.is_none() {
            return Err(ConfigError::MissingVariable("IMAGE_EMBEDDING_URL".into()));
        }

        let chunk_size = parse_or(&get, "CHUNK_SIZE", 1000)?;
        let chunk_overlap = parse_or(&get, "CHUNK_OVERLAP", 200)?;
        TextChunker::new(chunk_size, chunk_overlap)
            .map_err(|error| ConfigError::InvalidValue(format!("CHUNK_OVERLAP: {error}")))?;

        let retrieval = RetrievalSettings::new(
            parse_or(&get, "RAG_TOP_K", 5)?,
            parse_or(&get, "RAG_SCORE_THRESHOLD", 0.0)?,
            parse_or(&get, "RAG_RERANK_TOP_K", 3)?,
        )
        .map_err(|error| ConfigError::InvalidValue(format!("RAG_RERANK_TOP_K: {error}")))?;

        let upsert_batch_size = parse_or(&get, "UPSERT_BATCH_SIZE", 100)?;
        let ingest_concurrency = parse_or(&get, "INGEST_CONCURRENCY", 4)?;
        if upsert_batch_size == 0 || ingest_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "UPSERT_BATCH_SIZE and INGEST_CONCURRENCY must be greater than zero".into(),
            ));
        }

        let zero_shot_labels = match get("ZERO_SHOT_LABELS") {
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_ZERO_SHOT_LABELS
                .iter()
                .map(|label| label.to_string())
                .collect(),
        };

        Ok(Self {
            qdrant_url: required("QDRANT_URL")?,
            qdrant_collection_name: required("QDRANT_COLLECTION_NAME")?,
            qdrant_api_key: get("QDRANT_API_KEY"),
            embedding_provider,
            embedding_model: required("EMBEDDING_MODEL")?,
            embedding_dimension,
            ollama_url: get("OLLAMA_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            image_embedding_provider,
            image_embedding_url,
            image_embedding_model: get("IMAGE_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            request_timeout: Duration::from_secs(parse_or(&get, "EMBEDDING_TIMEOUT_SECS", 30)?),
            chunk_size,
            chunk_overlap,
            preserve_paragraphs: parse_bool(&get, "TEXT_CLEANER_PRESERVE_PARAGRAPHS", false)?,
            strip_headers_footers: parse_bool(&get, "TEXT_CLEANER_STRIP_HEADERS", false)?,
            retrieval,
            upsert_batch_size,
            ingest_concurrency,
            zero_shot_labels,
        })
    }

    /// Connection settings for the Qdrant adapter.
    pub fn qdrant_settings(&self) -> QdrantSettings {
        QdrantSettings {
            url: self.qdrant_url.clone(),
            collection: self.qdrant_collection_name.clone(),
            api_key: self.qdrant_api_key.clone(),
            dimension: self.embedding_dimension,
            timeout: self.request_timeout,
        }
    }

    /// Cleaner configured for this deployment.
    pub fn text_cleaner(&self) -> TextCleaner {
        TextCleaner::new()
            .preserve_paragraphs(self.preserve_paragraphs)
            .strip_headers_footers(self.strip_headers_footers)
    }

    /// Chunker configured for this deployment.
    pub fn text_chunker(&self) -> Result<TextChunker, ChunkingError> {
        TextChunker::new(self.chunk_size, self.chunk_overlap)
    }

    /// Batching settings for the ingestion pipeline.
    pub fn ingestion_settings(&self) -> IngestionSettings {
        IngestionSettings {
            upsert_batch_size: self.upsert_batch_size,
            max_concurrent_batches: self.ingest_concurrency,
            zero_shot_labels: self.zero_shot_labels.clone(),
        }
    }
}

fn parse_required<T, R>(required: &R, key: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    R: Fn(&str) -> Result<String, ConfigError>,
{
    required(key)?
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
        .map(|value| value.unwrap_or(default))
}

fn parse_bool<G>(get: &G, key: &str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|value| value.trim().to_lowercase()) {
        None => Ok(default),
        Some(value) => match value.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(key.to_string())),
        },
    }
}
