use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use mmrag::{
    config::{Config, EmbeddingProvider, ImageProvider},
    embedding::{
        ClipImageEmbedder, HashingEmbedder, ImageEmbeddingProvider, Modality, OllamaTextEmbedder,
        TextEmbeddingProvider,
    },
    logging,
    processing::IngestionPipeline,
    qdrant::QdrantStore,
    retrieval::{Query, QueryEngine, Retriever},
    source::{DirectorySource, DocumentSource, FileSource},
    store::VectorStore,
};
use serde::Serialize;
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "mmrag",
    about = "Multimodal ingestion and retrieval backed by Qdrant"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a text file, an image or a directory.
    Ingest {
        path: PathBuf,
        /// Extra image files attached to the document.
        #[arg(long = "image")]
        images: Vec<PathBuf>,
    },
    /// Retrieve context for a text and/or image query.
    Query {
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        image: Option<PathBuf>,
        /// Restrict hits to a modality; repeatable.
        #[arg(long = "modality", value_parser = parse_modality)]
        modalities: Vec<Modality>,
    },
    /// Delete every record ingested from a source.
    Delete { source: String },
    /// List ingested sources.
    Sources,
    /// Drop and recreate the collection.
    Reset,
}

struct Components {
    text_embedder: Arc<dyn TextEmbeddingProvider>,
    image_embedder: Option<Arc<dyn ImageEmbeddingProvider>>,
    store: Arc<dyn VectorStore>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    logging::init_tracing();
    let components = build_components(&config)?;

    match cli.command {
        Command::Ingest { path, images } => ingest(&config, components, path, images).await,
        Command::Query {
            text,
            image,
            modalities,
        } => query(&config, components, text, image, modalities).await,
        Command::Delete { source } => {
            components.store.delete_source(&source).await?;
            print_json(&json!({ "deleted": source }))
        }
        Command::Sources => {
            let sources = components.store.list_sources().await?;
            print_json(&sources)
        }
        Command::Reset => {
            components.store.reset().await?;
            print_json(&json!({ "reset": config.qdrant_collection_name }))
        }
    }
}

fn build_components(config: &Config) -> Result<Components> {
    let timeout = config.request_timeout;
    let dimension = config.embedding_dimension;
    let hashing = Arc::new(HashingEmbedder::new(dimension));

    let text_embedder: Arc<dyn TextEmbeddingProvider> = match config.embedding_provider {
        EmbeddingProvider::Ollama => Arc::new(
            OllamaTextEmbedder::new(
                &config.ollama_url,
                &config.embedding_model,
                dimension,
                timeout,
            )
            .context("failed to build Ollama embedder")?,
        ),
        EmbeddingProvider::Hashing => hashing.clone(),
    };

    let image_embedder: Option<Arc<dyn ImageEmbeddingProvider>> =
        match config.image_embedding_provider {
            ImageProvider::None => None,
            ImageProvider::Hashing => Some(hashing),
            ImageProvider::Clip => {
                let Some(url) = config.image_embedding_url.as_deref() else {
                    bail!("IMAGE_EMBEDDING_URL is required for the clip provider");
                };
                Some(Arc::new(
                    ClipImageEmbedder::new(url, &config.image_embedding_model, dimension, timeout)
                        .context("failed to build CLIP embedder")?,
                ))
            }
        };

    let store = Arc::new(
        QdrantStore::new(config.qdrant_settings()).context("failed to build Qdrant client")?,
    );

    Ok(Components {
        text_embedder,
        image_embedder,
        store,
    })
}

async fn ingest(
    config: &Config,
    components: Components,
    path: PathBuf,
    images: Vec<PathBuf>,
) -> Result<()> {
    let source: Box<dyn DocumentSource> = if path.is_dir() {
        if !images.is_empty() {
            bail!("--image cannot be combined with a directory; place images inside it instead");
        }
        Box::new(DirectorySource::new(path))
    } else {
        Box::new(FileSource::new(path).with_images(images))
    };

    components
        .store
        .ensure_ready()
        .await
        .context("vector store is not ready")?;

    let pipeline = IngestionPipeline::new(
        config.text_cleaner(),
        config.text_chunker()?,
        components.text_embedder,
        components.image_embedder,
        components.store,
        config.ingestion_settings(),
    )?;

    let report = pipeline.ingest(source.as_ref()).await?;
    print_json(&report)
}

async fn query(
    config: &Config,
    components: Components,
    text: Option<String>,
    image: Option<PathBuf>,
    modalities: Vec<Modality>,
) -> Result<()> {
    let image = match image {
        Some(path) => Some(
            tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read query image {}", path.display()))?,
        ),
        None => None,
    };

    let retriever = Retriever::new(components.store, config.retrieval);
    let engine = QueryEngine::new(components.text_embedder, components.image_embedder, retriever);
    let query = Query {
        text,
        image,
        modalities: (!modalities.is_empty()).then_some(modalities),
    };

    let context = engine.run(&query).await?;
    print_json(&json!({
        "results": context.items(),
        "context": context.render(),
    }))
}

fn parse_modality(value: &str) -> Result<Modality, String> {
    value
        .parse()
        .map_err(|()| format!("unknown modality '{value}' (expected text or image)"))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{rendered}");
    Ok(())
}
