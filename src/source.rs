//! Document sources feeding the ingestion pipeline.
//!
//! Format-specific extraction (PDF, DOCX, URLs) stays outside the crate; anything able to
//! produce text plus raw image bytes plugs in through [`DocumentSource`].

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

const TEXT_EXTENSIONS: [&str; 5] = ["txt", "md", "markdown", "rst", "text"];
const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Errors raised while loading a document.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Reading from disk failed.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Text content is not valid UTF-8.
    #[error("{0} is not valid UTF-8 text")]
    InvalidEncoding(PathBuf),
    /// The input cannot be handled by this source.
    #[error("Unsupported input {path}: {reason}")]
    Unsupported {
        /// Offending path.
        path: PathBuf,
        /// Why the input was refused.
        reason: String,
    },
}

impl SourceError {
    /// Whether the failure may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io { source, .. }
                if matches!(source.kind(), io::ErrorKind::Interrupted | io::ErrorKind::TimedOut)
        )
    }
}

/// Provenance attached to every record produced from a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceMetadata {
    /// Stable source identifier; also keys deletion.
    pub source: String,
    /// Display name used when rendering context.
    pub filename: Option<String>,
    /// Free-form attributes copied onto each record.
    pub attributes: BTreeMap<String, String>,
}

/// Raw image extracted from or attached to a document.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedImage {
    /// File name of the image.
    pub name: String,
    /// Encoded image bytes.
    pub bytes: Vec<u8>,
}

/// A document ready for cleaning, chunking and embedding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedDocument {
    /// Raw extracted text.
    pub text: String,
    /// Images in document order.
    pub images: Vec<LoadedImage>,
    /// Provenance metadata.
    pub metadata: SourceMetadata,
}

/// Capability producing a [`LoadedDocument`].
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Load the document.
    async fn load(&self) -> Result<LoadedDocument, SourceError>;
}

/// A single text or image file, optionally with extra image attachments.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    images: Vec<PathBuf>,
}

impl FileSource {
    /// Source reading `path`. Image files load as image-only documents.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            images: Vec::new(),
        }
    }

    /// Attach additional image files.
    pub fn with_images(mut self, images: impl IntoIterator<Item = PathBuf>) -> Self {
        self.images.extend(images);
        self
    }
}

#[async_trait]
impl DocumentSource for FileSource {
    async fn load(&self) -> Result<LoadedDocument, SourceError> {
        let mut document = LoadedDocument {
            metadata: SourceMetadata {
                source: self.path.display().to_string(),
                filename: file_name(&self.path),
                attributes: BTreeMap::new(),
            },
            ..LoadedDocument::default()
        };

        if is_image(&self.path) {
            document.images.push(read_image(&self.path).await?);
        } else {
            document.text = read_text(&self.path).await?;
        }
        for image in &self.images {
            document.images.push(read_image(image).await?);
        }

        tracing::debug!(
            source = %document.metadata.source,
            chars = document.text.chars().count(),
            images = document.images.len(),
            "Loaded file source"
        );
        Ok(document)
    }
}

/// Every text and image file below a directory, in file-name order.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// Source walking `root` recursively.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DocumentSource for DirectorySource {
    async fn load(&self) -> Result<LoadedDocument, SourceError> {
        if !self.root.is_dir() {
            return Err(SourceError::Unsupported {
                path: self.root.clone(),
                reason: "not a directory".into(),
            });
        }

        let mut text_files = Vec::new();
        let mut image_files = Vec::new();
        for entry in WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
        {
            let path = entry.into_path();
            if is_image(&path) {
                image_files.push(path);
            } else if has_extension(&path, &TEXT_EXTENSIONS) {
                text_files.push(path);
            }
        }

        let mut sections = Vec::with_capacity(text_files.len());
        for path in &text_files {
            sections.push(read_text(path).await?);
        }
        let mut images = Vec::with_capacity(image_files.len());
        for path in &image_files {
            images.push(read_image(path).await?);
        }

        let mut attributes = BTreeMap::new();
        attributes.insert("text_files".to_string(), text_files.len().to_string());

        tracing::info!(
            root = %self.root.display(),
            text_files = text_files.len(),
            images = images.len(),
            "Loaded directory source"
        );

        Ok(LoadedDocument {
            text: sections.join("\n\n"),
            images,
            metadata: SourceMetadata {
                source: self.root.display().to_string(),
                filename: file_name(&self.root),
                attributes,
            },
        })
    }
}

async fn read_text(path: &Path) -> Result<String, SourceError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| SourceError::InvalidEncoding(path.to_path_buf()))
}

async fn read_image(path: &Path) -> Result<LoadedImage, SourceError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(LoadedImage {
        name: file_name(path).unwrap_or_else(|| path.display().to_string()),
        bytes,
    })
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

fn is_image(path: &Path) -> bool {
    has_extension(path, &IMAGE_EXTENSIONS)
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| allowed.iter().any(|candidate| ext.eq_ignore_ascii_case(candidate)))
}
