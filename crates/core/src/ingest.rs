use crate::chunking::{chunk_document, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::extractor::{DocumentKind, TextExtractor};
use crate::index::IndexStore;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Files under `folder` with a recognised document extension, sorted.
pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let recognised = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(DocumentKind::from_extension)
            .is_some();

        if recognised {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn source_tag(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

/// Copies an uploaded file into `upload_dir` and returns the copy's path.
pub fn stage_upload(source: &Path, upload_dir: &Path) -> Result<PathBuf, IngestError> {
    let name = source_tag(source)?;
    fs::create_dir_all(upload_dir)?;
    let staged = upload_dir.join(name);
    if is_same_file(source, &staged)? {
        debug!(path = %staged.display(), "upload is already staged");
        return Ok(staged);
    }
    fs::copy(source, &staged)?;
    Ok(staged)
}

fn is_same_file(source: &Path, staged: &Path) -> Result<bool, IngestError> {
    if !staged.exists() {
        return Ok(false);
    }
    Ok(fs::canonicalize(source)? == fs::canonicalize(staged)?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedDocument {
    pub source: String,
    pub checksum: String,
    pub segment_count: usize,
    pub total_records: usize,
    /// An earlier ingestion recorded the same checksum.
    pub previously_ingested: bool,
}

#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestionReport {
    pub ingested: Vec<IngestedDocument>,
    pub skipped: Vec<SkippedDocument>,
}

/// Extract, chunk and index documents into one store.
pub struct IngestPipeline<E> {
    extractor: TextExtractor,
    chunking: ChunkingConfig,
    store: IndexStore<E>,
}

impl<E: Embedder> IngestPipeline<E> {
    pub fn new(extractor: TextExtractor, chunking: ChunkingConfig, store: IndexStore<E>) -> Result<Self, IngestError> {
        chunking.validate()?;
        Ok(Self {
            extractor,
            chunking,
            store,
        })
    }

    pub fn store(&self) -> &IndexStore<E> {
        &self.store
    }

    /// Ingests a single file under `tag`, or its file name when no tag is given.
    pub fn ingest_file(&self, path: &Path, tag: Option<&str>) -> Result<IngestedDocument, IngestError> {
        let source = match tag {
            Some(tag) => tag.to_string(),
            None => source_tag(path)?,
        };
        info!(path = %path.display(), source = %source, "ingesting file");

        let checksum = digest_file(path)?;
        let text = self.extractor.extract(path)?;
        let segments = chunk_document(&text, &source, self.chunking)?;

        let previously_ingested = self
            .store
            .load()?
            .map(|index| {
                index
                    .documents
                    .iter()
                    .any(|entry| entry.checksum.as_deref() == Some(checksum.as_str()))
            })
            .unwrap_or(false);
        if previously_ingested {
            warn!(source = %source, "identical content was ingested before; appending again");
        }

        let index = self
            .store
            .add_document(&segments, &source, Some(checksum.clone()))?;

        Ok(IngestedDocument {
            source,
            checksum,
            segment_count: segments.len(),
            total_records: index.len(),
            previously_ingested,
        })
    }

    /// Ingests every recognised file under `folder`, skipping the ones that fail.
    pub fn ingest_folder_best_effort(&self, folder: &Path) -> Result<IngestionReport, IngestError> {
        let files = discover_documents(folder);

        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no documents found in {}",
                folder.display()
            )));
        }

        let mut report = IngestionReport::default();
        for path in files {
            let tag = path
                .strip_prefix(folder)
                .ok()
                .map(|relative| relative.to_string_lossy().to_string());

            match self.ingest_file(&path, tag.as_deref()) {
                Ok(document) => report.ingested.push(document),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping document");
                    report.skipped.push(SkippedDocument {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }
}
