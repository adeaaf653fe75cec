use crate::embeddings::{cosine, Embedder};
use crate::error::IndexUnavailableError;
use crate::models::{DocumentEntry, EmbeddingRecord, IndexMetadata, SearchHit, Segment};
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub const INDEX_FORMAT_VERSION: u32 = 1;
const SNAPSHOT_SUFFIX: &str = "index.json";
const LOCK_SUFFIX: &str = "lock";

/// Every embedding record ingested so far, plus what built them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorIndex {
    pub metadata: IndexMetadata,
    pub documents: Vec<DocumentEntry>,
    pub records: Vec<EmbeddingRecord>,
}

impl VectorIndex {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The `k` records closest to `query_vector`, best first. Equal scores
    /// keep insertion order.
    pub fn search(&self, query_vector: &[f32], k: usize) -> Vec<SearchHit> {
        let mut hits = self
            .records
            .iter()
            .enumerate()
            .map(|(position, record)| SearchHit {
                text: record.text.clone(),
                source: record.source.clone(),
                score: cosine(query_vector, &record.vector),
                position,
            })
            .collect::<Vec<_>>();

        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(k);
        hits
    }
}

/// Durable, append-only vector index stored as `<dir>/<name>.index.json`.
///
/// Writers hold an exclusive advisory lock on `<dir>/<name>.lock` across the
/// whole load-append-persist sequence; readers hold a shared one while they
/// read the snapshot.
pub struct IndexStore<E> {
    dir: PathBuf,
    name: String,
    embedder: E,
}

impl<E: Embedder> IndexStore<E> {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>, embedder: E) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            embedder,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{SNAPSHOT_SUFFIX}", self.name))
    }

    pub(crate) fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{LOCK_SUFFIX}", self.name))
    }

    pub fn create_empty(&self) -> VectorIndex {
        let now = Utc::now();
        VectorIndex {
            metadata: IndexMetadata {
                format_version: INDEX_FORMAT_VERSION,
                name: self.name.clone(),
                embedder: self.embedder.id(),
                dimensions: self.embedder.dimensions(),
                created_at: now,
                updated_at: now,
            },
            documents: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Reads the persisted index, or `None` when nothing was ever ingested.
    pub fn load(&self) -> Result<Option<VectorIndex>, IndexUnavailableError> {
        if !self.snapshot_path().exists() {
            return Ok(None);
        }

        let _guard = IndexLock::shared(&self.lock_path())?;
        self.load_unlocked()
    }

    fn load_unlocked(&self) -> Result<Option<VectorIndex>, IndexUnavailableError> {
        let path = self.snapshot_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(IndexUnavailableError::Io { path, source }),
        };

        let index: VectorIndex =
            serde_json::from_slice(&bytes).map_err(|error| IndexUnavailableError::Corrupt {
                path: path.clone(),
                details: error.to_string(),
            })?;

        if index.metadata.format_version > INDEX_FORMAT_VERSION {
            return Err(IndexUnavailableError::Corrupt {
                path,
                details: format!(
                    "unsupported format version {}",
                    index.metadata.format_version
                ),
            });
        }

        let current = self.embedder.id();
        let current_dimensions = self.embedder.dimensions();
        if index.metadata.embedder != current || index.metadata.dimensions != current_dimensions {
            return Err(IndexUnavailableError::EmbedderMismatch {
                stored: index.metadata.embedder,
                stored_dimensions: index.metadata.dimensions,
                current,
                current_dimensions,
            });
        }

        debug!(path = %path.display(), records = index.records.len(), "index loaded");
        Ok(Some(index))
    }

    pub fn add(&self, segments: &[Segment], source: &str) -> Result<VectorIndex, IndexUnavailableError> {
        self.add_document(segments, source, None)
    }

    /// Embeds `segments`, appends them under `source` and persists the result.
    ///
    /// The previous snapshot stays byte-identical if anything fails.
    pub fn add_document(
        &self,
        segments: &[Segment],
        source: &str,
        checksum: Option<String>,
    ) -> Result<VectorIndex, IndexUnavailableError> {
        self.append_with(segments, source, checksum, |file, bytes| file.write_all(bytes))
    }

    fn append_with<W>(
        &self,
        segments: &[Segment],
        source: &str,
        checksum: Option<String>,
        write: W,
    ) -> Result<VectorIndex, IndexUnavailableError>
    where
        W: FnOnce(&mut File, &[u8]) -> io::Result<()>,
    {
        fs::create_dir_all(&self.dir).map_err(|source| IndexUnavailableError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let _guard = IndexLock::exclusive(&self.lock_path())?;

        let mut index = match self.load_unlocked()? {
            Some(index) => index,
            None => {
                info!(index = %self.name, "creating new index");
                self.create_empty()
            }
        };

        let records = segments
            .iter()
            .map(|segment| EmbeddingRecord::new(self.embedder.embed(&segment.text), &segment.text, source))
            .collect::<Vec<_>>();

        let now = Utc::now();
        index.records.extend(records);
        index.documents.push(DocumentEntry {
            source: source.to_string(),
            checksum,
            segment_count: segments.len(),
            ingested_at: now,
        });
        index.metadata.updated_at = now;

        let bytes = serde_json::to_vec(&index)?;
        write_atomically(&self.snapshot_path(), |file| write(file, &bytes))?;
        info!(
            index = %self.name,
            source = %source,
            added = segments.len(),
            total = index.records.len(),
            "segments added to index"
        );
        Ok(index)
    }

    pub fn search(&self, index: &VectorIndex, query: &str, k: usize) -> Vec<SearchHit> {
        index.search(&self.embedder.embed(query), k)
    }

}

/// Writes through a sibling temporary file and renames it over `path`.
fn write_atomically<F>(path: &Path, write: F) -> Result<(), IndexUnavailableError>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let storage_error = |source| IndexUnavailableError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut temp = NamedTempFile::new_in(dir).map_err(storage_error)?;
    write(temp.as_file_mut()).map_err(storage_error)?;
    temp.as_file().sync_all().map_err(storage_error)?;
    temp.persist(path).map_err(|error| storage_error(error.error))?;
    Ok(())
}

struct IndexLock {
    file: File,
}

impl IndexLock {
    fn open(path: &Path) -> Result<File, IndexUnavailableError> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|source| IndexUnavailableError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    fn shared(path: &Path) -> Result<Self, IndexUnavailableError> {
        let file = Self::open(path)?;
        FileExt::lock_shared(&file).map_err(|source| IndexUnavailableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { file })
    }

    fn exclusive(path: &Path) -> Result<Self, IndexUnavailableError> {
        let file = Self::open(path)?;
        FileExt::lock_exclusive(&file).map_err(|source| IndexUnavailableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { file })
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
