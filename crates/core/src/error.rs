use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pdf parse error: {0}")]
    Pdf(String),

    #[error("word document parse error: {0}")]
    WordDoc(String),

    #[error("ocr failed: {0}")]
    Ocr(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("chunk overlap {overlap} must be smaller than chunk size {size}")]
    OverlapTooLarge { size: usize, overlap: usize },

    #[error("invalid setting {name}: {details}")]
    InvalidSetting { name: &'static str, details: String },
}

#[derive(Debug, Error)]
pub enum IndexUnavailableError {
    #[error("index storage unavailable at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("index snapshot at {path} is corrupt: {details}")]
    Corrupt { path: PathBuf, details: String },

    #[error("index was built with embedder {stored} ({stored_dimensions} dims), not {current} ({current_dimensions} dims)")]
    EmbedderMismatch {
        stored: String,
        stored_dimensions: usize,
        current: String,
        current_dimensions: usize,
    },

    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no api key configured for the generative model")]
    MissingApiKey,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("model endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model returned no text: {0}")]
    EmptyResponse(String),

    #[error("malformed model response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Index(#[from] IndexUnavailableError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Index(#[from] IndexUnavailableError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("retrieval task failed: {0}")]
    Retrieval(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
