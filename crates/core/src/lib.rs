pub mod answer;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod models;

pub use answer::{
    build_context, render_prompt, Answer, AnswerEngine, AnswerStage, FallbackAnswerer,
    FallbackOutcome, QualityGate, DEFAULT_TOP_K, NO_DOCUMENTS_MESSAGE,
};
pub use chunking::{chunk_document, chunk_text, ChunkingConfig};
pub use config::{OcrBackend, RagConfig};
pub use embeddings::{Embedder, HashedNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{
    ConfigurationError, ExtractionError, GenerationError, IndexUnavailableError, IngestError,
    QueryError,
};
pub use extractor::{
    DocumentKind, EndpointOcr, OcrEndpointConfig, OcrEngine, TesseractOcr, TextExtractor,
};
pub use generation::{GeminiClient, GeminiConfig, Generator};
pub use index::{IndexStore, VectorIndex};
pub use ingest::{
    discover_documents, digest_file, stage_upload, IngestPipeline, IngestedDocument,
    IngestionReport, SkippedDocument,
};
pub use models::{DocumentEntry, EmbeddingRecord, IndexMetadata, SearchHit, Segment};
