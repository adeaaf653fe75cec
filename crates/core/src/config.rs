//! Settings for every component, with their defaults enumerated once.

use crate::answer::{AnswerEngine, FallbackAnswerer, QualityGate, DEFAULT_FALLBACK_MIN_CHARS, DEFAULT_TOP_K};
use crate::chunking::ChunkingConfig;
use crate::embeddings::{HashedNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
use crate::error::{ConfigurationError, ExtractionError, IngestError, QueryError};
use crate::extractor::{EndpointOcr, OcrEndpointConfig, TesseractOcr, TextExtractor};
use crate::generation::{GeminiClient, GeminiConfig};
use crate::index::IndexStore;
use crate::ingest::IngestPipeline;
use std::path::{Path, PathBuf};

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_INDEX_NAME: &str = "index";

#[derive(Debug, Clone)]
pub enum OcrBackend {
    Tesseract(TesseractOcr),
    Endpoint(OcrEndpointConfig),
}

/// Everything the pipeline needs, passed to components at construction.
///
/// | field                  | default                     |
/// |------------------------|-----------------------------|
/// | `upload_dir`           | `data/uploads`              |
/// | `index_dir`            | `data/index`                |
/// | `index_name`           | `index`                     |
/// | `chunking`             | 1000 chars, 200 overlap     |
/// | `top_k`                | 3                           |
/// | `embedding_dimensions` | 256                         |
/// | `gemini`               | `gemini-1.5-flash`, 60s     |
/// | `fallback_model`       | same model as `gemini`      |
/// | `fallback_min_chars`   | 3                           |
/// | `ocr`                  | `tesseract` on the `PATH`   |
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub upload_dir: PathBuf,
    pub index_dir: PathBuf,
    pub index_name: String,
    pub chunking: ChunkingConfig,
    pub top_k: usize,
    pub embedding_dimensions: usize,
    pub gemini: GeminiConfig,
    pub fallback_model: Option<String>,
    pub fallback_min_chars: usize,
    pub ocr: OcrBackend,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self::for_data_dir(DEFAULT_DATA_DIR)
    }
}

impl RagConfig {
    pub fn for_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            upload_dir: data_dir.join("uploads"),
            index_dir: data_dir.join("index"),
            index_name: DEFAULT_INDEX_NAME.to_string(),
            chunking: ChunkingConfig::default(),
            top_k: DEFAULT_TOP_K,
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            gemini: GeminiConfig::default(),
            fallback_model: None,
            fallback_min_chars: DEFAULT_FALLBACK_MIN_CHARS,
            ocr: OcrBackend::Tesseract(TesseractOcr::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.chunking.validate()?;

        if self.top_k == 0 {
            return Err(ConfigurationError::InvalidSetting {
                name: "top_k",
                details: "must be at least 1".to_string(),
            });
        }
        if self.embedding_dimensions == 0 {
            return Err(ConfigurationError::InvalidSetting {
                name: "embedding_dimensions",
                details: "must be at least 1".to_string(),
            });
        }

        let name = self.index_name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ConfigurationError::InvalidSetting {
                name: "index_name",
                details: format!("{:?} is not a plain file name", self.index_name),
            });
        }

        Ok(())
    }

    pub fn embedder(&self) -> HashedNgramEmbedder {
        HashedNgramEmbedder {
            dimensions: self.embedding_dimensions,
            ..HashedNgramEmbedder::default()
        }
    }

    pub fn index_store(&self) -> IndexStore<HashedNgramEmbedder> {
        IndexStore::new(&self.index_dir, &self.index_name, self.embedder())
    }

    pub fn text_extractor(&self) -> Result<TextExtractor, ExtractionError> {
        Ok(match &self.ocr {
            OcrBackend::Tesseract(tesseract) => TextExtractor::new(Box::new(tesseract.clone())),
            OcrBackend::Endpoint(endpoint) => TextExtractor::new(Box::new(EndpointOcr::new(endpoint.clone())?)),
        })
    }

    pub fn ingest_pipeline(&self) -> Result<IngestPipeline<HashedNgramEmbedder>, IngestError> {
        self.validate()?;
        IngestPipeline::new(self.text_extractor()?, self.chunking, self.index_store())
    }

    pub fn answer_engine(&self) -> Result<AnswerEngine<HashedNgramEmbedder, GeminiClient>, QueryError> {
        let generator = GeminiClient::new(self.gemini.clone())?;
        Ok(AnswerEngine::new(self.index_store(), generator, self.top_k))
    }

    pub fn fallback_answerer(
        &self,
    ) -> Result<FallbackAnswerer<HashedNgramEmbedder, GeminiClient, GeminiClient>, QueryError> {
        let mut fallback = self.gemini.clone();
        if let Some(model) = &self.fallback_model {
            fallback.model = model.clone();
        }

        Ok(FallbackAnswerer::new(
            self.answer_engine()?,
            GeminiClient::new(fallback)?,
            self.quality_gate(),
        ))
    }

    pub fn quality_gate(&self) -> QualityGate {
        QualityGate {
            min_chars: self.fallback_min_chars,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::Embedder;

    #[test]
    fn defaults_follow_data_dir() {
        let config = RagConfig::for_data_dir("/srv/chat");
        assert_eq!(config.upload_dir, PathBuf::from("/srv/chat/uploads"));
        assert_eq!(config.index_dir, PathBuf::from("/srv/chat/index"));
        assert_eq!(config.index_name, "index");
        assert_eq!(config.chunking, ChunkingConfig { size: 1000, overlap: 200 });
        assert_eq!(config.top_k, 3);
        assert_eq!(config.quality_gate().min_chars, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_settings() {
        let mut config = RagConfig::default();
        config.chunking.overlap = 1000;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::OverlapTooLarge { .. })
        ));

        let mut config = RagConfig::default();
        config.top_k = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidSetting { name: "top_k", .. })
        ));

        let mut config = RagConfig::default();
        config.index_name = "../escape".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn store_uses_configured_name_and_dimensions() {
        let mut config = RagConfig::for_data_dir("/tmp/doc-chat");
        config.index_name = "knowledgebase".to_string();
        config.embedding_dimensions = 64;

        let store = config.index_store();
        assert_eq!(
            store.snapshot_path(),
            PathBuf::from("/tmp/doc-chat/index/knowledgebase.index.json")
        );
        assert_eq!(store.embedder().dimensions(), 64);
    }

    #[test]
    fn answer_engine_needs_an_api_key() {
        let config = RagConfig::default();
        assert!(matches!(config.answer_engine(), Err(QueryError::Generation(_))));
    }
}
