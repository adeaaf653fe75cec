use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bounded slice of a document's extracted text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    /// Source tag of the document the text came from.
    pub source: String,
    /// Position of the segment within its document.
    pub index: usize,
    /// Leading characters repeated from the tail of the previous segment.
    pub overlap: usize,
}

impl Segment {
    /// Text with the overlapping prefix removed.
    pub fn fresh_text(&self) -> &str {
        match self.text.char_indices().nth(self.overlap) {
            Some((offset, _)) => &self.text[offset..],
            None if self.overlap == 0 => &self.text,
            None => "",
        }
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRecord {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub text: String,
    pub source: String,
    pub ingested_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    pub fn new(vector: Vec<f32>, text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            vector,
            text: text.into(),
            source: source.into(),
            ingested_at: Utc::now(),
        }
    }
}

/// Ledger entry written once per ingested document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentEntry {
    pub source: String,
    pub checksum: Option<String>,
    pub segment_count: usize,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexMetadata {
    pub format_version: u32,
    pub name: String,
    pub embedder: String,
    pub dimensions: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub text: String,
    pub source: String,
    pub score: f32,
    /// Insertion position of the matched record.
    pub position: usize,
}
