pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;
const DEFAULT_NGRAM: usize = 3;
const WORD_WEIGHT: f32 = 2.0;

/// Deterministic text-to-vector function shared by ingestion and search.
pub trait Embedder {
    /// Stable identifier persisted with an index; changes whenever vectors would.
    fn id(&self) -> String;
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Feature-hashing embedder over character n-grams and whole words.
///
/// Output vectors are L2-normalised, so cosine similarity reduces to a dot
/// product. Empty or whitespace-only text maps to the zero vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashedNgramEmbedder {
    pub dimensions: usize,
    pub ngram: usize,
}

impl Default for HashedNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            ngram: DEFAULT_NGRAM,
        }
    }
}

impl Embedder for HashedNgramEmbedder {
    fn id(&self) -> String {
        format!("hashed-ngram-v1/n{}", self.ngram.max(1))
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions()];
        let lowered = text.to_lowercase();
        let ngram = self.ngram.max(1);

        for word in lowered
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let chars: Vec<char> = word.chars().collect();
            if chars.len() < ngram {
                let slot = bucket(word.as_bytes(), vector.len());
                vector[slot] += 1.0;
            } else {
                for window in chars.windows(ngram) {
                    let token = window.iter().collect::<String>();
                    let slot = bucket(token.as_bytes(), vector.len());
                    vector[slot] += 1.0;
                }
            }

            let tagged = format!("w:{word}");
            let slot = bucket(tagged.as_bytes(), vector.len());
            vector[slot] += WORD_WEIGHT;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

fn bucket(bytes: &[u8], buckets: usize) -> usize {
    let mut hash = 1469598103934665603u64;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash % buckets as u64) as usize
}

/// Cosine similarity of two L2-normalised vectors.
pub fn cosine(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}
