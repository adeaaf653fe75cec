use crate::error::ConfigurationError;
use crate::models::Segment;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Natural boundaries, strongest first. A chunk ends right after the separator.
const BOUNDARIES: [&[&str]; 4] = [&["\n\n"], &["\n"], &[". ", "! ", "? "], &[" "]];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum characters per segment.
    pub size: usize,
    /// Characters repeated from the previous segment.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn new(size: usize, overlap: usize) -> Result<Self, ConfigurationError> {
        let config = Self { size, overlap };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.size == 0 {
            return Err(ConfigurationError::ZeroChunkSize);
        }
        if self.overlap >= self.size {
            return Err(ConfigurationError::OverlapTooLarge {
                size: self.size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }
}

/// Splits `text` into overlapping segments with an empty source tag.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Result<Vec<Segment>, ConfigurationError> {
    chunk_document(text, "", ChunkingConfig::new(size, overlap)?)
}

/// Splits a document's text into segments tagged with `source`.
///
/// Each segment ends after the strongest natural boundary (paragraph, line,
/// sentence, word) that fits in `config.size` characters, or is hard-sliced
/// when none fits. Every segment after the first starts with the last
/// `overlap` characters of its predecessor (fewer if the predecessor is
/// shorter), and records that count in [`Segment::overlap`].
pub fn chunk_document(
    text: &str,
    source: &str,
    config: ChunkingConfig,
) -> Result<Vec<Segment>, ConfigurationError> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Ok(Vec::new());
    }

    if chars.len() <= config.size {
        return Ok(vec![Segment {
            text: text.to_string(),
            source: source.to_string(),
            index: 0,
            overlap: 0,
        }]);
    }

    let mut segments = Vec::new();
    let mut start = 0usize;
    let mut previous_end = 0usize;
    let mut carried = 0usize;

    loop {
        let window_end = (start + config.size).min(chars.len());
        let end = if window_end == chars.len() {
            window_end
        } else {
            natural_break(&chars, start, previous_end, window_end).unwrap_or(window_end)
        };

        segments.push(Segment {
            text: chars[start..end].iter().collect(),
            source: source.to_string(),
            index: segments.len(),
            overlap: carried,
        });

        if end == chars.len() {
            break;
        }

        carried = config.overlap.min(end - start);
        previous_end = end;
        start = end - carried;
    }

    Ok(segments)
}

// Finds the end offset after the last separator of the strongest boundary
// class that lies inside `[start, window_end)` and goes past `previous_end`.
fn natural_break(chars: &[char], start: usize, previous_end: usize, window_end: usize) -> Option<usize> {
    BOUNDARIES.iter().find_map(|separators| {
        separators
            .iter()
            .filter_map(|separator| last_separator_end(chars, start, window_end, separator))
            .filter(|end| *end > previous_end)
            .max()
    })
}

fn last_separator_end(chars: &[char], start: usize, window_end: usize, separator: &str) -> Option<usize> {
    let pattern: Vec<char> = separator.chars().collect();
    if window_end < start + pattern.len() {
        return None;
    }

    (start..=window_end - pattern.len())
        .rev()
        .find(|position| chars[*position..*position + pattern.len()] == pattern[..])
        .map(|position| position + pattern.len())
}
