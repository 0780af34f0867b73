//! Fixed-size rune-window chunker.

use crate::chunking::{Chunker, ChunkingError, TextChunk};
use crate::models::JsonMap;

/// Splits text into fixed-size rune windows with optional overlap.
///
/// The window stride is `max_runes - overlap_runes`; the final window is
/// truncated at the end of the text.
#[derive(Debug, Clone, Copy)]
pub struct FixedSizeChunker {
    pub max_runes: usize,
    pub overlap_runes: usize,
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, text: &str) -> Result<Vec<TextChunk>, ChunkingError> {
        if self.max_runes == 0 {
            return Err(ChunkingError::InvalidMaxRunes);
        }
        if self.overlap_runes >= self.max_runes {
            return Err(ChunkingError::OverlapTooLarge);
        }

        if text.is_empty() {
            return Ok(Vec::new());
        }

        let runes: Vec<char> = text.chars().collect();
        let mut chunks = Vec::with_capacity(runes.len() / self.max_runes + 1);
        let mut start = 0usize;
        let mut index = 0usize;

        while start < runes.len() {
            let end = (start + self.max_runes).min(runes.len());
            chunks.push(TextChunk {
                index,
                start_rune: start,
                end_rune: end,
                content: runes[start..end].iter().collect(),
                rune_length: end - start,
                metadata: JsonMap::new(),
            });
            index += 1;

            if end == runes.len() {
                break;
            }
            start = end - self.overlap_runes;
        }

        Ok(chunks)
    }
}
