//! Recursive separator-hierarchy chunker.
//!
//! Tries separators in order; ranges still larger than `max_runes` recurse
//! with the next separator, and when the list is exhausted the range falls
//! back to fixed-size windows. Separators stay attached to the piece that
//! precedes them.

use crate::chunking::{default_recursive_separators, Chunker, ChunkingError, TextChunk};
use crate::models::JsonMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RuneRange {
    start: usize,
    end: usize,
}

#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    pub max_runes: usize,
    pub overlap_runes: usize,
    pub separators: Vec<String>,
}

impl Chunker for RecursiveChunker {
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

        let separators = if self.separators.is_empty() {
            default_recursive_separators()
        } else {
            self.separators.clone()
        };

        let runes: Vec<char> = text.chars().collect();
        let base = self.split_range(
            &runes,
            RuneRange {
                start: 0,
                end: runes.len(),
            },
            &separators,
            0,
        );

        let mut chunks = Vec::with_capacity(base.len());
        for (i, range) in base.iter().enumerate() {
            let mut start = range.start;
            if self.overlap_runes > 0 && i > 0 {
                let floor = base[i - 1].start;
                start = range
                    .start
                    .saturating_sub(self.overlap_runes)
                    .max(floor);
            }

            chunks.push(TextChunk {
                index: i,
                start_rune: start,
                end_rune: range.end,
                content: runes[start..range.end].iter().collect(),
                rune_length: range.end - start,
                metadata: JsonMap::new(),
            });
        }

        Ok(chunks)
    }
}

impl RecursiveChunker {
    fn split_range(
        &self,
        runes: &[char],
        range: RuneRange,
        separators: &[String],
        sep_index: usize,
    ) -> Vec<RuneRange> {
        if range.end - range.start <= self.max_runes {
            return vec![range];
        }
        if sep_index >= separators.len() {
            return split_fixed_range(range, self.max_runes);
        }

        let sep: Vec<char> = separators[sep_index].chars().collect();
        if sep.is_empty() {
            return split_fixed_range(range, self.max_runes);
        }

        let parts = split_by_separator(runes, range, &sep);
        if parts.len() == 1 {
            return self.split_range(runes, range, separators, sep_index + 1);
        }

        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            if part.end - part.start <= self.max_runes {
                out.push(part);
            } else {
                out.extend(self.split_range(runes, part, separators, sep_index + 1));
            }
        }
        out
    }
}

fn split_fixed_range(range: RuneRange, max_runes: usize) -> Vec<RuneRange> {
    if max_runes == 0 || range.end <= range.start {
        return Vec::new();
    }
    let mut out = Vec::with_capacity((range.end - range.start) / max_runes + 1);
    let mut start = range.start;
    while start < range.end {
        let end = (start + max_runes).min(range.end);
        out.push(RuneRange { start, end });
        if end == range.end {
            break;
        }
        start = end;
    }
    out
}

fn split_by_separator(runes: &[char], range: RuneRange, sep: &[char]) -> Vec<RuneRange> {
    if sep.is_empty() {
        return vec![range];
    }

    let mut out = Vec::with_capacity(8);
    let mut cursor = range.start;
    while cursor < range.end {
        let Some(index) = index_of_runes(runes, sep, cursor, range.end) else {
            break;
        };
        let segment_end = index + sep.len();
        out.push(RuneRange {
            start: cursor,
            end: segment_end,
        });
        cursor = segment_end;
    }

    if cursor < range.end {
        out.push(RuneRange {
            start: cursor,
            end: range.end,
        });
    }

    if out.is_empty() {
        return vec![range];
    }
    out
}

fn index_of_runes(haystack: &[char], needle: &[char], start: usize, end: usize) -> Option<usize> {
    if needle.is_empty() || start >= end || end > haystack.len() || end - start < needle.len() {
        return None;
    }
    let last = end - needle.len();
    (start..=last).find(|&i| haystack[i..i + needle.len()] == *needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_options() {
        let chunker = RecursiveChunker {
            max_runes: 0,
            overlap_runes: 0,
            separators: Vec::new(),
        };
        assert_eq!(chunker.chunk("hello").unwrap_err(), ChunkingError::InvalidMaxRunes);

        let chunker = RecursiveChunker {
            max_runes: 10,
            overlap_runes: 10,
            separators: Vec::new(),
        };
        assert_eq!(chunker.chunk("hello").unwrap_err(), ChunkingError::OverlapTooLarge);
    }

    #[test]
    fn test_empty_input() {
        let chunker = RecursiveChunker {
            max_runes: 10,
            overlap_runes: 0,
            separators: Vec::new(),
        };
        assert!(chunker.chunk("").unwrap().is_empty());
    }

    #[test]
    fn test_splits_on_separators() {
        let chunker = RecursiveChunker {
            max_runes: 10,
            overlap_runes: 0,
            separators: vec!["\n\n".into(), "\n".into(), " ".into(), String::new()],
        };
        let chunks = chunker.chunk("section1\n\nsection2\n\nsection3").unwrap();
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["section1\n\n", "section2\n\n", "section3"]);
    }

    #[test]
    fn test_separator_stays_with_preceding_piece() {
        let chunker = RecursiveChunker {
            max_runes: 6,
            overlap_runes: 0,
            separators: vec![" ".into()],
        };
        let chunks = chunker.chunk("one two three").unwrap();
        assert_eq!(chunks[0].content, "one ");
        assert_eq!(chunks[1].content, "two ");
        assert_eq!(chunks[2].content, "three");
    }

    #[test]
    fn test_fallback_to_fixed_when_separators_exhausted() {
        let chunker = RecursiveChunker {
            max_runes: 5,
            overlap_runes: 0,
            separators: vec!["\n\n".into()],
        };
        let chunks = chunker.chunk("abcdefghijklmnop").unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].content, "abcde");
        assert_eq!(chunks[3].content, "p");
    }

    #[test]
    fn test_recurses_into_next_separator() {
        // First separator splits into two; the second part is still too big
        // and is re-split by the next separator.
        let chunker = RecursiveChunker {
            max_runes: 8,
            overlap_runes: 0,
            separators: vec!["\n\n".into(), " ".into()],
        };
        let chunks = chunker.chunk("short\n\nlonger than max").unwrap();
        assert_eq!(chunks[0].content, "short\n\n");
        assert!(chunks.len() > 2);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 8);
        }
    }

    #[test]
    fn test_overlap_extends_backwards() {
        let chunker = RecursiveChunker {
            max_runes: 10,
            overlap_runes: 3,
            separators: vec!["\n\n".into()],
        };
        let chunks = chunker.chunk("section1\n\nsection2").unwrap();
        assert_eq!(chunks[0].start_rune, 0);
        // Second chunk starts 3 runes before its base range.
        assert_eq!(chunks[1].start_rune, 7);
        assert!(chunks[1].content.starts_with("1\n\n"));
    }

    #[test]
    fn test_rune_offsets_slice_input() {
        let input = "alpha beta gamma delta";
        let chunker = RecursiveChunker {
            max_runes: 8,
            overlap_runes: 2,
            separators: vec![" ".into()],
        };
        let runes: Vec<char> = input.chars().collect();
        for chunk in chunker.chunk(input).unwrap() {
            let expected: String = runes[chunk.start_rune..chunk.end_rune].iter().collect();
            assert_eq!(chunk.content, expected);
        }
    }
}
