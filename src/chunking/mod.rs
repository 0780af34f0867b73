//! Chunking strategies.
//!
//! A chunker is a single capability — `chunk(text) -> Vec<TextChunk>` —
//! selected at request time:
//!
//! | Strategy | Module | Approach |
//! |----------|--------|----------|
//! | `fixed` | [`fixed`] | rune windows with stride `max - overlap` |
//! | `recursive` | [`recursive`] | separator hierarchy with fixed fallback |
//! | `markdown` | [`markdown`] | structural block parse + token-budgeted packing |

pub mod fixed;
pub mod markdown;
pub mod packer;
pub mod recursive;
pub mod splitter;

use thiserror::Error;

use crate::models::JsonMap;

pub use fixed::FixedSizeChunker;
pub use markdown::{FrontmatterMode, MarkdownChunker, MarkdownOptions};
pub use recursive::RecursiveChunker;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkingError {
    #[error("max_runes must be greater than zero")]
    InvalidMaxRunes,
    #[error("overlap_runes must be zero or greater")]
    InvalidOverlap,
    #[error("overlap_runes must be smaller than max_runes")]
    OverlapTooLarge,
    #[error("unknown chunking strategy: {0}")]
    UnknownStrategy(String),
    #[error("unsupported language hint: {0}")]
    UnsupportedLanguageHint(String),
    #[error("{0}")]
    InvalidOptions(String),
}

/// A chunk of text with rune offsets into the original input.
#[derive(Debug, Clone, Default)]
pub struct TextChunk {
    pub index: usize,
    pub start_rune: usize,
    pub end_rune: usize,
    pub content: String,
    pub rune_length: usize,
    pub metadata: JsonMap,
}

/// Chunking capability implemented by each strategy.
pub trait Chunker: Send + Sync {
    fn chunk(&self, text: &str) -> Result<Vec<TextChunk>, ChunkingError>;
}

/// Identifies a chunking approach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Fixed,
    Recursive,
    Markdown,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Fixed => "fixed",
            Strategy::Recursive => "recursive",
            Strategy::Markdown => "markdown",
        }
    }

    /// Parse a request strategy string; the empty string means "unset".
    pub fn parse(value: &str) -> Result<Option<Self>, ChunkingError> {
        match value.trim() {
            "" => Ok(None),
            "fixed" => Ok(Some(Strategy::Fixed)),
            "recursive" => Ok(Some(Strategy::Recursive)),
            "markdown" => Ok(Some(Strategy::Markdown)),
            other => Err(ChunkingError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Language-specific separator presets for the recursive strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Generic,
    Go,
    Python,
    JavaScript,
    Java,
    Rust,
}

impl Language {
    pub fn parse(value: &str) -> Result<Self, ChunkingError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "generic" => Ok(Language::Generic),
            "go" => Ok(Language::Go),
            "python" => Ok(Language::Python),
            "javascript" => Ok(Language::JavaScript),
            "java" => Ok(Language::Java),
            "rust" => Ok(Language::Rust),
            other => Err(ChunkingError::UnsupportedLanguageHint(other.to_string())),
        }
    }
}

/// Parse language hint strings, skipping empties.
pub fn parse_language_hints(values: &[String]) -> Result<Vec<Language>, ChunkingError> {
    let mut hints = Vec::with_capacity(values.len());
    for value in values {
        if value.trim().is_empty() {
            continue;
        }
        hints.push(Language::parse(value)?);
    }
    Ok(hints)
}

/// Configures chunker selection and behavior.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub strategy: Option<Strategy>,
    pub max_runes: usize,
    pub overlap_runes: usize,
    pub separators: Vec<String>,
    pub language_hints: Vec<Language>,
}

/// Build a chunker for the requested strategy. An unset strategy means fixed.
pub fn new_chunker(opts: Options) -> Result<Box<dyn Chunker>, ChunkingError> {
    match opts.strategy.unwrap_or(Strategy::Fixed) {
        Strategy::Fixed => Ok(Box::new(FixedSizeChunker {
            max_runes: opts.max_runes,
            overlap_runes: opts.overlap_runes,
        })),
        Strategy::Recursive => {
            let separators = if opts.separators.is_empty() {
                separators_for_hints(&opts.language_hints)
            } else {
                opts.separators
            };
            Ok(Box::new(RecursiveChunker {
                max_runes: opts.max_runes,
                overlap_runes: opts.overlap_runes,
                separators,
            }))
        }
        Strategy::Markdown => {
            let chunker = MarkdownChunker::new(MarkdownOptions::default())?;
            Ok(Box::new(chunker))
        }
    }
}

/// The generic recursive separator list.
pub fn default_recursive_separators() -> Vec<String> {
    vec![
        "\n\n".to_string(),
        "\n".to_string(),
        " ".to_string(),
        String::new(),
    ]
}

/// Separators tuned for a specific language.
pub fn separators_for_language(language: Language) -> Vec<String> {
    let presets: &[&str] = match language {
        Language::Python => &["\nclass ", "\ndef ", "\n\n", "\n", " ", ""],
        Language::JavaScript => &["\nclass ", "\nfunction ", "\nconst ", "\nlet ", "\n\n", "\n", " ", ""],
        Language::Java => &["\nclass ", "\ninterface ", "\npublic ", "\nprivate ", "\n\n", "\n", " ", ""],
        Language::Go => &["\nfunc ", "\ntype ", "\nvar ", "\nconst ", "\n\n", "\n", " ", ""],
        Language::Rust => &["\nfn ", "\nstruct ", "\nenum ", "\nimpl ", "\n\n", "\n", " ", ""],
        Language::Generic => return default_recursive_separators(),
    };
    presets.iter().map(|s| s.to_string()).collect()
}

/// Merge language presets with the generic fallback, preserving order and
/// dropping duplicates.
pub fn separators_for_hints(hints: &[Language]) -> Vec<String> {
    if hints.is_empty() {
        return default_recursive_separators();
    }
    let mut merged: Vec<String> = Vec::with_capacity(16);
    for hint in hints {
        for sep in separators_for_language(*hint) {
            if !merged.contains(&sep) {
                merged.push(sep);
            }
        }
    }
    for sep in default_recursive_separators() {
        if !merged.contains(&sep) {
            merged.push(sep);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse() {
        assert_eq!(Strategy::parse("").unwrap(), None);
        assert_eq!(Strategy::parse("fixed").unwrap(), Some(Strategy::Fixed));
        assert_eq!(Strategy::parse("markdown").unwrap(), Some(Strategy::Markdown));
        assert!(matches!(
            Strategy::parse("semantic"),
            Err(ChunkingError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn test_language_parse() {
        assert_eq!(Language::parse("RUST").unwrap(), Language::Rust);
        assert!(matches!(
            Language::parse("cobol"),
            Err(ChunkingError::UnsupportedLanguageHint(_))
        ));
    }

    #[test]
    fn test_parse_language_hints_skips_empty() {
        let hints =
            parse_language_hints(&["go".to_string(), "  ".to_string(), "python".to_string()])
                .unwrap();
        assert_eq!(hints, vec![Language::Go, Language::Python]);
    }

    #[test]
    fn test_separator_merge_dedupes() {
        let merged = separators_for_hints(&[Language::Go, Language::Rust]);
        assert_eq!(merged[0], "\nfunc ");
        assert!(merged.contains(&"\nfn ".to_string()));
        // "\n\n" appears in both presets and the generic fallback; only once here.
        assert_eq!(merged.iter().filter(|s| s.as_str() == "\n\n").count(), 1);
        assert_eq!(merged.iter().filter(|s| s.is_empty()).count(), 1);
    }

    #[test]
    fn test_no_hints_gives_generic() {
        assert_eq!(separators_for_hints(&[]), default_recursive_separators());
    }

    #[test]
    fn test_new_chunker_defaults_to_fixed() {
        let chunker = new_chunker(Options {
            max_runes: 10,
            ..Options::default()
        })
        .unwrap();
        let chunks = chunker.chunk("hello").unwrap();
        assert_eq!(chunks.len(), 1);
    }
}
