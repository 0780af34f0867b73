//! Structural markdown chunking strategy.
//!
//! Parses the document into blocks, handles YAML frontmatter according to the
//! configured mode, packs blocks into token-budgeted chunks, and emits chunk
//! metadata (`breadcrumb`, `section_title`, `est_tokens`, `block_start`,
//! `block_end`, and optionally the parsed `frontmatter` map).

use serde_json::Value;

use crate::chunking::packer::pack_blocks;
use crate::chunking::{Chunker, ChunkingError, TextChunk};
use crate::markdown::block::{parse_blocks, Block, BlockKind};
use crate::markdown::token::TokenBias;
use crate::models::JsonMap;

/// Controls how YAML frontmatter is treated.
///
/// - `Metadata` — parse it into a map stored on every emitted chunk.
/// - `Include` — keep it as a content block.
/// - `Strip` — drop it entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrontmatterMode {
    #[default]
    Metadata,
    Include,
    Strip,
}

/// Configures markdown chunking behavior.
#[derive(Debug, Clone)]
pub struct MarkdownOptions {
    pub target_tokens: usize,
    pub max_tokens: usize,
    pub min_tokens: usize,
    pub overlap_tokens: usize,
    pub heading_depth: u8,
    pub frontmatter_mode: FrontmatterMode,
    pub mdx: bool,
    pub bias: TokenBias,
}

impl Default for MarkdownOptions {
    fn default() -> Self {
        Self {
            target_tokens: 750,
            max_tokens: 1000,
            min_tokens: 200,
            overlap_tokens: 80,
            heading_depth: 3,
            frontmatter_mode: FrontmatterMode::Metadata,
            mdx: false,
            bias: TokenBias::Balanced,
        }
    }
}

impl MarkdownOptions {
    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.target_tokens == 0 {
            return Err(ChunkingError::InvalidOptions(
                "target_tokens must be greater than zero".into(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ChunkingError::InvalidOptions(
                "max_tokens must be greater than zero".into(),
            ));
        }
        if self.target_tokens > self.max_tokens {
            return Err(ChunkingError::InvalidOptions(
                "target_tokens must be <= max_tokens".into(),
            ));
        }
        if self.heading_depth == 0 || self.heading_depth > 6 {
            return Err(ChunkingError::InvalidOptions(
                "heading_depth must be between 1 and 6".into(),
            ));
        }
        Ok(())
    }
}

/// Markdown chunker: a pure function of (text, options).
#[derive(Debug, Clone)]
pub struct MarkdownChunker {
    opts: MarkdownOptions,
}

impl MarkdownChunker {
    pub fn new(opts: MarkdownOptions) -> Result<Self, ChunkingError> {
        opts.validate()?;
        Ok(Self { opts })
    }
}

impl Chunker for MarkdownChunker {
    fn chunk(&self, text: &str) -> Result<Vec<TextChunk>, ChunkingError> {
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let mut blocks = parse_blocks(text, self.opts.mdx);
        let mut frontmatter: Option<JsonMap> = None;
        if blocks.first().map(|b| b.kind) == Some(BlockKind::Frontmatter) {
            match self.opts.frontmatter_mode {
                FrontmatterMode::Metadata => {
                    frontmatter = parse_frontmatter(&blocks[0].content);
                    blocks.remove(0);
                }
                FrontmatterMode::Strip => {
                    blocks.remove(0);
                }
                FrontmatterMode::Include => {}
            }
        }

        let packed = pack_blocks(&blocks, &self.opts);
        let mut chunks = Vec::with_capacity(packed.len());
        for (i, p) in packed.into_iter().enumerate() {
            let content = join_blocks(&p.blocks);
            let runes = content.chars().count();
            let mut metadata = JsonMap::new();
            metadata.insert("breadcrumb".into(), Value::String(p.breadcrumb));
            metadata.insert("section_title".into(), Value::String(p.section_title));
            metadata.insert("est_tokens".into(), Value::from(p.est_tokens as u64));
            metadata.insert("block_start".into(), Value::from(p.block_start as u64));
            metadata.insert("block_end".into(), Value::from(p.block_end as u64));
            if let Some(ref fm) = frontmatter {
                metadata.insert("frontmatter".into(), Value::Object(fm.clone()));
            }
            chunks.push(TextChunk {
                index: i,
                start_rune: 0,
                end_rune: runes,
                content,
                rune_length: runes,
                metadata,
            });
        }

        Ok(chunks)
    }
}

fn join_blocks(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(|b| b.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
        .trim()
        .to_string()
}

/// Minimal YAML subset parser for frontmatter: `key: value` pairs and
/// `key:` followed by `- item` lists. Quoted scalar values are unquoted.
fn parse_frontmatter(content: &str) -> Option<JsonMap> {
    let mut out = JsonMap::new();
    let mut current_list_key: Option<String> = None;
    let mut current_list: Vec<Value> = Vec::new();

    fn flush_list(out: &mut JsonMap, key: &mut Option<String>, list: &mut Vec<Value>) {
        if let Some(k) = key.take() {
            out.insert(k, Value::Array(std::mem::take(list)));
        }
    }

    for raw in content.split('\n') {
        let line = raw.trim();
        if line.is_empty() || line == "---" {
            continue;
        }
        if let Some(item) = line.strip_prefix("- ") {
            if current_list_key.is_some() {
                current_list.push(Value::String(item.trim().to_string()));
                continue;
            }
        }
        flush_list(&mut out, &mut current_list_key, &mut current_list);
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            continue;
        }
        if value.is_empty() {
            current_list_key = Some(key.to_string());
            current_list.clear();
            continue;
        }
        out.insert(
            key.to_string(),
            Value::String(value.trim_matches(|c| c == '"' || c == '\'').to_string()),
        );
    }
    flush_list(&mut out, &mut current_list_key, &mut current_list);

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}
