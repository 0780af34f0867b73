//! Markdown block lexer.
//!
//! Scans a UTF-8 buffer line by line into a flat sequence of typed blocks.
//! Recognition happens in a fixed order: frontmatter (start of document only),
//! fenced code, ATX headings, MDX imports/components (when enabled), lists,
//! tables, blockquotes, and finally paragraphs. Joining block contents with
//! `\n\n` and re-parsing yields the same block boundaries; whitespace between
//! blocks is not preserved.

use std::sync::OnceLock;

use regex::Regex;

/// The structural type of a parsed markdown block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Frontmatter,
    Heading,
    Paragraph,
    CodeFence,
    List,
    Table,
    Blockquote,
    MdxImport,
    MdxComponent,
}

impl BlockKind {
    /// Code-like blocks use the denser token divisor.
    pub fn is_code_like(self) -> bool {
        matches!(
            self,
            BlockKind::CodeFence | BlockKind::MdxImport | BlockKind::MdxComponent
        )
    }
}

/// A structural unit parsed from markdown text.
///
/// `level` is only meaningful for headings (1..=6); `lang` only for fenced
/// code blocks. Line numbers are 1-based and inclusive.
#[derive(Debug, Clone)]
pub struct Block {
    pub kind: BlockKind,
    pub content: String,
    pub level: u8,
    pub lang: String,
    pub start_line: usize,
    pub end_line: usize,
}

impl Block {
    pub fn new(kind: BlockKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            level: 0,
            lang: String::new(),
            start_line: 0,
            end_line: 0,
        }
    }
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*$").unwrap())
}

pub(crate) fn list_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:[-*+]\s+|\d+\.\s+)").unwrap())
}

fn mdx_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(import|export)\s+").unwrap())
}

fn mdx_component_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^<[A-Z][A-Za-z0-9]*(?:\s|>|/)").unwrap())
}

/// Scan markdown text into a flat sequence of structural blocks.
pub fn parse_blocks(text: &str, mdx: bool) -> Vec<Block> {
    if text.is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let mut blocks: Vec<Block> = Vec::with_capacity(lines.len() / 2);
    let mut i = 0usize;

    // YAML frontmatter at the beginning only.
    if lines[0].trim() == "---" {
        let mut j = 1;
        while j < lines.len() {
            if lines[j].trim() == "---" {
                break;
            }
            j += 1;
        }
        if j < lines.len() {
            blocks.push(Block {
                kind: BlockKind::Frontmatter,
                content: lines[..=j].join("\n"),
                level: 0,
                lang: String::new(),
                start_line: 1,
                end_line: j + 1,
            });
            i = j + 1;
        }
    }

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();
        if trimmed.is_empty() {
            i += 1;
            continue;
        }

        if trimmed.starts_with("```") {
            let lang = trimmed.trim_start_matches("```").trim().to_string();
            let start = i;
            i += 1;
            while i < lines.len() {
                if lines[i].trim().starts_with("```") {
                    i += 1;
                    break;
                }
                i += 1;
            }
            blocks.push(Block {
                kind: BlockKind::CodeFence,
                content: lines[start..i].join("\n"),
                level: 0,
                lang,
                start_line: start + 1,
                end_line: i,
            });
            continue;
        }

        if let Some(caps) = heading_re().captures(trimmed) {
            blocks.push(Block {
                kind: BlockKind::Heading,
                content: caps[2].trim().to_string(),
                level: caps[1].len() as u8,
                lang: String::new(),
                start_line: i + 1,
                end_line: i + 1,
            });
            i += 1;
            continue;
        }

        if mdx && mdx_import_re().is_match(trimmed) {
            let start = i;
            i += 1;
            while i < lines.len() && !lines[i].trim().is_empty() {
                i += 1;
            }
            blocks.push(Block {
                kind: BlockKind::MdxImport,
                content: lines[start..i].join("\n"),
                level: 0,
                lang: String::new(),
                start_line: start + 1,
                end_line: i,
            });
            continue;
        }

        if mdx && mdx_component_re().is_match(trimmed) {
            let start = i;
            i += 1;
            while i < lines.len() {
                let next_trimmed = lines[i].trim();
                if next_trimmed.is_empty() {
                    break;
                }
                if heading_re().is_match(next_trimmed) || list_item_re().is_match(next_trimmed) {
                    break;
                }
                i += 1;
            }
            blocks.push(Block {
                kind: BlockKind::MdxComponent,
                content: lines[start..i].join("\n"),
                level: 0,
                lang: String::new(),
                start_line: start + 1,
                end_line: i,
            });
            continue;
        }

        if list_item_re().is_match(line) {
            let start = i;
            i += 1;
            while i < lines.len() {
                let next = lines[i];
                if next.trim().is_empty() {
                    i += 1;
                    break;
                }
                if list_item_re().is_match(next)
                    || next.starts_with(' ')
                    || next.starts_with('\t')
                {
                    i += 1;
                    continue;
                }
                break;
            }
            blocks.push(Block {
                kind: BlockKind::List,
                content: lines[start..i].join("\n").trim_end_matches('\n').to_string(),
                level: 0,
                lang: String::new(),
                start_line: start + 1,
                end_line: i,
            });
            continue;
        }

        if trimmed.starts_with('|') {
            let start = i;
            i += 1;
            while i < lines.len() && lines[i].trim().starts_with('|') {
                i += 1;
            }
            blocks.push(Block {
                kind: BlockKind::Table,
                content: lines[start..i].join("\n"),
                level: 0,
                lang: String::new(),
                start_line: start + 1,
                end_line: i,
            });
            continue;
        }

        if trimmed.starts_with('>') {
            let start = i;
            i += 1;
            while i < lines.len() && lines[i].trim().starts_with('>') {
                i += 1;
            }
            blocks.push(Block {
                kind: BlockKind::Blockquote,
                content: lines[start..i].join("\n"),
                level: 0,
                lang: String::new(),
                start_line: start + 1,
                end_line: i,
            });
            continue;
        }

        // Paragraph: accumulate until a blank line or any other opener.
        let start = i;
        i += 1;
        while i < lines.len() {
            let next_trimmed = lines[i].trim();
            if next_trimmed.is_empty() {
                break;
            }
            if next_trimmed.starts_with("```")
                || heading_re().is_match(next_trimmed)
                || list_item_re().is_match(lines[i])
                || next_trimmed.starts_with('|')
                || next_trimmed.starts_with('>')
            {
                break;
            }
            if mdx
                && (mdx_import_re().is_match(next_trimmed)
                    || mdx_component_re().is_match(next_trimmed))
            {
                break;
            }
            i += 1;
        }
        blocks.push(Block {
            kind: BlockKind::Paragraph,
            content: lines[start..i].join("\n"),
            level: 0,
            lang: String::new(),
            start_line: start + 1,
            end_line: i,
        });
    }

    blocks
}
