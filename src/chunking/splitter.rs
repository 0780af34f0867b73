//! Oversized-block splitting.
//!
//! Breaks a single block that exceeds the token budget into sub-blocks along
//! type-appropriate boundaries, preserving structural markers: code fences
//! keep their opening and closing fence lines, tables keep their two header
//! lines, lists never split inside an item. Every sub-block inherits the
//! original's type, language, heading level, and line range.

use crate::markdown::block::{list_item_re, Block, BlockKind};
use crate::markdown::token::{estimate_str, estimate_tokens, TokenBias};

/// Break a single oversized block into sub-blocks each within `max_tokens`.
///
/// Blocks already within budget are returned unchanged.
pub fn split_oversized(block: &Block, max_tokens: usize, bias: TokenBias) -> Vec<Block> {
    if max_tokens == 0 || estimate_tokens(block, bias) <= max_tokens {
        return vec![block.clone()];
    }

    match block.kind {
        BlockKind::CodeFence => split_code_fence(block, max_tokens, bias),
        BlockKind::Paragraph | BlockKind::Blockquote => split_prose(block, max_tokens, bias),
        BlockKind::List => split_list(block, max_tokens, bias),
        BlockKind::Table => split_table(block, max_tokens, bias),
        BlockKind::Frontmatter => split_by_lines(block, max_tokens, bias),
        _ => split_prose(block, max_tokens, bias),
    }
}

fn derived(original: &Block, content: String) -> Block {
    Block {
        kind: original.kind,
        content,
        level: original.level,
        lang: original.lang.clone(),
        start_line: original.start_line,
        end_line: original.end_line,
    }
}

fn split_code_fence(block: &Block, max_tokens: usize, bias: TokenBias) -> Vec<Block> {
    let lines: Vec<&str> = block.content.split('\n').collect();
    if lines.len() < 3 {
        return split_by_lines(block, max_tokens, bias);
    }
    let open = lines[0];
    let close = lines[lines.len() - 1];
    let body = &lines[1..lines.len() - 1];

    let fenced = |interior: &[&str]| format!("{}\n{}\n{}", open, interior.join("\n"), close);

    let mut parts: Vec<Block> = Vec::with_capacity(4);
    let mut current: Vec<&str> = Vec::with_capacity(16);
    for &line in body {
        let mut candidate = current.clone();
        candidate.push(line);
        if !current.is_empty()
            && estimate_str(block.kind, &fenced(&candidate), bias) > max_tokens
        {
            parts.push(derived(block, fenced(&current)));
            current = vec![line];
            continue;
        }
        current = candidate;
    }
    if !current.is_empty() {
        parts.push(derived(block, fenced(&current)));
    }
    if parts.is_empty() {
        return vec![block.clone()];
    }
    parts
}

fn split_prose(block: &Block, max_tokens: usize, bias: TokenBias) -> Vec<Block> {
    let parts = split_sentences(&block.content);
    if parts.len() <= 1 {
        return split_by_lines(block, max_tokens, bias);
    }

    let mut out: Vec<Block> = Vec::with_capacity(4);
    let mut current = String::new();
    for part in parts {
        let candidate = format!("{} {}", current, part).trim().to_string();
        if !current.is_empty() && estimate_str(block.kind, &candidate, bias) > max_tokens {
            out.push(derived(block, current));
            current = part.trim().to_string();
            continue;
        }
        current = candidate;
    }
    if !current.is_empty() {
        out.push(derived(block, current));
    }
    if out.is_empty() {
        return vec![block.clone()];
    }
    out
}

fn split_list(block: &Block, max_tokens: usize, bias: TokenBias) -> Vec<Block> {
    // Group lines into items: each item starts at a list-item marker and
    // carries its indented continuation lines.
    let mut items: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in block.content.split('\n') {
        if list_item_re().is_match(line) {
            if !current.is_empty() {
                items.push(current.join("\n"));
            }
            current = vec![line];
            continue;
        }
        if current.is_empty() {
            current = vec![line];
            continue;
        }
        current.push(line);
    }
    if !current.is_empty() {
        items.push(current.join("\n"));
    }
    if items.len() <= 1 {
        return split_by_lines(block, max_tokens, bias);
    }

    let mut out: Vec<Block> = Vec::with_capacity(4);
    let mut cur_items: Vec<String> = Vec::new();
    for item in items {
        let mut candidate = cur_items.clone();
        candidate.push(item.clone());
        if !cur_items.is_empty()
            && estimate_str(block.kind, &candidate.join("\n"), bias) > max_tokens
        {
            out.push(derived(block, cur_items.join("\n")));
            cur_items = vec![item];
            continue;
        }
        cur_items = candidate;
    }
    if !cur_items.is_empty() {
        out.push(derived(block, cur_items.join("\n")));
    }
    if out.is_empty() {
        return vec![block.clone()];
    }
    out
}

fn split_table(block: &Block, max_tokens: usize, bias: TokenBias) -> Vec<Block> {
    let lines: Vec<&str> = block.content.split('\n').collect();
    if lines.len() <= 2 {
        return split_by_lines(block, max_tokens, bias);
    }
    let head = &lines[..2];
    let rows = &lines[2..];

    let with_head = |rows: &[&str]| {
        let mut all = head.to_vec();
        all.extend_from_slice(rows);
        all.join("\n")
    };

    let mut out: Vec<Block> = Vec::with_capacity(4);
    let mut cur_rows: Vec<&str> = Vec::new();
    for &row in rows {
        let mut candidate = cur_rows.clone();
        candidate.push(row);
        if !cur_rows.is_empty()
            && estimate_str(block.kind, &with_head(&candidate), bias) > max_tokens
        {
            out.push(derived(block, with_head(&cur_rows)));
            cur_rows = vec![row];
            continue;
        }
        cur_rows = candidate;
    }
    if !cur_rows.is_empty() {
        out.push(derived(block, with_head(&cur_rows)));
    }
    if out.is_empty() {
        return vec![block.clone()];
    }
    out
}

fn split_by_lines(block: &Block, max_tokens: usize, bias: TokenBias) -> Vec<Block> {
    let mut out: Vec<Block> = Vec::with_capacity(4);
    let mut current: Vec<&str> = Vec::new();
    for line in block.content.split('\n') {
        let mut candidate = current.clone();
        candidate.push(line);
        if !current.is_empty()
            && estimate_str(block.kind, &candidate.join("\n"), bias) > max_tokens
        {
            out.push(derived(block, current.join("\n")));
            current = vec![line];
            continue;
        }
        current = candidate;
    }
    if !current.is_empty() {
        out.push(derived(block, current.join("\n")));
    }
    if out.is_empty() {
        return vec![block.clone()];
    }
    out
}

/// Split prose on ASCII sentence terminators followed by whitespace.
///
/// Falls back to whitespace-separated words when no terminator yields more
/// than one segment.
fn split_sentences(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let runes: Vec<char> = trimmed.chars().collect();
    let mut parts: Vec<String> = Vec::with_capacity(8);
    let mut start = 0usize;
    let mut i = 0usize;
    while i < runes.len() {
        if matches!(runes[i], '.' | '!' | '?') {
            if i + 1 < runes.len() && runes[i + 1] != ' ' && runes[i + 1] != '\n' {
                i += 1;
                continue;
            }
            parts.push(runes[start..=i].iter().collect::<String>().trim().to_string());
            while i + 1 < runes.len()
                && matches!(runes[i + 1], ' ' | '\n' | '\t')
            {
                i += 1;
            }
            start = i + 1;
        }
        i += 1;
    }
    if start < runes.len() {
        parts.push(runes[start..].iter().collect::<String>().trim().to_string());
    }

    if parts.len() <= 1 {
        return trimmed.split_whitespace().map(str::to_string).collect();
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(kind: BlockKind, content: &str) -> Block {
        Block::new(kind, content)
    }

    #[test]
    fn test_within_budget_untouched() {
        let b = block(BlockKind::Paragraph, "small");
        let parts = split_oversized(&b, 100, TokenBias::Balanced);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].content, "small");
    }

    #[test]
    fn test_code_fence_keeps_fences_on_every_part() {
        let body: Vec<String> = (0..40).map(|i| format!("let x{} = {};", i, i)).collect();
        let content = format!("```rust\n{}\n```", body.join("\n"));
        let mut b = block(BlockKind::CodeFence, &content);
        b.lang = "rust".to_string();

        let parts = split_oversized(&b, 30, TokenBias::Balanced);
        assert!(parts.len() > 1);
        for part in &parts {
            assert!(part.content.starts_with("```rust\n"));
            assert!(part.content.ends_with("```"));
            assert_eq!(part.lang, "rust");
            assert_eq!(part.kind, BlockKind::CodeFence);
        }
        // Interior lines are preserved in order across the parts.
        let rejoined: Vec<String> = parts
            .iter()
            .flat_map(|p| {
                let lines: Vec<&str> = p.content.split('\n').collect();
                lines[1..lines.len() - 1]
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
            })
            .collect();
        assert_eq!(rejoined, body);
    }

    #[test]
    fn test_prose_splits_on_sentences() {
        let content = "First sentence is here. Second sentence follows! Third one asks? Fourth closes.";
        let b = block(BlockKind::Paragraph, content);
        let parts = split_oversized(&b, 8, TokenBias::Balanced);
        assert!(parts.len() > 1);
        for part in &parts {
            assert!(estimate_tokens(part, TokenBias::Balanced) <= 8);
        }
        assert!(parts[0].content.starts_with("First"));
    }

    #[test]
    fn test_prose_falls_back_to_words() {
        // No sentence terminators at all.
        let content = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let b = block(BlockKind::Paragraph, content);
        let parts = split_oversized(&b, 3, TokenBias::Balanced);
        assert!(parts.len() > 1);
    }

    #[test]
    fn test_abbreviation_dot_not_a_boundary() {
        let sentences = split_sentences("v1.2 is out. More text follows.");
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0], "v1.2 is out.");
    }

    #[test]
    fn test_list_splits_at_item_boundaries() {
        let items: Vec<String> = (0..20)
            .map(|i| format!("- item number {} with some words", i))
            .collect();
        let b = block(BlockKind::List, &items.join("\n"));
        let parts = split_oversized(&b, 20, TokenBias::Balanced);
        assert!(parts.len() > 1);
        for part in &parts {
            for line in part.content.split('\n') {
                assert!(line.starts_with("- "), "split inside an item: {:?}", line);
            }
        }
    }

    #[test]
    fn test_list_keeps_continuations_with_item() {
        let content = "- first item\n  continuation line\n- second item\n- third item";
        let b = block(BlockKind::List, content);
        let parts = split_oversized(&b, 8, TokenBias::Balanced);
        let holder: Vec<&Block> = parts
            .iter()
            .filter(|p| p.content.contains("continuation line"))
            .collect();
        assert_eq!(holder.len(), 1);
        assert!(holder[0].content.contains("first item"));
    }

    #[test]
    fn test_table_duplicates_header_rows() {
        let mut lines = vec!["| id | name |".to_string(), "|----|------|".to_string()];
        for i in 0..30 {
            lines.push(format!("| {} | row-{} |", i, i));
        }
        let b = block(BlockKind::Table, &lines.join("\n"));
        let parts = split_oversized(&b, 25, TokenBias::Balanced);
        assert!(parts.len() > 1);
        for part in &parts {
            let part_lines: Vec<&str> = part.content.split('\n').collect();
            assert_eq!(part_lines[0], "| id | name |");
            assert_eq!(part_lines[1], "|----|------|");
        }
    }

    #[test]
    fn test_frontmatter_splits_by_lines() {
        let lines: Vec<String> = (0..30).map(|i| format!("key{}: value{}", i, i)).collect();
        let b = block(BlockKind::Frontmatter, &lines.join("\n"));
        let parts = split_oversized(&b, 15, TokenBias::Balanced);
        assert!(parts.len() > 1);
        for part in &parts {
            assert!(estimate_tokens(part, TokenBias::Balanced) <= 15);
        }
    }

    #[test]
    fn test_inherits_level_and_lines() {
        let mut b = block(BlockKind::Paragraph, &"word. ".repeat(50));
        b.start_line = 7;
        b.end_line = 9;
        let parts = split_oversized(&b, 10, TokenBias::Balanced);
        for part in parts {
            assert_eq!(part.start_line, 7);
            assert_eq!(part.end_line, 9);
        }
    }
}
