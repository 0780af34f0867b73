//! Token-budgeted block packing.
//!
//! Walks a flattened block stream, cutting chunk boundaries at headings within
//! the configured depth and at the token budget, seeding each budget-forced
//! boundary with an overlap tail from the previous chunk, then merging chunks
//! that fall below the minimum size.

use crate::chunking::markdown::MarkdownOptions;
use crate::chunking::splitter::split_oversized;
use crate::markdown::block::{Block, BlockKind};
use crate::markdown::breadcrumb::HeadingStack;
use crate::markdown::token::estimate_tokens;

#[derive(Debug, Clone)]
pub(crate) struct PackedChunk {
    pub blocks: Vec<Block>,
    pub est_tokens: usize,
    pub breadcrumb: String,
    pub section_title: String,
    pub block_start: usize,
    pub block_end: usize,
}

#[derive(Debug, Clone)]
struct IndexedBlock {
    index: usize,
    block: Block,
}

pub(crate) fn pack_blocks(blocks: &[Block], opts: &MarkdownOptions) -> Vec<PackedChunk> {
    let mut stream: Vec<IndexedBlock> = Vec::with_capacity(blocks.len());
    for (i, block) in blocks.iter().enumerate() {
        for part in split_oversized(block, opts.max_tokens, opts.bias) {
            stream.push(IndexedBlock { index: i, block: part });
        }
    }
    if stream.is_empty() {
        return Vec::new();
    }

    let mut headings = HeadingStack::new();
    let mut result: Vec<PackedChunk> = Vec::with_capacity(stream.len() / 2 + 1);
    let mut current: Vec<IndexedBlock> = Vec::with_capacity(8);
    let mut current_tokens = 0usize;

    for ib in stream {
        let tokens = estimate_tokens(&ib.block, opts.bias);

        if ib.block.kind == BlockKind::Heading
            && ib.block.level > 0
            && ib.block.level <= opts.heading_depth
        {
            if !current.is_empty() {
                result.push(finalize(&current, current_tokens, &headings));
                current.clear();
                current_tokens = 0;
            }
            headings.update(ib.block.level, &ib.block.content);
        }

        if !current.is_empty() && current_tokens + tokens > opts.max_tokens {
            let prev = current.clone();
            result.push(finalize(&current, current_tokens, &headings));
            current.clear();
            current_tokens = 0;
            // The tail must leave room for the incoming block, or the new
            // chunk would already be over budget.
            let budget = opts
                .overlap_tokens
                .min(opts.max_tokens.saturating_sub(tokens));
            for overlap in compute_overlap(&prev, budget, opts.bias) {
                current_tokens += estimate_tokens(&overlap.block, opts.bias);
                current.push(overlap);
            }
        }

        current_tokens += tokens;
        current.push(ib);
    }

    if !current.is_empty() {
        result.push(finalize(&current, current_tokens, &headings));
    }

    merge_small_chunks(result, opts.min_tokens, opts.max_tokens)
}

fn finalize(current: &[IndexedBlock], tokens: usize, headings: &HeadingStack) -> PackedChunk {
    PackedChunk {
        blocks: current.iter().map(|ib| ib.block.clone()).collect(),
        est_tokens: tokens,
        breadcrumb: headings.breadcrumb(),
        section_title: headings.section_title(),
        block_start: current[0].index,
        block_end: current[current.len() - 1].index,
    }
}

/// Select a suffix of the previous chunk worth at most `overlap_tokens`,
/// skipping frontmatter. A tail consisting only of headings is dropped.
fn compute_overlap(
    prev_blocks: &[IndexedBlock],
    overlap_tokens: usize,
    bias: crate::markdown::token::TokenBias,
) -> Vec<IndexedBlock> {
    if overlap_tokens == 0 || prev_blocks.is_empty() {
        return Vec::new();
    }
    let mut selected: Vec<IndexedBlock> = Vec::with_capacity(prev_blocks.len());
    let mut total = 0usize;
    for ib in prev_blocks.iter().rev() {
        if ib.block.kind == BlockKind::Frontmatter {
            continue;
        }
        let tokens = estimate_tokens(&ib.block, bias);
        if total + tokens > overlap_tokens {
            break;
        }
        selected.push(ib.clone());
        total += tokens;
    }
    selected.reverse();
    if !selected.is_empty() && selected.iter().all(|ib| ib.block.kind == BlockKind::Heading) {
        return Vec::new();
    }
    selected
}

fn merge_small_chunks(
    mut chunks: Vec<PackedChunk>,
    min_tokens: usize,
    max_tokens: usize,
) -> Vec<PackedChunk> {
    if min_tokens == 0 || chunks.len() <= 1 {
        return chunks;
    }
    let mut i = 0usize;
    while i < chunks.len() {
        if chunks[i].est_tokens >= min_tokens {
            i += 1;
            continue;
        }
        if i + 1 < chunks.len() && chunks[i].est_tokens + chunks[i + 1].est_tokens <= max_tokens {
            let cur = chunks.remove(i);
            let next = chunks.remove(i);
            chunks.insert(i, merge_packed(cur, next));
            continue;
        }
        if i > 0 && chunks[i].est_tokens + chunks[i - 1].est_tokens <= max_tokens {
            let cur = chunks.remove(i);
            let prev = chunks.remove(i - 1);
            chunks.insert(i - 1, merge_packed(prev, cur));
            continue;
        }
        i += 1;
    }
    chunks
}

fn merge_packed(a: PackedChunk, b: PackedChunk) -> PackedChunk {
    let mut blocks = a.blocks;
    blocks.extend(b.blocks);
    PackedChunk {
        blocks,
        est_tokens: a.est_tokens + b.est_tokens,
        breadcrumb: b.breadcrumb,
        section_title: b.section_title,
        block_start: a.block_start,
        block_end: b.block_end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::block::parse_blocks;

    fn opts(max: usize, min: usize, overlap: usize) -> MarkdownOptions {
        MarkdownOptions {
            target_tokens: max,
            max_tokens: max,
            min_tokens: min,
            overlap_tokens: overlap,
            heading_depth: 3,
            ..MarkdownOptions::default()
        }
    }

    #[test]
    fn test_empty_stream() {
        assert!(pack_blocks(&[], &opts(100, 0, 0)).is_empty());
    }

    #[test]
    fn test_heading_starts_new_chunk() {
        let blocks = parse_blocks("# One\n\nbody one\n\n# Two\n\nbody two", false);
        let packed = pack_blocks(&blocks, &opts(1000, 0, 0));
        assert_eq!(packed.len(), 2);
        assert_eq!(packed[0].breadcrumb, "One");
        assert_eq!(packed[1].breadcrumb, "Two");
        assert_eq!(packed[1].section_title, "Two");
    }

    #[test]
    fn test_deep_heading_does_not_cut() {
        // heading_depth is 3; an h4 stays inside the running chunk.
        let blocks = parse_blocks("# One\n\nbody\n\n#### Deep\n\nmore body", false);
        let packed = pack_blocks(&blocks, &opts(1000, 0, 0));
        assert_eq!(packed.len(), 1);
    }

    #[test]
    fn test_budget_cut_with_overlap_tail() {
        // Four 4-token paragraphs, budget 9, overlap 4: each cut seeds the
        // next chunk with the previous chunk's final paragraph.
        let text = (0..4)
            .map(|_| "x".repeat(16))
            .collect::<Vec<_>>()
            .join("\n\n");
        let blocks = parse_blocks(&text, false);
        let packed = pack_blocks(&blocks, &opts(9, 0, 4));
        assert!(packed.len() > 1);
        let first_last = packed[0].blocks.last().unwrap().content.clone();
        assert_eq!(packed[1].blocks[0].content, first_last);
    }

    #[test]
    fn test_overlap_skips_heading_only_tail() {
        let blocks = parse_blocks("## Section\n\nbody words making tokens", false);
        // Tiny overlap budget only fits the heading; heading-only tail dropped.
        let packed = pack_blocks(&blocks, &opts(5, 0, 2));
        for window in packed.windows(2) {
            let seeded = &window[1].blocks[0];
            assert_ne!(seeded.kind, BlockKind::Heading);
        }
    }

    #[test]
    fn test_size_invariant() {
        let text = (0..30)
            .map(|i| format!("paragraph number {} with a handful of words", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let options = opts(20, 0, 5);
        for chunk in pack_blocks(&parse_blocks(&text, false), &options) {
            assert!(
                chunk.est_tokens <= options.max_tokens,
                "chunk exceeds budget: {}",
                chunk.est_tokens
            );
        }
    }

    #[test]
    fn test_determinism() {
        let text = "# A\n\nsome body\n\n## B\n\nmore body\n\n- l1\n- l2";
        let blocks = parse_blocks(text, false);
        let options = opts(10, 3, 4);
        let a = pack_blocks(&blocks, &options);
        let b = pack_blocks(&blocks, &options);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.est_tokens, y.est_tokens);
            assert_eq!(x.breadcrumb, y.breadcrumb);
            let xc: Vec<&str> = x.blocks.iter().map(|bl| bl.content.as_str()).collect();
            let yc: Vec<&str> = y.blocks.iter().map(|bl| bl.content.as_str()).collect();
            assert_eq!(xc, yc);
        }
    }

    #[test]
    fn test_small_chunk_merges_forward() {
        let chunks = vec![
            PackedChunk {
                blocks: vec![Block::new(BlockKind::Paragraph, "tiny")],
                est_tokens: 2,
                breadcrumb: "A".into(),
                section_title: "A".into(),
                block_start: 0,
                block_end: 0,
            },
            PackedChunk {
                blocks: vec![Block::new(BlockKind::Paragraph, "bigger chunk")],
                est_tokens: 10,
                breadcrumb: "B".into(),
                section_title: "B".into(),
                block_start: 1,
                block_end: 1,
            },
        ];
        let merged = merge_small_chunks(chunks, 5, 100);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].est_tokens, 12);
        // Merged chunk inherits the successor's breadcrumb.
        assert_eq!(merged[0].breadcrumb, "B");
        assert_eq!(merged[0].block_start, 0);
        assert_eq!(merged[0].block_end, 1);
    }

    #[test]
    fn test_small_chunk_merges_backward_when_forward_overflows() {
        let chunks = vec![
            PackedChunk {
                blocks: vec![Block::new(BlockKind::Paragraph, "left")],
                est_tokens: 10,
                breadcrumb: "A".into(),
                section_title: "A".into(),
                block_start: 0,
                block_end: 0,
            },
            PackedChunk {
                blocks: vec![Block::new(BlockKind::Paragraph, "tiny")],
                est_tokens: 2,
                breadcrumb: "B".into(),
                section_title: "B".into(),
                block_start: 1,
                block_end: 1,
            },
            PackedChunk {
                blocks: vec![Block::new(BlockKind::Paragraph, "huge")],
                est_tokens: 99,
                breadcrumb: "C".into(),
                section_title: "C".into(),
                block_start: 2,
                block_end: 2,
            },
        ];
        let merged = merge_small_chunks(chunks, 5, 100);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].est_tokens, 12);
        assert_eq!(merged[0].breadcrumb, "B");
        assert_eq!(merged[1].est_tokens, 99);
    }

    #[test]
    fn test_unmergeable_small_chunk_stays() {
        let chunks = vec![
            PackedChunk {
                blocks: vec![Block::new(BlockKind::Paragraph, "big")],
                est_tokens: 99,
                breadcrumb: String::new(),
                section_title: String::new(),
                block_start: 0,
                block_end: 0,
            },
            PackedChunk {
                blocks: vec![Block::new(BlockKind::Paragraph, "tiny")],
                est_tokens: 2,
                breadcrumb: String::new(),
                section_title: String::new(),
                block_start: 1,
                block_end: 1,
            },
        ];
        let merged = merge_small_chunks(chunks, 5, 100);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_disabled_when_min_zero() {
        let chunks = vec![
            PackedChunk {
                blocks: vec![Block::new(BlockKind::Paragraph, "a")],
                est_tokens: 1,
                breadcrumb: String::new(),
                section_title: String::new(),
                block_start: 0,
                block_end: 0,
            },
            PackedChunk {
                blocks: vec![Block::new(BlockKind::Paragraph, "b")],
                est_tokens: 1,
                breadcrumb: String::new(),
                section_title: String::new(),
                block_start: 1,
                block_end: 1,
            },
        ];
        assert_eq!(merge_small_chunks(chunks, 0, 100).len(), 2);
    }
}
