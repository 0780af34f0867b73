//! Deterministic token estimation.
//!
//! `ceil(rune_count / divisor)` with a divisor chosen by block type and bias.
//! No tokenizer, no external calls; the estimate depends only on the block
//! type and rune count.

use crate::markdown::block::{Block, BlockKind};

/// Tunes the token estimation divisors toward prose- or code-heavy content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenBias {
    #[default]
    Balanced,
    Prose,
    Code,
}

/// Estimate tokens for a block.
pub fn estimate_tokens(block: &Block, bias: TokenBias) -> usize {
    estimate_str(block.kind, &block.content, bias)
}

/// Estimate tokens for content of a given block kind.
///
/// Empty content estimates to 0; any non-empty content estimates to at least 1.
pub fn estimate_str(kind: BlockKind, content: &str, bias: TokenBias) -> usize {
    if content.is_empty() {
        return 0;
    }

    let (prose_divisor, code_divisor) = match bias {
        TokenBias::Balanced => (4.0, 2.75),
        TokenBias::Prose => (4.4, 3.0),
        TokenBias::Code => (3.6, 2.4),
    };

    let divisor = if kind.is_code_like() {
        code_divisor
    } else {
        prose_divisor
    };

    let chars = content.chars().count() as f64;
    let tokens = (chars / divisor).ceil() as usize;
    tokens.max(1)
}
