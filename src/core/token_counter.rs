//! The optional `TokenCounter` collaborator (spec §6.1), plus the bridge's
//! own small, dependency-light default implementation.
//!
//! Swapping in a tokenizer-accurate implementation (e.g. `tiktoken-rs`,
//! already in this crate's dependency stack) is a drop-in replacement behind
//! this trait — see `TiktokenCounter` below.

use crate::core::model::Message;

pub trait TokenCounter: Send + Sync {
    fn estimate(&self, messages: &[Message]) -> u64;
}

/// Byte-length heuristic: roughly 4 characters per token across the text
/// content of every block. Used when no external counter is configured.
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn estimate(&self, messages: &[Message]) -> u64 {
        let chars: usize = messages
            .iter()
            .flat_map(|m| m.content.as_blocks())
            .map(|block| block_char_len(&block))
            .sum();
        (chars as u64 / 4).max(1)
    }
}

fn block_char_len(block: &crate::core::model::ContentBlock) -> usize {
    use crate::core::model::ContentBlock;
    match block {
        ContentBlock::Text { text } => text.len(),
        ContentBlock::ToolUse { input, .. } => input.to_string().len(),
        ContentBlock::ToolResult { content, .. } => content.as_ref().map(|c| c.render().len()).unwrap_or(0),
        ContentBlock::Thinking { thinking, .. } => thinking.len(),
        ContentBlock::Image { .. } | ContentBlock::RedactedThinking { .. } => 0,
    }
}

/// Tokenizer-accurate counter backed by `tiktoken-rs`'s cl100k_base encoding.
/// Good enough as a stand-in across model families; the bridge doesn't claim
/// exact provider-specific token accounting.
pub struct TiktokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

impl TiktokenCounter {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self { bpe: tiktoken_rs::cl100k_base()? })
    }
}

impl TokenCounter for TiktokenCounter {
    fn estimate(&self, messages: &[Message]) -> u64 {
        let text: String = messages
            .iter()
            .flat_map(|m| m.content.as_blocks())
            .filter_map(|block| match block {
                crate::core::model::ContentBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        self.bpe.encode_ordinary(&text).len() as u64
    }
}
