//! Token counting for prompt budgeting.
//!
//! Uses the cl100k BPE when the encoder can be constructed, otherwise an
//! approximation of one token per four characters.

use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::warn;

pub struct TokenCounter {
    bpe: Option<CoreBPE>,
}

impl TokenCounter {
    pub fn new() -> Self {
        match cl100k_base() {
            Ok(bpe) => Self { bpe: Some(bpe) },
            Err(e) => {
                warn!(error = %e, "cl100k tokenizer unavailable; token counting will use approximation");
                Self { bpe: None }
            }
        }
    }

    /// Approximation-only counter, for deterministic tests.
    pub fn approximate() -> Self {
        Self { bpe: None }
    }

    pub fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => (text.chars().count() + 3) / 4,
        }
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}
