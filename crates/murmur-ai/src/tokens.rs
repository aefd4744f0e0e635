//! Token counting.
//!
//! Exact counts need the model's own tokenizer, which callers can plug in
//! through [`TokenCounter`]. The built-in [`EstimatingTokenCounter`] splits
//! text the way BPE tokenizers pre-tokenize it and charges long words by
//! length, which lands close to real counts for English prose and code.

use regex::Regex;
use std::sync::LazyLock;

/// Counts the tokens a piece of text costs under a given model
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str, model: &str) -> usize;
}

impl<F> TokenCounter for F
where
    F: Fn(&str, &str) -> usize + Send + Sync,
{
    fn count(&self, text: &str, model: &str) -> usize {
        self(text, model)
    }
}

/// Pre-tokenization pattern: contractions, letter runs, digit runs (at most
/// three digits each), punctuation runs and whitespace runs.
static PIECE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i:'s|'t|'re|'ve|'m|'ll|'d)| ?\p{L}+| ?\p{N}{1,3}| ?[^\s\p{L}\p{N}]+|\s+")
        .expect("token piece pattern is valid")
});

/// Pieces up to this many characters are assumed to be one vocabulary entry
const SINGLE_TOKEN_MAX_CHARS: usize = 6;

/// Characters a single token covers on average inside a long word
const CHARS_PER_TOKEN: usize = 4;

/// Regex-based token estimator; model-independent
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatingTokenCounter;

impl TokenCounter for EstimatingTokenCounter {
    fn count(&self, text: &str, _model: &str) -> usize {
        PIECE_PATTERN
            .find_iter(text)
            .map(|piece| {
                let chars = piece.as_str().trim_start().chars().count();
                if chars <= SINGLE_TOKEN_MAX_CHARS {
                    1
                } else {
                    chars.div_ceil(CHARS_PER_TOKEN)
                }
            })
            .sum()
    }
}
