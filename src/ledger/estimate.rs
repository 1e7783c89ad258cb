//! Approximate token counting.
//!
//! The heuristic is not a tokenizer and will disagree with the service's own
//! accounting. Swap in a real tokenizer by implementing [`TokenEstimator`].

use std::fmt;

pub trait TokenEstimator: Send + Sync + fmt::Debug {
    fn estimate(&self, text: &str) -> u64;
}

/// Averages a word-based and a character-based guess.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> u64 {
        approximate_token_count(text)
    }
}

/// `ceil((words * 1.3 + chars / 4) / 2)`
pub fn approximate_token_count(text: &str) -> u64 {
    let words = text.split_whitespace().count() as f64;
    let chars = text.chars().count() as f64;
    ((words * 1.3 + chars / 4.0) / 2.0).ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text() {
        assert_eq!(approximate_token_count(""), 0);
    }

    #[test]
    fn test_known_values() {
        // 2 words, 11 chars: (2.6 + 2.75) / 2 = 2.675
        assert_eq!(approximate_token_count("hello world"), 3);
        // 1 word, 4 chars: (1.3 + 1.0) / 2 = 1.15
        assert_eq!(approximate_token_count("word"), 2);
    }

    #[test]
    fn test_deterministic() {
        let text = "The quick brown fox jumps over the lazy dog";
        assert_eq!(
            HeuristicEstimator.estimate(text),
            approximate_token_count(text)
        );
    }
}
