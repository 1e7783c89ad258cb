//! Token usage reported by (or estimated for) one completion.

use serde::{Deserialize, Serialize};

/// Token usage of a single request.
///
/// Deserializes from the wire `usage` object; `total_tokens` sent by the
/// service is ignored and always recomputed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Tokens generated in the completion
    #[serde(default)]
    pub completion_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Total tokens used (prompt + completion)
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_from_wire_ignores_total() {
        let usage: Usage =
            serde_json::from_str(r#"{"prompt_tokens":12,"completion_tokens":30,"total_tokens":99}"#)
                .unwrap();
        assert_eq!(usage.total(), 42);
    }

    #[test]
    fn test_usage_missing_fields_default_to_zero() {
        let usage: Usage = serde_json::from_str(r#"{"prompt_tokens":7}"#).unwrap();
        assert_eq!(usage, Usage::new(7, 0));
        assert!(!usage.is_empty());
    }
}
