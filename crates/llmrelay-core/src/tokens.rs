//! Prompt size estimation used to reject oversized requests before any
//! provider cost is incurred.

use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

/// Rough characters-per-token ratio for English/Cyrillic BPE vocabularies.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate tokens in a text span. Empty text costs nothing.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Estimate tokens for a list of `(role, content)` pairs.
pub fn estimate_message_tokens<'a, I>(messages: I) -> usize
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    messages
        .into_iter()
        .map(|(role, content)| estimate_tokens(role) + estimate_tokens(content))
        .sum()
}

/// Upper bound on prompt tokens; `None` disables the check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenBudget {
    pub max_prompt_tokens: Option<usize>,
}

impl TokenBudget {
    pub fn new(max_prompt_tokens: Option<usize>) -> Self {
        Self { max_prompt_tokens }
    }

    /// Returns the estimated count when within budget.
    pub fn check<'a, I>(&self, messages: I) -> CoreResult<usize>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let total = estimate_message_tokens(messages);
        let Some(max) = self.max_prompt_tokens else {
            debug!(tokens = total, "No token limit configured");
            return Ok(total);
        };
        if total > max {
            warn!(tokens = total, max, "Prompt exceeds token limit");
            return Err(CoreError::TokenLimitExceeded { got: total, max });
        }
        debug!(tokens = total, max, "Prompt within token limit");
        Ok(total)
    }
}
