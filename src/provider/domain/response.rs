//! Model responses and streamed chunks.

use super::ChatRole;
use serde::{Deserialize, Serialize};

/// Token accounting reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated.
    pub completion_tokens: u32,
    /// Sum of both.
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Creates usage with a derived total.
    #[must_use]
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// A complete model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Generated text.
    pub content: String,
    /// Model that produced it.
    pub model: String,
    /// Author role, normally `assistant`.
    pub role: ChatRole,
    /// Why generation stopped, as reported by the backend.
    pub finish_reason: Option<String>,
    /// Token accounting, when supplied.
    pub usage: Option<TokenUsage>,
}

impl ModelResponse {
    /// Creates an assistant response.
    #[must_use]
    pub fn new(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            role: ChatRole::Assistant,
            finish_reason: None,
            usage: None,
        }
    }

    /// Sets the finish reason.
    #[must_use]
    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    /// Sets token usage.
    #[must_use]
    pub const fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// One piece of a streamed response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Text delta.
    pub content: String,
    /// Whether this is the last chunk.
    pub is_final: bool,
    /// Why generation stopped; only on the final chunk.
    pub finish_reason: Option<String>,
    /// Aggregate usage; only on the final chunk, when supplied.
    pub usage: Option<TokenUsage>,
}

impl StreamChunk {
    /// Creates an intermediate chunk.
    #[must_use]
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Creates a final chunk.
    #[must_use]
    pub fn last(content: impl Into<String>, usage: Option<TokenUsage>) -> Self {
        Self {
            content: content.into(),
            is_final: true,
            finish_reason: None,
            usage,
        }
    }
}
