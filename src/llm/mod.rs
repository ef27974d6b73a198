//! Text-generation providers used by the recommendation composer.

use anyhow::Result;

mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// System instructions shared by every provider.
pub const SYSTEM_PROMPT: &str = "You are a helpful and friendly Learning Path Assistant. \
Recommend courses using only the data you are given. Format the answer in Markdown, \
group courses by competency, explain why each course is relevant, and keep the tone \
concise and encouraging.";

/// Trait implemented by concrete LLM providers.
pub trait LlmProvider: Send + Sync {
    /// Generates a completion for `request`.
    fn answer(&self, request: &ProviderRequest) -> Result<String>;
}

/// Request envelope shared by the various providers.
pub struct ProviderRequest<'a> {
    /// Full user prompt.
    pub prompt: &'a str,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token budget.
    pub max_tokens: usize,
}
