use async_trait::async_trait;
use tianyi_core::Result;

/// A single-shot text completion request.
///
/// The memory subsystem only needs prompt in, text out: extraction and
/// summarization never stream and never use tools.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System prompt (separate from the user prompt for providers that support it).
    pub system: Option<String>,
    pub prompt: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens: 1024,
            temperature: 0.2,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Trait implemented by whatever language model backs extraction and summarization.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable name, e.g. "SiliconFlow", "mock"
    fn name(&self) -> &str;

    /// Send a non-streaming request and return the generated text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}
