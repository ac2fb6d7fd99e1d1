//! # tianyi-llm
//!
//! Model-facing seams of the memory subsystem: text embedding providers
//! (OpenAI-compatible, Ollama, offline hashing) and a minimal text completion
//! trait used by model-backed extraction and summarization.

pub mod provider;
pub mod embedding;
pub mod mock;

pub use provider::{CompletionRequest, LlmProvider};
pub use embedding::{EmbeddingProvider, HashEmbedding, OllamaEmbedding, OpenAiEmbedding};
pub use mock::{MockEmbedding, MockProvider};
