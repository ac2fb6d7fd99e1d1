//! Mock providers for deterministic testing.
//!
//! Return pre-configured responses without making any HTTP calls.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::embedding::{EmbeddingProvider, HashEmbedding};
use crate::provider::{CompletionRequest, LlmProvider};
use tianyi_core::{Result, TianyiError};

/// A mock LLM provider that returns queued responses in order.
///
/// # Example
/// ```
/// use tianyi_llm::mock::MockProvider;
/// let provider = MockProvider::new("test")
///     .with_response("v_add(document='用户喜欢甜食')");
/// ```
pub struct MockProvider {
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// Track all requests received (for assertions in tests).
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
    name: String,
}

/// A pre-configured response from the mock provider.
#[derive(Clone, Default)]
pub struct MockResponse {
    pub text: String,
    /// If set, the provider will return this error instead.
    pub error: Option<String>,
}

impl MockResponse {
    /// Create a text response.
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    /// Create an error response.
    pub fn error(msg: &str) -> Self {
        Self {
            error: Some(msg.to_string()),
            ..Default::default()
        }
    }
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(vec![])),
            requests: Arc::new(Mutex::new(vec![])),
            name: name.into(),
        }
    }

    /// Queue a simple text response.
    pub fn with_response(self, text: &str) -> Self {
        self.responses.lock().push(MockResponse::text(text));
        self
    }

    /// Queue an error response.
    pub fn with_error(self, error: &str) -> Self {
        self.responses.lock().push(MockResponse::error(error));
        self
    }

    /// Get all requests that were made to this provider.
    pub fn recorded_requests(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        Arc::clone(&self.requests)
    }

    /// Pop the next queued response; an exhausted queue answers with an empty string.
    fn next_response(&self) -> MockResponse {
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            MockResponse::default()
        } else {
            responses.remove(0)
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests.lock().push(request.clone());
        let mock = self.next_response();
        match mock.error {
            Some(error) => Err(TianyiError::LlmProvider(error)),
            None => Ok(mock.text),
        }
    }
}

/// A mock embedder with fixed vectors per text and injectable failures.
///
/// Texts without a fixed vector fall back to [`HashEmbedding`], so any text
/// can be embedded and identical texts always get identical vectors.
pub struct MockEmbedding {
    dims: usize,
    fixed: Mutex<HashMap<String, Vec<f32>>>,
    fallback: HashEmbedding,
    fail_next: AtomicUsize,
    delay: Option<Duration>,
    /// Number of `embed` calls received.
    pub calls: AtomicUsize,
}

impl MockEmbedding {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            fixed: Mutex::new(HashMap::new()),
            fallback: HashEmbedding::new(dims),
            fail_next: AtomicUsize::new(0),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Pin the vector returned for `text`.
    pub fn with_vector(self, text: &str, vector: Vec<f32>) -> Self {
        self.fixed.lock().insert(text.to_string(), vector);
        self
    }

    /// Sleep before answering (for timeout tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next `n` calls with `EmbeddingUnavailable`.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TianyiError::EmbeddingUnavailable("mock: injected failure".into()));
        }
        let fixed = self.fixed.lock();
        Ok(texts
            .iter()
            .map(|t| {
                fixed
                    .get(*t)
                    .cloned()
                    .unwrap_or_else(|| self.fallback.embed_one(t))
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_text_response() {
        let provider = MockProvider::new("mock").with_response("Hello!");
        let text = provider.complete(&CompletionRequest::new("hi")).await.unwrap();
        assert_eq!(text, "Hello!");
    }

    #[tokio::test]
    async fn test_mock_error() {
        let provider = MockProvider::new("mock").with_error("HTTP 429: rate limited");
        let result = provider.complete(&CompletionRequest::new("hi")).await;
        assert!(matches!(result, Err(TianyiError::LlmProvider(_))));
    }

    #[tokio::test]
    async fn test_mock_records_requests() {
        let provider = MockProvider::new("mock").with_response("ok");
        let req = CompletionRequest::new("hello").with_system("be nice");
        let _ = provider.complete(&req).await;
        let recorded = provider.recorded_requests();
        let recorded = recorded.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].system, Some("be nice".into()));
    }

    #[tokio::test]
    async fn test_mock_multiple_responses_in_order() {
        let provider = MockProvider::new("mock")
            .with_response("first")
            .with_response("second");
        let req = CompletionRequest::new("x");
        assert_eq!(provider.complete(&req).await.unwrap(), "first");
        assert_eq!(provider.complete(&req).await.unwrap(), "second");
        assert_eq!(provider.complete(&req).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_mock_embedding_injected_failure() {
        let embedder = MockEmbedding::new(8);
        embedder.fail_next(1);
        assert!(embedder.embed(&["a"]).await.is_err());
        assert_eq!(embedder.embed(&["a"]).await.unwrap().len(), 1);
        assert_eq!(embedder.call_count(), 2);
    }
}
