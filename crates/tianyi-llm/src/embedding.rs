use async_trait::async_trait;
use tianyi_core::{Result, TianyiError};
use tracing::debug;

/// Trait for generating text embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a batch of texts, one vector per input, in order.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// The dimensionality of the output embeddings.
    fn dimensions(&self) -> usize;

    /// Provider name.
    fn name(&self) -> &str;
}

fn unavailable(msg: impl Into<String>) -> TianyiError {
    TianyiError::EmbeddingUnavailable(msg.into())
}

/// A provider that silently drops inputs would misalign ids and vectors.
pub(crate) fn check_count(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(unavailable(format!(
            "provider returned {} embeddings for {} inputs",
            got, expected
        )));
    }
    Ok(())
}

/// OpenAI-compatible embeddings endpoint (SiliconFlow, OpenAI, vLLM, ...).
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedding {
    /// Create a provider for BAAI/bge-m3 on SiliconFlow (1024 dims).
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.siliconflow.cn/v1".into(),
            model: "BAAI/bge-m3".into(),
            dims: 1024,
        }
    }

    /// Use a specific model and its output size.
    pub fn with_model(mut self, model: String, dims: usize) -> Self {
        self.model = model;
        self.dims = dims;
        self
    }

    /// Use a custom base URL (e.g. api.openai.com/v1).
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!(model = %self.model, count = texts.len(), "generating embeddings");

        let body = serde_json::json!({
            "model": &self.model,
            "input": texts,
            "encoding_format": "float",
        });

        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| unavailable(format!("embedding request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(unavailable(format!("embedding HTTP {}: {}", status, text)));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| unavailable(format!("embedding parse error: {}", e)))?;

        let mut items: Vec<(usize, Vec<f32>)> = data["data"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .enumerate()
                    .filter_map(|(pos, item)| {
                        let index = item["index"].as_u64().map(|i| i as usize).unwrap_or(pos);
                        item["embedding"].as_array().map(|arr| {
                            let v = arr
                                .iter()
                                .filter_map(|v| v.as_f64().map(|f| f as f32))
                                .collect();
                            (index, v)
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        // The API does not promise response order; `index` does.
        items.sort_by_key(|(i, _)| *i);
        let embeddings: Vec<Vec<f32>> = items.into_iter().map(|(_, v)| v).collect();
        check_count(texts.len(), embeddings.len())?;
        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Ollama embeddings provider (uses /api/embeddings endpoint).
pub struct OllamaEmbedding {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedding {
    pub fn new(model: &str, dims: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "http://127.0.0.1:11434".into(),
            model: model.to_string(),
            dims,
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());

        // One text per call.
        for text in texts {
            let body = serde_json::json!({
                "model": &self.model,
                "prompt": text,
            });

            let resp = self
                .client
                .post(format!("{}/api/embeddings", self.base_url))
                .json(&body)
                .send()
                .await
                .map_err(|e| unavailable(format!("ollama embedding: {}", e)))?;

            if !resp.status().is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(unavailable(format!("ollama embedding error: {}", text)));
            }

            let data: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| unavailable(e.to_string()))?;

            let embedding: Vec<f32> = data["embedding"]
                .as_array()
                .map(|arr| arr.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect())
                .unwrap_or_default();

            if embedding.is_empty() {
                return Err(unavailable("ollama returned an empty embedding"));
            }
            results.push(embedding);
        }

        Ok(results)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Offline embedder: character bigrams hashed into a fixed number of buckets.
///
/// Deterministic across runs and platforms, so identical texts always map to
/// identical unit vectors and texts sharing many bigrams land close together.
/// Good enough for local use without a network and for tests.
pub struct HashEmbedding {
    dims: usize,
}

impl HashEmbedding {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let chars: Vec<char> = text.trim().to_lowercase().chars().collect();
        match chars.len() {
            0 => {}
            1 => v[bucket(&chars, self.dims)] += 1.0,
            _ => {
                for pair in chars.windows(2) {
                    v[bucket(pair, self.dims)] += 1.0;
                }
            }
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

// FNV-1a; std's hasher is not guaranteed stable across releases.
fn bucket(chars: &[char], dims: usize) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for c in chars {
        let mut buf = [0u8; 4];
        for b in c.encode_utf8(&mut buf).bytes() {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    (hash % dims as u64) as usize
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "hash"
    }
}
