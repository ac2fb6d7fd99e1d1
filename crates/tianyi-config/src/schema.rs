use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration, maps to `tianyi.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TianyiConfig {
    pub memory: MemoryConfig,
    pub logging: LoggingConfig,
}

// ── Memory ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub vector: VectorConfig,
    pub embedding: EmbeddingConfig,
    pub graph: GraphConfig,
    pub buffer: BufferConfig,
    pub recall: RecallConfig,
    pub extraction: ExtractionConfig,
    pub io: IoConfig,
}

// ── Vector store ───────────────────────────────────────────────

pub const VECTOR_BACKENDS: &[&str] = &["sqlite", "memory"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Backend: "sqlite" (persistent) or "memory" (process lifetime only).
    pub backend: String,
    /// Directory holding the vector database file.
    pub persist_dir: PathBuf,
    /// Collection name. Reopened, never recreated, when it already exists.
    pub collection: String,
    /// Maximum vector hits per recall.
    pub top_k: usize,
    /// Minimum cosine similarity for a hit to count.
    pub similarity_threshold: f32,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".into(),
            persist_dir: PathBuf::from("data/vector_store"),
            collection: "luotianyi_memory".into(),
            top_k: 3,
            similarity_threshold: 0.5,
        }
    }
}

// ── Embedding ──────────────────────────────────────────────────

pub const EMBEDDING_PROVIDERS: &[&str] = &["openai", "ollama", "hash"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "openai" (any OpenAI-compatible endpoint), "ollama", or "hash" (offline).
    pub provider: String,
    pub model: String,
    pub base_url: String,
    /// Falls back to TIANYI_EMBEDDING_API_KEY when unset.
    pub api_key: Option<String>,
    /// Output dimensionality of the model.
    pub dimensions: usize,
    /// Maximum texts per embedding request.
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "BAAI/bge-m3".into(),
            base_url: "https://api.siliconflow.cn/v1".into(),
            api_key: None,
            dimensions: 1024,
            batch_size: 16,
        }
    }
}

// ── Graph store ────────────────────────────────────────────────

pub const GRAPH_BACKENDS: &[&str] = &["sqlite", "memory"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Backend: "sqlite" (persistent) or "memory".
    pub backend: String,
    /// Store location for persistent backends.
    pub path: PathBuf,
    /// Backend-specific connection parameters.
    pub options: HashMap<String, String>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".into(),
            path: PathBuf::from("data/graph/knowledge_graph.db"),
            options: HashMap::new(),
        }
    }
}

// ── Conversation buffer ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum number of raw turns kept verbatim.
    pub window_size: usize,
    /// Fold evicted turns into a running summary.
    pub summarize: bool,
    /// Hard cap on the running summary, in characters.
    pub summary_max_chars: usize,
    /// Write the window to disk after every turn.
    pub checkpoint: bool,
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            summarize: false,
            summary_max_chars: 1000,
            checkpoint: false,
            checkpoint_path: Some(PathBuf::from("data/conversation/window.json")),
        }
    }
}

// ── Recall ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    /// Fixed score given to graph results in the merge.
    pub graph_weight: f32,
    /// Default item budget for long-term results.
    pub max_items: usize,
    /// Default token budget. 0 means the item budget applies.
    pub max_tokens: usize,
    /// Neighbors fetched per resolved entity.
    pub max_graph_neighbors: usize,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            graph_weight: 0.6,
            max_items: 8,
            max_tokens: 0,
            max_graph_neighbors: 5,
        }
    }
}

// ── Extraction ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Also store agent turns verbatim (user turns always are).
    pub store_agent_turns: bool,
    /// Ignore turns shorter than this many characters.
    pub min_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            store_agent_turns: false,
            min_chars: 4,
        }
    }
}

// ── Network I/O ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Per-call timeout for embedding and store calls. A timeout counts as unavailable.
    pub timeout_ms: u64,
    /// Extra attempts for retryable failures (0 = no retry).
    pub retry_attempts: u32,
    pub retry_initial_delay_ms: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            retry_attempts: 2,
            retry_initial_delay_ms: 200,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "{} {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl TianyiConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();
        let m = &self.memory;

        // ── Vector store ───
        if !VECTOR_BACKENDS.contains(&m.vector.backend.as_str()) {
            warnings.push(ConfigWarning {
                field: "memory.vector.backend".into(),
                message: format!("unknown backend '{}'", m.vector.backend),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid values: {}", VECTOR_BACKENDS.join(", "))),
            });
        }
        if m.vector.collection.trim().is_empty() {
            warnings.push(ConfigWarning {
                field: "memory.vector.collection".into(),
                message: "collection name is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 'luotianyi_memory'".into()),
            });
        }
        if m.vector.top_k == 0 {
            warnings.push(ConfigWarning {
                field: "memory.vector.top_k".into(),
                message: "top_k is 0 — vector recall will never return anything".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 3".into()),
            });
        }
        if !(0.0..=1.0).contains(&m.vector.similarity_threshold) {
            warnings.push(ConfigWarning {
                field: "memory.vector.similarity_threshold".into(),
                message: format!("threshold {} is out of range", m.vector.similarity_threshold),
                severity: WarningSeverity::Error,
                hint: Some("Threshold must be between 0.0 and 1.0".into()),
            });
        }

        // ── Embedding ───
        if !EMBEDDING_PROVIDERS.contains(&m.embedding.provider.as_str()) {
            warnings.push(ConfigWarning {
                field: "memory.embedding.provider".into(),
                message: format!("unknown provider '{}'", m.embedding.provider),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid values: {}", EMBEDDING_PROVIDERS.join(", "))),
            });
        }
        if m.embedding.dimensions == 0 {
            warnings.push(ConfigWarning {
                field: "memory.embedding.dimensions".into(),
                message: "dimensions is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to the model's output size, e.g. 1024 for bge-m3".into()),
            });
        }
        if m.embedding.batch_size == 0 {
            warnings.push(ConfigWarning {
                field: "memory.embedding.batch_size".into(),
                message: "batch_size is 0 — nothing could ever be embedded".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 16".into()),
            });
        }
        if m.embedding.provider == "openai" && m.embedding.api_key.is_none() {
            warnings.push(ConfigWarning {
                field: "memory.embedding.api_key".into(),
                message: "no API key for the remote embedding provider".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set memory.embedding.api_key or TIANYI_EMBEDDING_API_KEY".into()),
            });
        }

        // ── Graph store ───
        if !GRAPH_BACKENDS.contains(&m.graph.backend.as_str()) {
            warnings.push(ConfigWarning {
                field: "memory.graph.backend".into(),
                message: format!("unknown backend '{}'", m.graph.backend),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid values: {}", GRAPH_BACKENDS.join(", "))),
            });
        }

        // ── Buffer ───
        if m.buffer.window_size == 0 {
            warnings.push(ConfigWarning {
                field: "memory.buffer.window_size".into(),
                message: "window_size is 0 — no conversation context would be kept".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 20".into()),
            });
        }
        if m.buffer.summarize && m.buffer.summary_max_chars < 100 {
            warnings.push(ConfigWarning {
                field: "memory.buffer.summary_max_chars".into(),
                message: format!(
                    "summary capped at {} chars — most of it will be cut",
                    m.buffer.summary_max_chars
                ),
                severity: WarningSeverity::Warning,
                hint: Some("Use at least a few hundred characters".into()),
            });
        }
        if m.buffer.checkpoint && m.buffer.checkpoint_path.is_none() {
            warnings.push(ConfigWarning {
                field: "memory.buffer.checkpoint_path".into(),
                message: "checkpoint enabled without a path — window will not be saved".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set e.g. checkpoint_path = \"data/conversation/window.json\"".into()),
            });
        }

        // ── Recall ───
        if !(0.0..=1.0).contains(&m.recall.graph_weight) {
            warnings.push(ConfigWarning {
                field: "memory.recall.graph_weight".into(),
                message: format!("graph_weight {} is out of range", m.recall.graph_weight),
                severity: WarningSeverity::Error,
                hint: Some("Weight must be between 0.0 and 1.0".into()),
            });
        }
        if m.recall.max_items == 0 && m.recall.max_tokens == 0 {
            warnings.push(ConfigWarning {
                field: "memory.recall.max_items".into(),
                message: "default budget is empty — recall will return buffer only".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        // Check for hard errors
        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
