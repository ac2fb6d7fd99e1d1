use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use tianyi_config::BufferConfig;
use tianyi_core::{MemoryEvent, Result, TianyiError};
use tianyi_llm::{CompletionRequest, LlmProvider};

/// Folds an evicted turn into the running summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        old_summary: Option<&str>,
        evicted: &MemoryEvent,
        max_chars: usize,
    ) -> Result<String>;
}

/// Keep the last `max_chars` characters of `text`.
pub fn keep_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        text.to_string()
    } else {
        text.chars().skip(count - max_chars).collect()
    }
}

/// Model-free summarizer: appends the evicted turn as a transcript line and
/// keeps the most recent text that fits.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcatSummarizer;

#[async_trait]
impl Summarizer for ConcatSummarizer {
    async fn summarize(
        &self,
        old_summary: Option<&str>,
        evicted: &MemoryEvent,
        max_chars: usize,
    ) -> Result<String> {
        let line = evicted.transcript_line();
        let joined = match old_summary {
            Some(old) if !old.is_empty() => format!("{}\n{}", old, line),
            _ => line,
        };
        Ok(keep_tail(&joined, max_chars))
    }
}

const SUMMARY_SYSTEM_PROMPT: &str = "你负责维护一段对话的滚动摘要。\
只输出更新后的摘要正文，保留对用户和对话有长期价值的信息。";

/// Summarizer backed by a language model.
pub struct LlmSummarizer<P: LlmProvider> {
    provider: Arc<P>,
}

impl<P: LlmProvider> LlmSummarizer<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: LlmProvider + 'static> Summarizer for LlmSummarizer<P> {
    async fn summarize(
        &self,
        old_summary: Option<&str>,
        evicted: &MemoryEvent,
        max_chars: usize,
    ) -> Result<String> {
        let prompt = format!(
            "现有总结：{}\n移出窗口的对话：\n{}\n请在{}字以内给出更新后的总结。",
            old_summary.unwrap_or("没有更早的消息"),
            evicted.transcript_line(),
            max_chars
        );
        let request = CompletionRequest::new(prompt).with_system(SUMMARY_SYSTEM_PROMPT);
        let summary = self.provider.complete(&request).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(TianyiError::LlmProvider(format!(
                "{} returned an empty summary",
                self.provider.name()
            )));
        }
        Ok(keep_tail(summary, max_chars))
    }
}

/// What `append` did besides storing the event.
#[derive(Debug, Default)]
pub struct AppendReport {
    /// Events pushed out of the window, oldest first.
    pub evicted: Vec<MemoryEvent>,
    /// The summarizer failed; the summary was left unchanged.
    pub summary_error: Option<TianyiError>,
    /// Writing the checkpoint failed; the in-memory window is intact.
    pub checkpoint_error: Option<TianyiError>,
}

/// Serialized form of the window, also used for checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub events: Vec<MemoryEvent>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Conversation Buffer: the last N turns verbatim plus an optional running
/// summary of the turns evicted before them.
pub struct ConversationBuffer {
    window_size: usize,
    events: VecDeque<MemoryEvent>,
    summary: Option<String>,
    summarizer: Option<Arc<dyn Summarizer>>,
    summary_max_chars: usize,
    checkpoint_path: Option<PathBuf>,
}

impl ConversationBuffer {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            events: VecDeque::with_capacity(window_size + 1),
            summary: None,
            summarizer: None,
            summary_max_chars: 1000,
            checkpoint_path: None,
        }
    }

    /// Build from config. Summary mode uses [`ConcatSummarizer`], which needs
    /// no model; swap in an [`LlmSummarizer`] with
    /// [`set_summarizer`](Self::set_summarizer). A configured checkpoint is
    /// restored before returning.
    pub fn from_config(config: &BufferConfig) -> Result<Self> {
        let mut buffer = Self::new(config.window_size);
        if config.summarize {
            buffer = buffer.with_summarizer(Arc::new(ConcatSummarizer), config.summary_max_chars);
        }
        if config.checkpoint {
            let path = config.checkpoint_path.clone().ok_or_else(|| {
                TianyiError::Config("buffer.checkpoint is on but checkpoint_path is unset".into())
            })?;
            buffer = buffer.with_checkpoint(path);
            buffer.restore()?;
        }
        Ok(buffer)
    }

    /// Enable summary mode.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>, max_chars: usize) -> Self {
        self.summarizer = Some(summarizer);
        self.summary_max_chars = max_chars.max(1);
        self
    }

    /// Swap the summarizer, keeping the current cap. Turns summary mode on.
    pub fn set_summarizer(&mut self, summarizer: Arc<dyn Summarizer>) {
        self.summarizer = Some(summarizer);
    }

    /// Write the window to `path` after every change.
    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn events(&self) -> impl Iterator<Item = &MemoryEvent> {
        self.events.iter()
    }

    /// The last `n` events, oldest first.
    pub fn recent(&self, n: usize) -> Vec<MemoryEvent> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip).cloned().collect()
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            events: self.events.iter().cloned().collect(),
            summary: self.summary.clone(),
        }
    }

    /// Add a turn, evicting the oldest ones past the window size.
    ///
    /// Never fails: a summarizer error still evicts the event (the summary
    /// stays as it was) and is reported in the returned [`AppendReport`].
    pub async fn append(&mut self, event: MemoryEvent) -> AppendReport {
        self.events.push_back(event);
        let mut report = AppendReport::default();

        while self.events.len() > self.window_size {
            // The event stays in the window until the summarizer has answered.
            let folded = match (&self.summarizer, self.events.front()) {
                (Some(summarizer), Some(oldest)) => Some(
                    summarizer
                        .summarize(self.summary.as_deref(), oldest, self.summary_max_chars)
                        .await,
                ),
                _ => None,
            };
            match folded {
                Some(Ok(summary)) => {
                    self.summary = Some(keep_tail(&summary, self.summary_max_chars));
                }
                Some(Err(e)) => {
                    warn!(error = %e, "summarizer failed, evicting turn without folding it");
                    report.summary_error = Some(e);
                }
                None => {}
            }
            if let Some(evicted) = self.events.pop_front() {
                debug!(role = %evicted.role, "evicted turn from conversation window");
                report.evicted.push(evicted);
            }
        }

        if let Err(e) = self.save_checkpoint() {
            warn!(error = %e, "failed to checkpoint conversation window");
            report.checkpoint_error = Some(e);
        }
        report
    }

    /// Reset events and summary.
    pub fn clear(&mut self) -> Result<()> {
        self.events.clear();
        self.summary = None;
        self.save_checkpoint()
    }

    /// Write the checkpoint file, if one is configured. Temp file + rename,
    /// so a crash never leaves a half-written window behind.
    pub fn save_checkpoint(&self) -> Result<()> {
        let Some(path) = &self.checkpoint_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&self.snapshot())?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load the checkpoint, if one is configured and exists. Returns the
    /// number of events restored; older events beyond the window are dropped.
    pub fn restore(&mut self) -> Result<usize> {
        let Some(path) = self.checkpoint_path.clone() else {
            return Ok(0);
        };
        let Some(snapshot) = Self::read_snapshot(&path)? else {
            return Ok(0);
        };
        let skip = snapshot.events.len().saturating_sub(self.window_size);
        self.events = snapshot.events.into_iter().skip(skip).collect();
        self.summary = snapshot
            .summary
            .map(|s| keep_tail(&s, self.summary_max_chars));
        info!(?path, events = self.events.len(), "restored conversation window");
        Ok(self.events.len())
    }

    fn read_snapshot(path: &Path) -> Result<Option<WindowSnapshot>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }
}
