use serde::{Deserialize, Serialize};

use crate::error::TianyiError;

/// Which part of the memory produced a retrieval result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Buffer,
    Vector,
    Graph,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Provenance::Buffer => "buffer",
            Provenance::Vector => "vector",
            Provenance::Graph => "graph",
        })
    }
}

/// One piece of context handed back to the dialogue loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub text: String,
    /// Relevance in [0, 1].
    pub score: f32,
    pub provenance: Provenance,
    /// Identifier of the backing record or entity, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

impl RetrievalResult {
    pub fn new(text: impl Into<String>, score: f32, provenance: Provenance) -> Self {
        Self {
            text: text.into(),
            score: score.clamp(0.0, 1.0),
            provenance,
            source_id: None,
        }
    }

    pub fn with_source(mut self, id: impl Into<String>) -> Self {
        self.source_id = Some(id.into());
        self
    }
}

/// Upper bound on the long-term (vector + graph) part of a recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Budget {
    MaxItems(usize),
    MaxTokens(usize),
}

/// Result of a recall: buffer items first, then ranked long-term items.
#[derive(Debug, Default)]
pub struct Recall {
    pub items: Vec<RetrievalResult>,
    /// Running summary of evicted turns, if summary mode produced one.
    pub summary: Option<String>,
    /// Sources that could not contribute, and why. Recall still succeeded.
    pub degraded: Vec<(Provenance, TianyiError)>,
}

impl Recall {
    /// Items from one provenance, in order.
    pub fn from_source(&self, provenance: Provenance) -> impl Iterator<Item = &RetrievalResult> {
        self.items.iter().filter(move |r| r.provenance == provenance)
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}
