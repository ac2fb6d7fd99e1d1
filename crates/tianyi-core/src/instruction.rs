use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::TianyiError;
use crate::types::{Attributes, GraphEntity, GraphRelation, RecordId};

/// A write derived from dialogue content by the extraction layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum Instruction {
    /// Store (or overwrite, when `id` is set) a text in the vector collection.
    Vector(VectorWrite),
    Entity(GraphEntity),
    Relation(GraphRelation),
}

/// Payload of a vector write. The embedding is computed at dispatch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorWrite {
    #[serde(default)]
    pub id: Option<RecordId>,
    pub text: String,
    #[serde(default)]
    pub metadata: Attributes,
    /// Only overwrite: the write fails with `NotFound` unless a record with
    /// `id` already exists.
    #[serde(default)]
    pub must_exist: bool,
}

impl VectorWrite {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            metadata: Attributes::new(),
            must_exist: false,
        }
    }

    /// Replace the text of the existing record `id`.
    pub fn update(id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut write = Self::new(text).with_id(id);
        write.must_exist = true;
        write
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Discriminant of an [`Instruction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstructionKind {
    Vector,
    Entity,
    Relation,
}

impl std::fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            InstructionKind::Vector => "vector",
            InstructionKind::Entity => "entity",
            InstructionKind::Relation => "relation",
        })
    }
}

impl Instruction {
    pub fn kind(&self) -> InstructionKind {
        match self {
            Instruction::Vector(_) => InstructionKind::Vector,
            Instruction::Entity(_) => InstructionKind::Entity,
            Instruction::Relation(_) => InstructionKind::Relation,
        }
    }

    pub fn vector(text: impl Into<String>) -> Self {
        Instruction::Vector(VectorWrite::new(text))
    }
}

/// What a `remember` call managed to persist.
///
/// Buffering always happens, so the outcome only describes long-term writes
/// plus the side channels that may degrade without failing the call.
#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub succeeded: BTreeSet<InstructionKind>,
    pub failed: BTreeMap<InstructionKind, Vec<TianyiError>>,
    /// Number of instructions that were written successfully.
    pub written: usize,
    /// The extraction layer failed; no instructions were dispatched.
    pub extraction_error: Option<TianyiError>,
    /// Folding an evicted turn into the running summary failed.
    pub summary_error: Option<TianyiError>,
}

impl WriteOutcome {
    pub fn record_success(&mut self, kind: InstructionKind) {
        self.succeeded.insert(kind);
        self.written += 1;
    }

    pub fn record_failure(&mut self, kind: InstructionKind, error: TianyiError) {
        self.failed.entry(kind).or_default().push(error);
    }

    pub fn failure_count(&self) -> usize {
        self.failed.values().map(|v| v.len()).sum()
    }

    /// True when every dispatched instruction was written.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.extraction_error.is_none()
    }
}
