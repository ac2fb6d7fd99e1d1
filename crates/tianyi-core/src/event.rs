use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One dialogue turn handed to the memory subsystem.
///
/// Events are immutable once created; stores that accept one keep their own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Free-form tags (channel, emotion, used record ids, etc.)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "agent" | "assistant" => Ok(Role::Agent),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

impl MemoryEvent {
    /// Create an event stamped with the current time.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(Role::Agent, text)
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Render as a single transcript line, e.g. `user: 你好`.
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", self.role, self.text)
    }

    /// Estimate token count for this event.
    /// Uses the ~4 bytes per token heuristic, minimum 1.
    pub fn estimate_tokens(&self) -> usize {
        estimate_tokens(&self.text)
    }
}

/// Rough token estimate for arbitrary text (~4 bytes per token, minimum 1).
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}
