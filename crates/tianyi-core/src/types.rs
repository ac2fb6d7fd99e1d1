use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// String-keyed attributes attached to records, entities and relations.
pub type Attributes = BTreeMap<String, String>;

/// Unique identifier of a record within a vector collection.
pub type RecordId = String;

/// Unique identifier of a graph entity.
pub type EntityId = String;

/// A document stored in a vector collection together with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: RecordId,
    pub embedding: Vec<f32>,
    pub source_text: String,
    #[serde(default)]
    pub metadata: Attributes,
    pub created_at: DateTime<Utc>,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, embedding: Vec<f32>, source_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            embedding,
            source_text: source_text.into(),
            metadata: Attributes::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Attributes) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A typed node of the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEntity {
    pub id: EntityId,
    /// Type label, e.g. "person", "song", "concept".
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Display name. Falls back to the id when empty.
    #[serde(default)]
    pub name: String,
    /// Alternative names this entity can be found by.
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Store-assigned write sequence number. Higher means more recently written.
    #[serde(default)]
    pub revision: u64,
}

impl GraphEntity {
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            entity_type: entity_type.into(),
            aliases: Vec::new(),
            attributes: Attributes::new(),
            updated_at: Utc::now(),
            revision: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }

    /// The `summary` attribute, if present.
    pub fn summary(&self) -> Option<&str> {
        self.attributes.get("summary").map(|s| s.as_str())
    }
}

/// A typed, directed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRelation {
    pub id: String,
    pub from: EntityId,
    pub to: EntityId,
    #[serde(rename = "type")]
    pub relation_type: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub revision: u64,
}

impl GraphRelation {
    /// Create a relation whose id is derived from its endpoints and type, so
    /// re-inserting the same fact overwrites instead of duplicating it.
    pub fn new(
        from: impl Into<String>,
        relation_type: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        let from = from.into();
        let to = to.into();
        let relation_type = relation_type.into();
        Self {
            id: Self::default_id(&from, &relation_type, &to),
            from,
            to,
            relation_type,
            attributes: Attributes::new(),
            revision: 0,
        }
    }

    pub fn default_id(from: &str, relation_type: &str, to: &str) -> String {
        format!("{from}-[{relation_type}]->{to}")
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// The endpoint on the other side of `entity_id`, if the relation touches it.
    pub fn other_end(&self, entity_id: &str) -> Option<&str> {
        if self.from == entity_id {
            Some(&self.to)
        } else if self.to == entity_id {
            Some(&self.from)
        } else {
            None
        }
    }
}
