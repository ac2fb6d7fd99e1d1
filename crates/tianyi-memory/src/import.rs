//! Bulk import of knowledge graph JSON files.
//!
//! Graph file layout:
//!
//! ```json
//! {
//!   "entities":  [{"id": "洛天依", "name": "洛天依", "type": "person", "properties": {"summary": "..."}}],
//!   "relations": [{"id": "r1", "source": "洛天依", "target": "VOCALOID", "type": "type", "properties": {}}]
//! }
//! ```
//!
//! Alias files are a flat `{"alias": "entity id"}` object.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use tianyi_core::{Attributes, GraphEntity, GraphRelation, Result, TianyiError};

use crate::graph::GraphStore;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
    #[serde(default)]
    pub relations: Vec<RelationRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub relation_type: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub weight: Option<f64>,
}

/// What an import wrote and what it had to skip.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub entities: usize,
    pub relations: usize,
    pub aliases: usize,
    /// Items that could not be written, with the reason.
    pub skipped: Vec<String>,
}

fn to_attributes(properties: &serde_json::Map<String, serde_json::Value>) -> Attributes {
    properties
        .iter()
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

impl GraphDocument {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Read an alias map file. A missing file is an empty map.
pub fn load_aliases(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Write a document and an alias map into `store`.
///
/// Entities go first so relations inside the same document can reference
/// them. Dangling relations and aliases of unknown entities are skipped and
/// reported; store outages abort the import.
pub async fn import_graph(
    store: &dyn GraphStore,
    document: &GraphDocument,
    aliases: &BTreeMap<String, String>,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    for record in &document.entities {
        let mut entity = GraphEntity::new(record.id.clone(), record.entity_type.clone());
        if let Some(name) = record.name.as_ref().filter(|n| !n.trim().is_empty()) {
            entity.name = name.clone();
        }
        entity.attributes = to_attributes(&record.properties);
        store.upsert_entity(entity).await?;
        report.entities += 1;
    }

    for record in &document.relations {
        let mut relation = GraphRelation::new(
            record.source.clone(),
            record.relation_type.clone(),
            record.target.clone(),
        );
        if let Some(id) = &record.id {
            relation.id = id.clone();
        }
        relation.attributes = to_attributes(&record.properties);
        if let Some(weight) = record.weight {
            relation.attributes.insert("weight".into(), weight.to_string());
        }
        match store.upsert_relation(relation).await {
            Ok(_) => report.relations += 1,
            Err(e @ TianyiError::DanglingReference { .. }) => {
                warn!(error = %e, "skipping relation");
                report.skipped.push(e.to_string());
            }
            Err(e) => return Err(e),
        }
    }

    for (alias, entity_id) in aliases {
        match store.add_alias(entity_id, alias).await {
            Ok(()) => report.aliases += 1,
            Err(TianyiError::NotFound(_)) => {
                warn!(alias = %alias, entity = %entity_id, "alias points at unknown entity");
                report
                    .skipped
                    .push(format!("alias {} -> missing entity {}", alias, entity_id));
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        entities = report.entities,
        relations = report.relations,
        aliases = report.aliases,
        skipped = report.skipped.len(),
        "graph import finished"
    );
    Ok(report)
}
