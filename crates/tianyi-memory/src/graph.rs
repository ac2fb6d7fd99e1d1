use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use tianyi_core::{Attributes, EntityId, GraphEntity, GraphRelation, Result, TianyiError};

/// One hop away from an entity: the neighbor and the edge that reaches it.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub entity: GraphEntity,
    pub relation: GraphRelation,
}

impl Neighbor {
    /// The edge points from the queried entity to this neighbor.
    pub fn is_outgoing(&self) -> bool {
        self.relation.to == self.entity.id
    }

    /// Human-readable fact, e.g. `洛天依 --[type]--> VOCALOID`.
    pub fn describe(&self, subject: &str) -> String {
        let mut text = if self.is_outgoing() {
            format!(
                "{} --[{}]--> {}",
                subject,
                self.relation.relation_type,
                self.entity.display_name()
            )
        } else {
            format!(
                "{} <--[{}]-- {}",
                subject,
                self.relation.relation_type,
                self.entity.display_name()
            )
        };
        if let Some(summary) = self.entity.summary() {
            text.push_str(": ");
            text.push_str(summary);
        }
        text
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub entities: usize,
    pub relations: usize,
    pub aliases: usize,
}

/// One edge of a path, oriented along the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub from: EntityId,
    pub to: EntityId,
    pub relation_type: String,
    /// The stored relation points the same way as the walk.
    pub forward: bool,
}

/// A simple path between two entities.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GraphPath {
    pub steps: Vec<PathStep>,
}

impl GraphPath {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Entity ids along the path, endpoints included.
    pub fn nodes(&self) -> Vec<&str> {
        let mut nodes: Vec<&str> = self.steps.iter().map(|s| s.from.as_str()).collect();
        if let Some(last) = self.steps.last() {
            nodes.push(&last.to);
        }
        nodes
    }
}

impl std::fmt::Display for GraphPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .steps
            .iter()
            .map(|s| {
                if s.forward {
                    format!("{} --[{}]--> {}", s.from, s.relation_type, s.to)
                } else {
                    format!("{} <--[{}]-- {}", s.from, s.relation_type, s.to)
                }
            })
            .collect();
        f.write_str(&parts.join(" , "))
    }
}

/// Graph Store adapter: typed entities and typed, directed relations.
///
/// The graph is a multigraph and may contain cycles. Writes are upserts
/// (last write wins); every write takes a store-wide increasing `revision`.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert or overwrite an entity. Attributes, type and name are replaced;
    /// aliases accumulate. Returns the stored entity.
    async fn upsert_entity(&self, entity: GraphEntity) -> Result<GraphEntity>;

    /// Insert or overwrite a relation by id. Fails with `DanglingReference`
    /// when either endpoint does not exist, leaving the graph unchanged.
    async fn upsert_relation(&self, relation: GraphRelation) -> Result<GraphRelation>;

    async fn get_entity(&self, id: &str) -> Result<Option<GraphEntity>>;

    async fn get_relation(&self, id: &str) -> Result<Option<GraphRelation>>;

    /// Resolve a name, alias or id. Exact matches beat case-insensitive ones;
    /// among several matches of the same kind the most recently written wins.
    async fn find_entity(&self, name_or_alias: &str) -> Result<Option<GraphEntity>>;

    /// Edges touching `id` in either direction, oldest relation first.
    /// Self-loops are not neighbors.
    async fn neighbor_edges(&self, id: &str, relation_type: Option<&str>) -> Result<Vec<Neighbor>>;

    async fn add_alias(&self, id: &str, alias: &str) -> Result<()>;

    /// Delete an entity together with its aliases and every relation touching it.
    async fn delete_entity(&self, id: &str) -> Result<bool>;

    async fn delete_relation(&self, id: &str) -> Result<bool>;

    /// All names and aliases, for entity resolution.
    async fn entity_names(&self) -> Result<Vec<String>>;

    async fn stats(&self) -> Result<GraphStats>;

    /// Direct neighbors in discovery order, each entity once.
    async fn neighbors(&self, id: &str, relation_type: Option<&str>) -> Result<Vec<GraphEntity>> {
        let mut seen = HashSet::new();
        Ok(self
            .neighbor_edges(id, relation_type)
            .await?
            .into_iter()
            .filter(|n| seen.insert(n.entity.id.clone()))
            .map(|n| n.entity)
            .collect())
    }

    /// Entities adjacent to both `a` and `b`, in `a`'s discovery order.
    async fn shared_neighbors(&self, a: &str, b: &str) -> Result<Vec<GraphEntity>> {
        let of_b: HashSet<EntityId> = self
            .neighbors(b, None)
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect();
        Ok(self
            .neighbors(a, None)
            .await?
            .into_iter()
            .filter(|e| of_b.contains(&e.id))
            .collect())
    }

    /// Simple paths from `from` to `to` of at most `max_depth` edges, ignoring
    /// direction, shortest first. Stops after `max_paths` paths.
    async fn find_path(
        &self,
        from: &str,
        to: &str,
        max_depth: usize,
        max_paths: usize,
    ) -> Result<Vec<GraphPath>> {
        if max_paths == 0
            || from == to
            || self.get_entity(from).await?.is_none()
            || self.get_entity(to).await?.is_none()
        {
            return Ok(vec![]);
        }
        let mut found = Vec::new();
        let mut queue: VecDeque<(EntityId, GraphPath, HashSet<EntityId>)> = VecDeque::new();
        queue.push_back((from.to_string(), GraphPath::default(), HashSet::from([from.to_string()])));

        // Breadth-first over partial paths, so paths come out shortest first.
        while let Some((node, path, visited)) = queue.pop_front() {
            if path.len() >= max_depth {
                continue;
            }
            for n in self.neighbor_edges(&node, None).await? {
                if visited.contains(&n.entity.id) {
                    continue;
                }
                let mut next = path.clone();
                next.steps.push(PathStep {
                    from: node.clone(),
                    to: n.entity.id.clone(),
                    relation_type: n.relation.relation_type.clone(),
                    forward: n.relation.from == node,
                });
                if n.entity.id == to {
                    found.push(next);
                    if found.len() >= max_paths {
                        return Ok(found);
                    }
                    continue;
                }
                let mut seen = visited.clone();
                seen.insert(n.entity.id.clone());
                queue.push_back((n.entity.id, next, seen));
            }
        }
        Ok(found)
    }
}

pub(crate) fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Tie-break among several entities matching the same query.
fn most_recent(query: &str, mut matches: Vec<GraphEntity>) -> Option<GraphEntity> {
    if matches.len() > 1 {
        debug!(
            query,
            candidates = ?matches.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            "ambiguous entity, picking most recently updated"
        );
    }
    matches.sort_by(|a, b| b.revision.cmp(&a.revision).then_with(|| a.id.cmp(&b.id)));
    matches.into_iter().next()
}

fn merge_aliases(existing: &[String], new: &[String]) -> Vec<String> {
    let mut out: Vec<String> = existing.to_vec();
    for alias in new {
        let alias = alias.trim();
        if !alias.is_empty() && !out.iter().any(|a| a == alias) {
            out.push(alias.to_string());
        }
    }
    out
}

// ── In-memory backend ──────────────────────────────────────────

#[derive(Default)]
struct Graph {
    entities: BTreeMap<EntityId, GraphEntity>,
    relations: BTreeMap<String, GraphRelation>,
    revision: u64,
}

impl Graph {
    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

/// Graph held in RAM for the lifetime of the process.
#[derive(Default)]
pub struct InMemoryGraphStore {
    graph: RwLock<Graph>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_entity(&self, mut entity: GraphEntity) -> Result<GraphEntity> {
        let mut graph = self.graph.write();
        if entity.name.trim().is_empty() {
            entity.name = entity.id.clone();
        }
        let existing = graph
            .entities
            .get(&entity.id)
            .map(|e| e.aliases.clone())
            .unwrap_or_default();
        entity.aliases = merge_aliases(&existing, &entity.aliases);
        entity.revision = graph.next_revision();
        entity.updated_at = Utc::now();
        graph.entities.insert(entity.id.clone(), entity.clone());
        Ok(entity)
    }

    async fn upsert_relation(&self, mut relation: GraphRelation) -> Result<GraphRelation> {
        let mut graph = self.graph.write();
        for endpoint in [&relation.from, &relation.to] {
            if !graph.entities.contains_key(endpoint) {
                return Err(TianyiError::DanglingReference {
                    relation: relation.id.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
        relation.revision = graph.next_revision();
        graph.relations.insert(relation.id.clone(), relation.clone());
        Ok(relation)
    }

    async fn get_entity(&self, id: &str) -> Result<Option<GraphEntity>> {
        Ok(self.graph.read().entities.get(id).cloned())
    }

    async fn get_relation(&self, id: &str) -> Result<Option<GraphRelation>> {
        Ok(self.graph.read().relations.get(id).cloned())
    }

    async fn find_entity(&self, name_or_alias: &str) -> Result<Option<GraphEntity>> {
        let query = name_or_alias.trim();
        if query.is_empty() {
            return Ok(None);
        }
        let graph = self.graph.read();
        let exact: Vec<GraphEntity> = graph
            .entities
            .values()
            .filter(|e| e.id == query || e.name == query || e.aliases.iter().any(|a| a == query))
            .cloned()
            .collect();
        if !exact.is_empty() {
            return Ok(most_recent(query, exact));
        }
        let norm = normalize(query);
        let folded: Vec<GraphEntity> = graph
            .entities
            .values()
            .filter(|e| {
                normalize(&e.id) == norm
                    || normalize(&e.name) == norm
                    || e.aliases.iter().any(|a| normalize(a) == norm)
            })
            .cloned()
            .collect();
        Ok(most_recent(query, folded))
    }

    async fn neighbor_edges(&self, id: &str, relation_type: Option<&str>) -> Result<Vec<Neighbor>> {
        let graph = self.graph.read();
        let mut edges: Vec<&GraphRelation> = graph
            .relations
            .values()
            .filter(|r| r.from != r.to && (r.from == id || r.to == id))
            .filter(|r| relation_type.is_none_or(|t| r.relation_type == t))
            .collect();
        edges.sort_by_key(|r| r.revision);
        Ok(edges
            .into_iter()
            .filter_map(|r| {
                let other = r.other_end(id)?;
                graph.entities.get(other).map(|e| Neighbor {
                    entity: e.clone(),
                    relation: r.clone(),
                })
            })
            .collect())
    }

    async fn add_alias(&self, id: &str, alias: &str) -> Result<()> {
        let mut graph = self.graph.write();
        let revision = graph.next_revision();
        let entity = graph
            .entities
            .get_mut(id)
            .ok_or_else(|| TianyiError::NotFound(format!("entity {}", id)))?;
        entity.aliases = merge_aliases(&entity.aliases, &[alias.to_string()]);
        entity.revision = revision;
        entity.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_entity(&self, id: &str) -> Result<bool> {
        let mut graph = self.graph.write();
        if graph.entities.remove(id).is_none() {
            return Ok(false);
        }
        graph.relations.retain(|_, r| r.from != id && r.to != id);
        Ok(true)
    }

    async fn delete_relation(&self, id: &str) -> Result<bool> {
        Ok(self.graph.write().relations.remove(id).is_some())
    }

    async fn entity_names(&self) -> Result<Vec<String>> {
        let graph = self.graph.read();
        let mut names: Vec<String> = graph
            .entities
            .values()
            .flat_map(|e| std::iter::once(e.name.clone()).chain(e.aliases.iter().cloned()))
            .filter(|n| !n.trim().is_empty())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn stats(&self) -> Result<GraphStats> {
        let graph = self.graph.read();
        Ok(GraphStats {
            entities: graph.entities.len(),
            relations: graph.relations.len(),
            aliases: graph.entities.values().map(|e| e.aliases.len()).sum(),
        })
    }
}

// ── SQLite backend ─────────────────────────────────────────────

struct GraphDb {
    conn: Connection,
}

/// Take the next revision from the database's own sequence row. Must run
/// inside the write transaction so handles sharing one file never hand out
/// the same or an older number.
fn next_revision(conn: &Connection) -> Result<u64> {
    conn.query_row(
        "UPDATE graph_meta SET value = value + 1 WHERE key = 'revision' RETURNING value",
        [],
        |row| row.get::<_, i64>(0),
    )
    .map(|v| v as u64)
    .map_err(TianyiError::store)
}

fn entity_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM entities WHERE id = ?1", rusqlite::params![id], |row| row.get(0))
        .optional()
        .map_err(TianyiError::store)?;
    Ok(found.is_some())
}

impl GraphDb {
    /// Writes take the lock up front so two handles never interleave inside
    /// one read-modify-write.
    fn write_tx(&mut self) -> Result<rusqlite::Transaction<'_>> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(TianyiError::store)
    }

    fn load_entity(&self, id: &str) -> Result<Option<GraphEntity>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, entity_type, name, attributes, updated_at, revision
                 FROM entities WHERE id = ?1",
                rusqlite::params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(TianyiError::store)?;
        let Some((id, entity_type, name, attributes, updated_at, revision)) = row else {
            return Ok(None);
        };
        let aliases = self.load_aliases(&id)?;
        Ok(Some(GraphEntity {
            id,
            entity_type,
            name,
            aliases,
            attributes: serde_json::from_str::<Attributes>(&attributes).unwrap_or_default(),
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            revision: revision as u64,
        }))
    }

    fn load_aliases(&self, id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT alias FROM aliases WHERE entity_id = ?1 ORDER BY rowid")
            .map_err(TianyiError::store)?;
        let aliases = stmt
            .query_map(rusqlite::params![id], |row| row.get::<_, String>(0))
            .map_err(TianyiError::store)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(TianyiError::store)?;
        Ok(aliases)
    }

    fn load_relation(&self, id: &str) -> Result<Option<GraphRelation>> {
        self.conn
            .query_row(
                "SELECT id, source, target, relation_type, attributes, revision
                 FROM relations WHERE id = ?1",
                rusqlite::params![id],
                relation_from_row,
            )
            .optional()
            .map_err(TianyiError::store)
    }

    fn ids_matching(&self, sql: &str, key: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql).map_err(TianyiError::store)?;
        let ids = stmt
            .query_map(rusqlite::params![key], |row| row.get::<_, String>(0))
            .map_err(TianyiError::store)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(TianyiError::store)?;
        Ok(ids)
    }

    fn load_all(&self, ids: Vec<String>) -> Result<Vec<GraphEntity>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(e) = self.load_entity(&id)? {
                out.push(e);
            }
        }
        Ok(out)
    }
}

fn relation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GraphRelation> {
    let attributes: String = row.get(4)?;
    Ok(GraphRelation {
        id: row.get(0)?,
        from: row.get(1)?,
        to: row.get(2)?,
        relation_type: row.get(3)?,
        attributes: serde_json::from_str(&attributes).unwrap_or_default(),
        revision: row.get::<_, i64>(5)? as u64,
    })
}

/// Persistent graph in SQLite: `entities`, `aliases` and `relations` tables.
pub struct SqliteGraphStore {
    db: Mutex<GraphDb>,
}

impl SqliteGraphStore {
    /// Open or create the graph database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening graph store");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(TianyiError::store)?;
        Self::init(conn)
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(TianyiError::store)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(TianyiError::store)?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(TianyiError::store)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                norm_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                name TEXT NOT NULL,
                norm_name TEXT NOT NULL,
                attributes TEXT NOT NULL DEFAULT '{}',
                updated_at TEXT NOT NULL,
                revision INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS aliases (
                entity_id TEXT NOT NULL REFERENCES entities(id),
                alias TEXT NOT NULL,
                norm_alias TEXT NOT NULL,
                PRIMARY KEY (entity_id, alias)
            );

            CREATE TABLE IF NOT EXISTS relations (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL REFERENCES entities(id),
                target TEXT NOT NULL REFERENCES entities(id),
                relation_type TEXT NOT NULL,
                attributes TEXT NOT NULL DEFAULT '{}',
                revision INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name);
            CREATE INDEX IF NOT EXISTS idx_entities_norm ON entities(norm_name);
            CREATE INDEX IF NOT EXISTS idx_aliases_alias ON aliases(alias);
            CREATE INDEX IF NOT EXISTS idx_aliases_norm ON aliases(norm_alias);
            CREATE INDEX IF NOT EXISTS idx_relations_source ON relations(source);
            CREATE INDEX IF NOT EXISTS idx_relations_target ON relations(target);

            CREATE TABLE IF NOT EXISTS graph_meta (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );

            -- Files written before the sequence row existed continue from
            -- their highest stored revision.
            INSERT OR IGNORE INTO graph_meta (key, value)
            SELECT 'revision', MAX(COALESCE((SELECT MAX(revision) FROM entities), 0),
                                   COALESCE((SELECT MAX(revision) FROM relations), 0));
            ",
        )
        .map_err(TianyiError::store)?;

        let store = Self {
            db: Mutex::new(GraphDb { conn }),
        };
        {
            let db = store.db.lock();
            let stats = Self::count(&db)?;
            info!(entities = stats.entities, relations = stats.relations, "graph store ready");
        }
        Ok(store)
    }

    fn count(db: &GraphDb) -> Result<GraphStats> {
        let count = |sql: &str| -> Result<usize> {
            db.conn
                .query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
                .map_err(TianyiError::store)
        };
        Ok(GraphStats {
            entities: count("SELECT COUNT(*) FROM entities")?,
            relations: count("SELECT COUNT(*) FROM relations")?,
            aliases: count("SELECT COUNT(*) FROM aliases")?,
        })
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn upsert_entity(&self, mut entity: GraphEntity) -> Result<GraphEntity> {
        let mut db = self.db.lock();
        if entity.name.trim().is_empty() {
            entity.name = entity.id.clone();
        }
        let attributes = serde_json::to_string(&entity.attributes)?;
        let now = Utc::now().to_rfc3339();

        let tx = db.write_tx()?;
        let revision = next_revision(&tx)?;
        tx.execute(
            "INSERT INTO entities (id, norm_id, entity_type, name, norm_name, attributes, updated_at, revision)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET entity_type = excluded.entity_type, name = excluded.name,
                 norm_name = excluded.norm_name, attributes = excluded.attributes,
                 updated_at = excluded.updated_at, revision = excluded.revision",
            rusqlite::params![
                entity.id,
                normalize(&entity.id),
                entity.entity_type,
                entity.name,
                normalize(&entity.name),
                attributes,
                now,
                revision as i64,
            ],
        )
        .map_err(TianyiError::store)?;
        for alias in entity.aliases.iter().map(|a| a.trim()).filter(|a| !a.is_empty()) {
            tx.execute(
                "INSERT OR IGNORE INTO aliases (entity_id, alias, norm_alias) VALUES (?1, ?2, ?3)",
                rusqlite::params![entity.id, alias, normalize(alias)],
            )
            .map_err(TianyiError::store)?;
        }
        tx.commit().map_err(TianyiError::store)?;

        db.load_entity(&entity.id)?
            .ok_or_else(|| TianyiError::NotFound(format!("entity {}", entity.id)))
    }

    async fn upsert_relation(&self, mut relation: GraphRelation) -> Result<GraphRelation> {
        let mut db = self.db.lock();
        let attributes = serde_json::to_string(&relation.attributes)?;
        let tx = db.write_tx()?;
        for endpoint in [&relation.from, &relation.to] {
            if !entity_exists(&tx, endpoint)? {
                return Err(TianyiError::DanglingReference {
                    relation: relation.id.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
        relation.revision = next_revision(&tx)?;
        tx.execute(
            "INSERT INTO relations (id, source, target, relation_type, attributes, revision)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET source = excluded.source, target = excluded.target,
                 relation_type = excluded.relation_type, attributes = excluded.attributes,
                 revision = excluded.revision",
            rusqlite::params![
                relation.id,
                relation.from,
                relation.to,
                relation.relation_type,
                attributes,
                relation.revision as i64,
            ],
        )
        .map_err(TianyiError::store)?;
        tx.commit().map_err(TianyiError::store)?;
        Ok(relation)
    }

    async fn get_entity(&self, id: &str) -> Result<Option<GraphEntity>> {
        self.db.lock().load_entity(id)
    }

    async fn get_relation(&self, id: &str) -> Result<Option<GraphRelation>> {
        self.db.lock().load_relation(id)
    }

    async fn find_entity(&self, name_or_alias: &str) -> Result<Option<GraphEntity>> {
        let query = name_or_alias.trim();
        if query.is_empty() {
            return Ok(None);
        }
        let db = self.db.lock();
        let exact = db.ids_matching(
            "SELECT id FROM entities WHERE id = ?1 OR name = ?1
             UNION SELECT entity_id FROM aliases WHERE alias = ?1",
            query,
        )?;
        if !exact.is_empty() {
            return Ok(most_recent(query, db.load_all(exact)?));
        }
        let folded = db.ids_matching(
            "SELECT id FROM entities WHERE norm_id = ?1 OR norm_name = ?1
             UNION SELECT entity_id FROM aliases WHERE norm_alias = ?1",
            &normalize(query),
        )?;
        Ok(most_recent(query, db.load_all(folded)?))
    }

    async fn neighbor_edges(&self, id: &str, relation_type: Option<&str>) -> Result<Vec<Neighbor>> {
        let db = self.db.lock();
        let relations = {
            let mut stmt = db
                .conn
                .prepare(
                    "SELECT id, source, target, relation_type, attributes, revision FROM relations
                     WHERE (source = ?1 OR target = ?1) AND source != target
                       AND (?2 IS NULL OR relation_type = ?2)
                     ORDER BY revision",
                )
                .map_err(TianyiError::store)?;
            let rows = stmt
                .query_map(rusqlite::params![id, relation_type], relation_from_row)
                .map_err(TianyiError::store)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(TianyiError::store)?;
            rows
        };
        let mut out = Vec::with_capacity(relations.len());
        for relation in relations {
            let Some(other) = relation.other_end(id) else { continue };
            if let Some(entity) = db.load_entity(other)? {
                out.push(Neighbor { entity, relation });
            }
        }
        Ok(out)
    }

    async fn add_alias(&self, id: &str, alias: &str) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.write_tx()?;
        if !entity_exists(&tx, id)? {
            return Err(TianyiError::NotFound(format!("entity {}", id)));
        }
        let alias = alias.trim();
        if alias.is_empty() {
            return Ok(());
        }
        let revision = next_revision(&tx)?;
        tx.execute(
            "INSERT OR IGNORE INTO aliases (entity_id, alias, norm_alias) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, alias, normalize(alias)],
        )
        .map_err(TianyiError::store)?;
        tx.execute(
            "UPDATE entities SET revision = ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![id, revision as i64, Utc::now().to_rfc3339()],
        )
        .map_err(TianyiError::store)?;
        tx.commit().map_err(TianyiError::store)?;
        Ok(())
    }

    async fn delete_entity(&self, id: &str) -> Result<bool> {
        let mut db = self.db.lock();
        let tx = db.write_tx()?;
        tx.execute(
            "DELETE FROM relations WHERE source = ?1 OR target = ?1",
            rusqlite::params![id],
        )
        .map_err(TianyiError::store)?;
        tx.execute("DELETE FROM aliases WHERE entity_id = ?1", rusqlite::params![id])
            .map_err(TianyiError::store)?;
        let removed = tx
            .execute("DELETE FROM entities WHERE id = ?1", rusqlite::params![id])
            .map_err(TianyiError::store)?;
        tx.commit().map_err(TianyiError::store)?;
        Ok(removed > 0)
    }

    async fn delete_relation(&self, id: &str) -> Result<bool> {
        let db = self.db.lock();
        let removed = db
            .conn
            .execute("DELETE FROM relations WHERE id = ?1", rusqlite::params![id])
            .map_err(TianyiError::store)?;
        Ok(removed > 0)
    }

    async fn entity_names(&self) -> Result<Vec<String>> {
        let db = self.db.lock();
        let mut stmt = db
            .conn
            .prepare(
                "SELECT name FROM entities UNION SELECT alias FROM aliases ORDER BY 1",
            )
            .map_err(TianyiError::store)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(TianyiError::store)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(TianyiError::store)?;
        Ok(names.into_iter().filter(|n| !n.trim().is_empty()).collect())
    }

    async fn stats(&self) -> Result<GraphStats> {
        Self::count(&self.db.lock())
    }
}
