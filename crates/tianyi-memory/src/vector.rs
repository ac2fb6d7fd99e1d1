use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OptionalExtension};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use tianyi_core::{Attributes, RecordId, Result, TianyiError, VectorRecord, VectorWrite};
use tianyi_llm::EmbeddingProvider;

use crate::retry::IoPolicy;

/// File name of the vector database inside the persistence directory.
pub const DB_FILE: &str = "vectors.db";

/// Storage backend for one vector collection.
///
/// The first record written establishes the collection's dimensionality;
/// every later write or query must match it.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Name of the collection this index serves.
    fn collection(&self) -> &str;

    /// Established dimensionality, or `None` while the collection is empty and new.
    async fn dimension(&self) -> Result<Option<usize>>;

    /// Insert or replace a record by id. `created_at` of an existing record is kept.
    async fn upsert(&self, record: &VectorRecord) -> Result<()>;

    /// Records with similarity >= `threshold`, best first, at most `top_k`.
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<(VectorRecord, f32)>>;

    /// Fetch records by id, in the order given. Missing ids are skipped.
    async fn get(&self, ids: &[RecordId]) -> Result<Vec<VectorRecord>>;

    /// Delete records by id, returning how many existed.
    async fn delete(&self, ids: &[RecordId]) -> Result<usize>;

    async fn count(&self) -> Result<usize>;
}

/// Compute cosine similarity between two vectors, clamped to [0, 1].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Threshold, order (score desc, id asc) and truncate scored records.
fn rank(mut hits: Vec<(VectorRecord, f32)>, top_k: usize, threshold: f32) -> Vec<(VectorRecord, f32)> {
    hits.retain(|(_, score)| *score >= threshold);
    hits.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.id.cmp(&b.0.id))
    });
    hits.truncate(top_k);
    hits
}

fn check_dimension(established: Option<usize>, actual: usize) -> Result<()> {
    match established {
        Some(expected) if expected != actual => {
            Err(TianyiError::DimensionMismatch { expected, actual })
        }
        _ if actual == 0 => Err(TianyiError::DimensionMismatch {
            expected: established.unwrap_or_default(),
            actual,
        }),
        _ => Ok(()),
    }
}

// ── SQLite backend ─────────────────────────────────────────────

/// Persistent vector collection in SQLite. Search is exact cosine over the collection.
pub struct SqliteVectorIndex {
    db: Arc<Mutex<Connection>>,
    collection: String,
}

impl SqliteVectorIndex {
    /// Open (or create) `collection` inside `dir`. An existing collection is
    /// reopened with its established dimension.
    pub fn open(dir: &Path, collection: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Self::open_file(&dir.join(DB_FILE), collection)
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory(collection: &str) -> Result<Self> {
        Self::open_file(Path::new(":memory:"), collection)
    }

    fn open_file(path: &Path, collection: &str) -> Result<Self> {
        info!(?path, collection, "opening vector store");

        let conn = Connection::open(path).map_err(TianyiError::store)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(TianyiError::store)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dimension INTEGER,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL REFERENCES collections(name),
                id TEXT NOT NULL,
                source_text TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );
            ",
        )
        .map_err(TianyiError::store)?;

        conn.execute(
            "INSERT OR IGNORE INTO collections (name, dimension, created_at) VALUES (?1, NULL, ?2)",
            rusqlite::params![collection, Utc::now().to_rfc3339()],
        )
        .map_err(TianyiError::store)?;

        let index = Self {
            db: Arc::new(Mutex::new(conn)),
            collection: collection.to_string(),
        };
        {
            let db = index.db.lock();
            let dimension = index.load_dimension(&db)?;
            let count: i64 = db
                .query_row(
                    "SELECT COUNT(*) FROM records WHERE collection = ?1",
                    rusqlite::params![collection],
                    |row| row.get(0),
                )
                .map_err(TianyiError::store)?;
            info!(collection, ?dimension, count, "vector collection ready");
        }
        Ok(index)
    }

    fn load_dimension(&self, db: &Connection) -> Result<Option<usize>> {
        let dim: Option<Option<i64>> = db
            .query_row(
                "SELECT dimension FROM collections WHERE name = ?1",
                rusqlite::params![self.collection],
                |row| row.get(0),
            )
            .optional()
            .map_err(TianyiError::store)?;
        Ok(dim.flatten().map(|d| d as usize))
    }

    fn row_to_record(
        id: String,
        source_text: String,
        metadata: String,
        blob: Vec<u8>,
        created_at: String,
    ) -> Option<VectorRecord> {
        // Deserialize embedding from LE f32 bytes
        if blob.len() % 4 != 0 {
            return None;
        }
        let embedding = blob
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        let metadata: Attributes = serde_json::from_str(&metadata).unwrap_or_default();
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Some(VectorRecord {
            id,
            embedding,
            source_text,
            metadata,
            created_at,
        })
    }

    fn load_records(&self, db: &Connection, ids: Option<&[RecordId]>) -> Result<Vec<VectorRecord>> {
        type Row = (String, String, String, Vec<u8>, String);
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Row> {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
        };
        let rows: Vec<Row> = match ids {
            None => {
                let mut stmt = db
                    .prepare(
                        "SELECT id, source_text, metadata, embedding, created_at
                         FROM records WHERE collection = ?1",
                    )
                    .map_err(TianyiError::store)?;
                let rows = stmt
                    .query_map(rusqlite::params![self.collection], map_row)
                    .map_err(TianyiError::store)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(TianyiError::store)?;
                rows
            }
            Some(ids) => {
                let mut stmt = db
                    .prepare(
                        "SELECT id, source_text, metadata, embedding, created_at
                         FROM records WHERE collection = ?1 AND id = ?2",
                    )
                    .map_err(TianyiError::store)?;
                let mut rows = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(row) = stmt
                        .query_row(rusqlite::params![self.collection, id], map_row)
                        .optional()
                        .map_err(TianyiError::store)?
                    {
                        rows.push(row);
                    }
                }
                rows
            }
        };
        Ok(rows
            .into_iter()
            .filter_map(|(id, text, meta, blob, created)| Self::row_to_record(id, text, meta, blob, created))
            .collect())
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn dimension(&self) -> Result<Option<usize>> {
        let db = self.db.lock();
        self.load_dimension(&db)
    }

    async fn upsert(&self, record: &VectorRecord) -> Result<()> {
        let db = self.db.lock();
        let established = self.load_dimension(&db)?;
        check_dimension(established, record.embedding.len())?;
        if established.is_none() {
            db.execute(
                "UPDATE collections SET dimension = ?2 WHERE name = ?1",
                rusqlite::params![self.collection, record.embedding.len() as i64],
            )
            .map_err(TianyiError::store)?;
            info!(collection = %self.collection, dims = record.embedding.len(), "established collection dimension");
        }

        let blob: Vec<u8> = record.embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
        let metadata = serde_json::to_string(&record.metadata)?;
        let now = Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO records (collection, id, source_text, metadata, embedding, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(collection, id) DO UPDATE SET source_text = excluded.source_text,
                 metadata = excluded.metadata, embedding = excluded.embedding, updated_at = excluded.updated_at",
            rusqlite::params![
                self.collection,
                record.id,
                record.source_text,
                metadata,
                blob,
                record.created_at.to_rfc3339(),
                now,
            ],
        )
        .map_err(TianyiError::store)?;
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<(VectorRecord, f32)>> {
        let db = self.db.lock();
        let Some(dimension) = self.load_dimension(&db)? else {
            return Ok(vec![]);
        };
        check_dimension(Some(dimension), embedding.len())?;
        let hits = self
            .load_records(&db, None)?
            .into_iter()
            .map(|r| {
                let score = cosine_similarity(embedding, &r.embedding);
                (r, score)
            })
            .collect();
        Ok(rank(hits, top_k, threshold))
    }

    async fn get(&self, ids: &[RecordId]) -> Result<Vec<VectorRecord>> {
        let db = self.db.lock();
        self.load_records(&db, Some(ids))
    }

    async fn delete(&self, ids: &[RecordId]) -> Result<usize> {
        let db = self.db.lock();
        let mut removed = 0;
        for id in ids {
            removed += db
                .execute(
                    "DELETE FROM records WHERE collection = ?1 AND id = ?2",
                    rusqlite::params![self.collection, id],
                )
                .map_err(TianyiError::store)?;
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<usize> {
        let db = self.db.lock();
        let count: i64 = db
            .query_row(
                "SELECT COUNT(*) FROM records WHERE collection = ?1",
                rusqlite::params![self.collection],
                |row| row.get(0),
            )
            .map_err(TianyiError::store)?;
        Ok(count as usize)
    }
}

// ── In-memory backend ──────────────────────────────────────────

#[derive(Default)]
struct Collection {
    dimension: Option<usize>,
    records: BTreeMap<RecordId, VectorRecord>,
}

/// Vector collection held in RAM for the lifetime of the process.
pub struct InMemoryVectorIndex {
    collection: String,
    state: RwLock<Collection>,
}

impl InMemoryVectorIndex {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            state: RwLock::new(Collection::default()),
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn dimension(&self) -> Result<Option<usize>> {
        Ok(self.state.read().dimension)
    }

    async fn upsert(&self, record: &VectorRecord) -> Result<()> {
        let mut state = self.state.write();
        check_dimension(state.dimension, record.embedding.len())?;
        state.dimension.get_or_insert(record.embedding.len());
        let mut record = record.clone();
        if let Some(existing) = state.records.get(&record.id) {
            record.created_at = existing.created_at;
        }
        state.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<(VectorRecord, f32)>> {
        let state = self.state.read();
        if state.dimension.is_none() {
            return Ok(vec![]);
        }
        check_dimension(state.dimension, embedding.len())?;
        let hits = state
            .records
            .values()
            .map(|r| (r.clone(), cosine_similarity(embedding, &r.embedding)))
            .collect();
        Ok(rank(hits, top_k, threshold))
    }

    async fn get(&self, ids: &[RecordId]) -> Result<Vec<VectorRecord>> {
        let state = self.state.read();
        Ok(ids.iter().filter_map(|id| state.records.get(id).cloned()).collect())
    }

    async fn delete(&self, ids: &[RecordId]) -> Result<usize> {
        let mut state = self.state.write();
        Ok(ids.iter().filter(|id| state.records.remove(*id).is_some()).count())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.state.read().records.len())
    }
}

// ── Adapter ────────────────────────────────────────────────────

/// Vector Store adapter: an index plus the embedding provider that feeds it.
///
/// Every call into the provider or the index runs under the I/O policy, so a
/// hung backend surfaces as `StoreUnavailable` / `EmbeddingUnavailable`.
pub struct VectorStore {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    policy: IoPolicy,
}

impl VectorStore {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            index,
            embedder,
            batch_size: 16,
            policy: IoPolicy::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_policy(mut self, policy: IoPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn collection(&self) -> &str {
        self.index.collection()
    }

    /// Output size of the embedding provider.
    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    /// Startup check: the provider must produce vectors of the size the
    /// collection was created with.
    pub async fn validate_dimension(&self) -> Result<()> {
        let established = self
            .policy
            .run("vector dimension", TianyiError::StoreUnavailable, || self.index.dimension())
            .await?;
        match established {
            Some(expected) if expected != self.embedder.dimensions() => {
                Err(TianyiError::DimensionMismatch {
                    expected,
                    actual: self.embedder.dimensions(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Embed texts in `batch_size` chunks, one vector per text.
    pub async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch(chunk).await?);
        }
        Ok(out)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let vectors = self
            .policy
            .run("embedding", TianyiError::EmbeddingUnavailable, || self.embedder.embed(texts))
            .await?;
        if vectors.len() != texts.len() {
            return Err(TianyiError::EmbeddingUnavailable(format!(
                "{} returned {} embeddings for {} inputs",
                self.embedder.name(),
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    /// Write an already-embedded record.
    pub async fn upsert(&self, record: VectorRecord) -> Result<()> {
        self.policy
            .run("vector upsert", TianyiError::StoreUnavailable, || self.index.upsert(&record))
            .await?;
        debug!(collection = %self.collection(), id = %record.id, "vector record upserted");
        Ok(())
    }

    /// Embed and write each text. Results line up with `writes`: a failed
    /// embedding batch fails every write in it, a failed upsert only its own.
    /// Updates of records that do not exist fail with `NotFound` before
    /// anything is embedded.
    pub async fn write_all(&self, writes: &[VectorWrite]) -> Vec<Result<RecordId>> {
        let mut results: Vec<Option<Result<RecordId>>> = writes.iter().map(|_| None).collect();
        self.reject_missing_updates(writes, &mut results).await;

        let pending: Vec<usize> = (0..writes.len()).filter(|&i| results[i].is_none()).collect();
        for chunk in pending.chunks(self.batch_size) {
            let texts: Vec<&str> = chunk.iter().map(|&i| writes[i].text.as_str()).collect();
            match self.embed_batch(&texts).await {
                Ok(vectors) => {
                    for (&i, embedding) in chunk.iter().zip(vectors) {
                        let write = &writes[i];
                        let id = write
                            .id
                            .clone()
                            .unwrap_or_else(|| Uuid::new_v4().to_string());
                        let record = VectorRecord::new(id.clone(), embedding, write.text.clone())
                            .with_metadata(write.metadata.clone());
                        results[i] = Some(self.upsert(record).await.map(|_| id));
                    }
                }
                Err(e) => {
                    for &i in chunk {
                        results[i] = Some(Err(e.duplicate()));
                    }
                }
            }
        }
        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(TianyiError::NotFound("vector write result".into()))))
            .collect()
    }

    async fn reject_missing_updates(
        &self,
        writes: &[VectorWrite],
        results: &mut [Option<Result<RecordId>>],
    ) {
        let updates: Vec<RecordId> = writes
            .iter()
            .filter(|w| w.must_exist)
            .map(|w| w.id.clone().unwrap_or_default())
            .collect();
        if updates.is_empty() {
            return;
        }
        let existing: Result<HashSet<RecordId>> = self
            .get(&updates)
            .await
            .map(|records| records.into_iter().map(|r| r.id).collect());
        for (write, slot) in writes.iter().zip(results.iter_mut()) {
            if !write.must_exist {
                continue;
            }
            let id = write.id.clone().unwrap_or_default();
            match &existing {
                Ok(found) if found.contains(&id) => {}
                Ok(_) => {
                    *slot = Some(Err(TianyiError::NotFound(format!("vector record '{}'", id))));
                }
                Err(e) => *slot = Some(Err(e.duplicate())),
            }
        }
    }

    /// Embed and write texts, returning the ids in order. Fails on the first error.
    pub async fn add_texts(&self, writes: &[VectorWrite]) -> Result<Vec<RecordId>> {
        self.write_all(writes).await.into_iter().collect()
    }

    /// Embed `text` and return matching records, best first.
    ///
    /// An embedding failure aborts the query; nothing partial is returned.
    pub async fn query(
        &self,
        text: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<(VectorRecord, f32)>> {
        if top_k == 0 {
            return Ok(vec![]);
        }
        let embedding = self
            .embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        self.policy
            .run("vector search", TianyiError::StoreUnavailable, || {
                self.index.search(&embedding, top_k, threshold)
            })
            .await
    }

    pub async fn get(&self, ids: &[RecordId]) -> Result<Vec<VectorRecord>> {
        self.policy
            .run("vector get", TianyiError::StoreUnavailable, || self.index.get(ids))
            .await
    }

    pub async fn delete(&self, ids: &[RecordId]) -> Result<usize> {
        let removed = self
            .policy
            .run("vector delete", TianyiError::StoreUnavailable, || self.index.delete(ids))
            .await?;
        info!(collection = %self.collection(), removed, "deleted vector records");
        Ok(removed)
    }

    pub async fn count(&self) -> Result<usize> {
        self.policy
            .run("vector count", TianyiError::StoreUnavailable, || self.index.count())
            .await
    }
}
