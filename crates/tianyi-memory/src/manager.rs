//! Memory Manager: the single read/write surface the dialogue loop talks to.
//!
//! `remember` is buffer-first. The turn always lands in the conversation
//! buffer; long-term writes are best effort and reported in a
//! [`WriteOutcome`]. `recall` always returns the buffer and degrades to it
//! when the vector or graph side is down.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use tianyi_config::{EmbeddingConfig, RecallConfig, TianyiConfig};
use tianyi_core::{
    Budget, GraphEntity, GraphRelation, Instruction, InstructionKind, MemoryEvent, Provenance,
    Recall, RecordId, Result, RetrievalResult, TianyiError, VectorRecord, VectorWrite,
    WriteOutcome, estimate_tokens,
};
use tianyi_llm::{EmbeddingProvider, HashEmbedding, OllamaEmbedding, OpenAiEmbedding};

use crate::buffer::{ConversationBuffer, Summarizer};
use crate::extraction::{Extractor, LexiconExtractor};
use crate::graph::{GraphStats, GraphStore, InMemoryGraphStore, SqliteGraphStore};
use crate::import::{GraphDocument, import_graph, load_aliases};
use crate::retry::IoPolicy;
use crate::vector::{InMemoryVectorIndex, SqliteVectorIndex, VectorIndex, VectorStore};

/// Env var consulted when `memory.embedding.api_key` is unset.
pub const EMBEDDING_API_KEY_ENV: &str = "TIANYI_EMBEDDING_API_KEY";

/// Counts across every part of the memory.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub collection: String,
    pub vector_records: usize,
    pub graph: GraphStats,
    pub buffered_turns: usize,
    pub window_size: usize,
    pub has_summary: bool,
}

pub struct MemoryManager {
    vector: Arc<VectorStore>,
    graph: Arc<dyn GraphStore>,
    extractor: Arc<dyn Extractor>,
    /// Set when the extractor resolves entities from the graph's names.
    lexicon: Option<Arc<LexiconExtractor>>,
    buffer: ConversationBuffer,
    recall_config: RecallConfig,
    top_k: usize,
    threshold: f32,
    policy: IoPolicy,
}

impl MemoryManager {
    pub fn new(
        vector: Arc<VectorStore>,
        graph: Arc<dyn GraphStore>,
        extractor: Arc<dyn Extractor>,
        buffer: ConversationBuffer,
    ) -> Self {
        Self {
            vector,
            graph,
            extractor,
            lexicon: None,
            buffer,
            recall_config: RecallConfig::default(),
            top_k: 3,
            threshold: 0.5,
            policy: IoPolicy::default(),
        }
    }

    /// Use a lexicon extractor, refreshed whenever entities are written.
    pub fn with_lexicon(mut self, lexicon: Arc<LexiconExtractor>) -> Self {
        self.extractor = lexicon.clone();
        self.lexicon = Some(lexicon);
        self
    }

    pub fn with_recall_config(mut self, config: RecallConfig) -> Self {
        self.recall_config = config;
        self
    }

    /// Vector hits per recall and the minimum similarity they need.
    pub fn with_search(mut self, top_k: usize, threshold: f32) -> Self {
        self.top_k = top_k;
        self.threshold = threshold;
        self
    }

    /// Timeout and retry policy for graph calls. The vector store carries its own.
    pub fn with_policy(mut self, policy: IoPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build every store from configuration.
    ///
    /// Fails on anything that would keep the memory from working at all:
    /// an unknown backend, a missing API key, an unopenable store, or a
    /// collection whose dimension disagrees with the embedding model.
    pub async fn from_config(config: &TianyiConfig) -> Result<Self> {
        let memory = &config.memory;
        let policy = IoPolicy::from_config(&memory.io);

        let embedder = build_embedder(&memory.embedding)?;
        let index: Arc<dyn VectorIndex> = match memory.vector.backend.as_str() {
            "sqlite" => Arc::new(SqliteVectorIndex::open(
                &memory.vector.persist_dir,
                &memory.vector.collection,
            )?),
            "memory" => Arc::new(InMemoryVectorIndex::new(&memory.vector.collection)),
            other => {
                return Err(TianyiError::Config(format!("unknown vector backend '{}'", other)));
            }
        };
        let vector = VectorStore::new(index, embedder)
            .with_batch_size(memory.embedding.batch_size)
            .with_policy(policy);
        vector.validate_dimension().await?;

        let graph: Arc<dyn GraphStore> = match memory.graph.backend.as_str() {
            "sqlite" => Arc::new(SqliteGraphStore::open(&memory.graph.path)?),
            "memory" => Arc::new(InMemoryGraphStore::new()),
            other => {
                return Err(TianyiError::Config(format!("unknown graph backend '{}'", other)));
            }
        };
        seed_graph(graph.as_ref(), config).await?;

        let lexicon = Arc::new(LexiconExtractor::new(&memory.extraction));
        lexicon.refresh(graph.as_ref()).await?;

        let buffer = ConversationBuffer::from_config(&memory.buffer)?;

        info!(
            collection = %vector.collection(),
            vector_backend = %memory.vector.backend,
            graph_backend = %memory.graph.backend,
            window = buffer.window_size(),
            "memory manager ready"
        );

        Ok(Self::new(Arc::new(vector), graph, lexicon.clone(), buffer)
            .with_lexicon(lexicon)
            .with_recall_config(memory.recall.clone())
            .with_search(memory.vector.top_k, memory.vector.similarity_threshold)
            .with_policy(policy))
    }

    /// Fold evicted turns with `summarizer`, typically an
    /// [`LlmSummarizer`](crate::LlmSummarizer) over the dialogue model.
    /// Configuration alone only selects the model-free summarizer.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.buffer.set_summarizer(summarizer);
        self
    }

    pub fn vector(&self) -> &Arc<VectorStore> {
        &self.vector
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    pub fn buffer(&self) -> &ConversationBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut ConversationBuffer {
        &mut self.buffer
    }

    // ── Write path ─────────────────────────────────────────────

    /// Record one dialogue turn. Never fails; see [`WriteOutcome`].
    pub async fn remember(&mut self, event: MemoryEvent) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();
        let context = self.buffer.recent(self.buffer.len());

        let report = self.buffer.append(event.clone()).await;
        outcome.summary_error = report.summary_error;

        let instructions = match self
            .policy
            .run("extraction", TianyiError::LlmProvider, || {
                self.extractor.extract_instructions(&event, &context)
            })
            .await
        {
            Ok(instructions) => instructions,
            Err(e) => {
                warn!(error = %e, "extraction failed, turn kept in buffer only");
                outcome.extraction_error = Some(e);
                return outcome;
            }
        };
        if instructions.is_empty() {
            debug!("nothing to persist for this turn");
            return outcome;
        }

        let mut vectors: Vec<VectorWrite> = Vec::new();
        let mut entities: Vec<GraphEntity> = Vec::new();
        let mut relations: Vec<GraphRelation> = Vec::new();
        for instruction in instructions {
            debug!(kind = %instruction.kind(), "dispatching memory instruction");
            match instruction {
                Instruction::Vector(write) => vectors.push(write),
                Instruction::Entity(entity) => entities.push(entity),
                Instruction::Relation(relation) => relations.push(relation),
            }
        }

        let vector_branch = async {
            if vectors.is_empty() {
                Vec::new()
            } else {
                self.vector.write_all(&vectors).await
            }
        };
        let (vector_results, graph_results) =
            tokio::join!(vector_branch, self.write_graph(&entities, &relations));

        for result in vector_results {
            match result {
                Ok(id) => {
                    debug!(id = %id, "vector write stored");
                    outcome.record_success(InstructionKind::Vector);
                }
                Err(e) => {
                    warn!(error = %e, "vector write failed");
                    outcome.record_failure(InstructionKind::Vector, e);
                }
            }
        }
        let mut entities_written = 0;
        for (kind, result) in graph_results {
            match result {
                Ok(()) => {
                    if kind == InstructionKind::Entity {
                        entities_written += 1;
                    }
                    outcome.record_success(kind);
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "graph write rejected");
                    outcome.record_failure(kind, e);
                }
            }
        }

        if entities_written > 0 {
            self.refresh_lexicon().await;
        }

        info!(
            written = outcome.written,
            failed = outcome.failure_count(),
            "turn remembered"
        );
        outcome
    }

    /// Entities first so relations can point at entities from the same turn.
    async fn write_graph(
        &self,
        entities: &[GraphEntity],
        relations: &[GraphRelation],
    ) -> Vec<(InstructionKind, Result<()>)> {
        let mut results = Vec::with_capacity(entities.len() + relations.len());
        for entity in entities {
            let result = self
                .policy
                .run("entity upsert", TianyiError::StoreUnavailable, || {
                    self.graph.upsert_entity(entity.clone())
                })
                .await
                .map(|stored| debug!(id = %stored.id, revision = stored.revision, "entity stored"));
            results.push((InstructionKind::Entity, result));
        }
        for relation in relations {
            let result = self
                .policy
                .run("relation upsert", TianyiError::StoreUnavailable, || {
                    self.graph.upsert_relation(relation.clone())
                })
                .await
                .map(|stored| debug!(id = %stored.id, "relation stored"));
            results.push((InstructionKind::Relation, result));
        }
        results
    }

    /// Reload the entity lexicon, if the extractor uses one.
    pub async fn refresh_lexicon(&self) {
        if let Some(lexicon) = &self.lexicon {
            if let Err(e) = lexicon.refresh(self.graph.as_ref()).await {
                warn!(error = %e, "failed to refresh entity lexicon");
            }
        }
    }

    // ── Read path ──────────────────────────────────────────────

    /// Recall with the configured default budget.
    pub async fn recall_default(&self, query: &str) -> Recall {
        let budget = if self.recall_config.max_tokens > 0 {
            Budget::MaxTokens(self.recall_config.max_tokens)
        } else {
            Budget::MaxItems(self.recall_config.max_items)
        };
        self.recall(query, budget).await
    }

    /// Build context for `query`.
    ///
    /// Items come back as: every buffered turn (oldest first), then vector
    /// hits by score, then graph facts in entity discovery order (each
    /// entity's summary, then its neighbors). Only the vector and graph part
    /// counts against `budget`.
    pub async fn recall(&self, query: &str, budget: Budget) -> Recall {
        let mut recall = Recall {
            summary: self.buffer.summary().map(str::to_string),
            ..Default::default()
        };

        recall.items = self
            .buffer
            .events()
            .map(|event| RetrievalResult::new(event.transcript_line(), 1.0, Provenance::Buffer))
            .collect();

        let (vector_hits, graph_hits) =
            tokio::join!(self.recall_vector(query), self.recall_graph(query));

        let mut long_term = Vec::new();
        match vector_hits {
            Ok(hits) => long_term.extend(hits),
            Err(e) => {
                warn!(error = %e, "vector recall unavailable, continuing without it");
                recall.degraded.push((Provenance::Vector, e));
            }
        }
        let (graph_hits, graph_errors) = graph_hits;
        long_term.extend(graph_hits);
        for e in graph_errors {
            warn!(error = %e, "graph recall degraded");
            recall.degraded.push((Provenance::Graph, e));
        }

        let kept = apply_budget(long_term, budget);
        debug!(
            buffer = recall.items.len(),
            long_term = kept.len(),
            degraded = recall.degraded.len(),
            "recall assembled"
        );
        recall.items.extend(kept);
        recall
    }

    async fn recall_vector(&self, query: &str) -> Result<Vec<RetrievalResult>> {
        let mut hits = self.vector.query(query, self.top_k, self.threshold).await?;
        hits.sort_by(|(a, sa), (b, sb)| sb.total_cmp(sa).then_with(|| a.id.cmp(&b.id)));
        let records: Vec<VectorRecord> = hits.iter().map(|(record, _)| record.clone()).collect();
        self.extractor.note_related(&records);
        Ok(hits
            .into_iter()
            .map(|(record, score)| {
                RetrievalResult::new(record.source_text, score, Provenance::Vector)
                    .with_source(record.id)
            })
            .collect())
    }

    /// Graph facts plus every error met on the way. A failure for one entity
    /// does not stop the others.
    async fn recall_graph(&self, query: &str) -> (Vec<RetrievalResult>, Vec<TianyiError>) {
        let mut results = Vec::new();
        let mut errors = Vec::new();

        let names = match self
            .policy
            .run("entity resolution", TianyiError::LlmProvider, || {
                self.extractor.resolve_entities(query)
            })
            .await
        {
            Ok(names) => names,
            Err(e) => {
                errors.push(e);
                return (results, errors);
            }
        };

        let mut resolved: Vec<GraphEntity> = Vec::new();
        for name in &names {
            match self
                .policy
                .run("entity lookup", TianyiError::StoreUnavailable, || {
                    self.graph.find_entity(name)
                })
                .await
            {
                Ok(Some(entity)) => {
                    if !resolved.iter().any(|e| e.id == entity.id) {
                        resolved.push(entity);
                    }
                }
                Ok(None) => debug!(name = %name, "candidate entity not in graph"),
                Err(e) => errors.push(e),
            }
        }

        let weight = self.recall_config.graph_weight;
        let mut seen_neighbors: HashSet<String> = HashSet::new();
        let mut seen_relations: HashSet<String> = HashSet::new();
        for entity in &resolved {
            // The entity's own description comes before anything around it.
            if let Some(summary) = entity.summary().filter(|s| !s.trim().is_empty()) {
                results.push(
                    RetrievalResult::new(
                        format!("{}: {}", entity.display_name(), summary),
                        weight,
                        Provenance::Graph,
                    )
                    .with_source(entity.id.clone()),
                );
            }
            let edges = match self
                .policy
                .run("neighbor lookup", TianyiError::StoreUnavailable, || {
                    self.graph.neighbor_edges(&entity.id, None)
                })
                .await
            {
                Ok(edges) => edges,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            let mut taken = 0;
            for neighbor in edges {
                if taken >= self.recall_config.max_graph_neighbors {
                    break;
                }
                if seen_relations.contains(&neighbor.relation.id)
                    || !seen_neighbors.insert(neighbor.entity.id.clone())
                {
                    continue;
                }
                seen_relations.insert(neighbor.relation.id.clone());
                taken += 1;
                results.push(
                    RetrievalResult::new(
                        neighbor.describe(entity.display_name()),
                        weight,
                        Provenance::Graph,
                    )
                    .with_source(neighbor.entity.id.clone()),
                );
            }
        }
        (results, errors)
    }

    // ── Deletion ───────────────────────────────────────────────

    pub async fn forget_vector(&self, ids: &[RecordId]) -> Result<usize> {
        self.vector.delete(ids).await
    }

    /// Delete an entity and every relation touching it.
    pub async fn forget_entity(&self, id: &str) -> Result<bool> {
        let removed = self
            .policy
            .run("entity delete", TianyiError::StoreUnavailable, || {
                self.graph.delete_entity(id)
            })
            .await?;
        if removed {
            info!(id, "entity forgotten");
            self.refresh_lexicon().await;
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<MemoryStats> {
        Ok(MemoryStats {
            collection: self.vector.collection().to_string(),
            vector_records: self.vector.count().await?,
            graph: self.graph.stats().await?,
            buffered_turns: self.buffer.len(),
            window_size: self.buffer.window_size(),
            has_summary: self.buffer.summary().is_some(),
        })
    }
}

/// Keep the longest prefix of `items` that fits `budget`.
pub fn apply_budget(items: Vec<RetrievalResult>, budget: Budget) -> Vec<RetrievalResult> {
    match budget {
        Budget::MaxItems(max) => items.into_iter().take(max).collect(),
        Budget::MaxTokens(max) => {
            let mut used = 0;
            items
                .into_iter()
                .take_while(|item| {
                    used += estimate_tokens(&item.text);
                    used <= max
                })
                .collect()
        }
    }
}

/// Embedding provider named by `memory.embedding.provider`.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = config
                .api_key
                .clone()
                .or_else(|| std::env::var(EMBEDDING_API_KEY_ENV).ok())
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    TianyiError::Config(format!(
                        "embedding provider 'openai' needs memory.embedding.api_key or {}",
                        EMBEDDING_API_KEY_ENV
                    ))
                })?;
            Ok(Arc::new(
                OpenAiEmbedding::new(api_key)
                    .with_model(config.model.clone(), config.dimensions)
                    .with_base_url(config.base_url.clone()),
            ))
        }
        "ollama" => {
            let mut embedder = OllamaEmbedding::new(&config.model, config.dimensions);
            if config.base_url != EmbeddingConfig::default().base_url {
                embedder = embedder.with_base_url(config.base_url.clone());
            }
            Ok(Arc::new(embedder))
        }
        "hash" => Ok(Arc::new(HashEmbedding::new(config.dimensions))),
        other => Err(TianyiError::Config(format!(
            "unknown embedding provider '{}'",
            other
        ))),
    }
}

/// Import `memory.graph.options.seed_file` (and `alias_file`) into an empty graph.
async fn seed_graph(graph: &dyn GraphStore, config: &TianyiConfig) -> Result<()> {
    let options = &config.memory.graph.options;
    let Some(seed) = options.get("seed_file") else {
        return Ok(());
    };
    if graph.stats().await?.entities > 0 {
        debug!("graph already populated, skipping seed import");
        return Ok(());
    }
    let document = GraphDocument::from_file(std::path::Path::new(seed))?;
    let aliases = match options.get("alias_file") {
        Some(path) => load_aliases(std::path::Path::new(path))?,
        None => Default::default(),
    };
    let report = import_graph(graph, &document, &aliases).await?;
    info!(
        seed = %seed,
        entities = report.entities,
        relations = report.relations,
        "seeded knowledge graph"
    );
    Ok(())
}
