//! # tianyi-memory
//!
//! Hybrid memory for the Tianyi agent:
//!
//! - **Conversation buffer**: the last N turns verbatim, plus an optional running summary.
//! - **Vector store**: embedded documents with thresholded nearest-neighbor search (SQLite, persistent).
//! - **Graph store**: typed entities and relations with 1-hop and path lookups (SQLite, persistent).
//!
//! [`MemoryManager`] ties the three together behind `remember` and `recall`.

pub mod buffer;
pub mod extraction;
pub mod graph;
pub mod import;
pub mod manager;
pub mod retry;
pub mod vector;

pub use buffer::{AppendReport, ConcatSummarizer, ConversationBuffer, LlmSummarizer, Summarizer, WindowSnapshot};
pub use extraction::{Command, CommandExtractor, Extractor, LexiconExtractor, parse_commands};
pub use graph::{GraphPath, GraphStats, GraphStore, InMemoryGraphStore, Neighbor, PathStep, SqliteGraphStore};
pub use import::{GraphDocument, ImportReport, import_graph, load_aliases};
pub use manager::{MemoryManager, MemoryStats};
pub use retry::{IoPolicy, with_retry};
pub use vector::{InMemoryVectorIndex, SqliteVectorIndex, VectorIndex, VectorStore, cosine_similarity};
