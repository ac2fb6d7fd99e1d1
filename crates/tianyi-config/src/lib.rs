//! # tianyi-config
//!
//! Configuration for the Tianyi memory subsystem. Reads from `tianyi.toml` and
//! environment variables, in that precedence order for most keys.

pub mod schema;
pub mod loader;

pub use schema::TianyiConfig;
pub use schema::{
    BufferConfig, ConfigWarning, EmbeddingConfig, ExtractionConfig, GraphConfig, IoConfig,
    LoggingConfig, MemoryConfig, RecallConfig, VectorConfig, WarningSeverity,
};
pub use loader::ConfigLoader;
